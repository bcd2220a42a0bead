//! Value types exchanged with warehouses.

mod value;

pub use value::*;
