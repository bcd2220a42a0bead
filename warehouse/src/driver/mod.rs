//! Generic, pull-based client contract implemented by every warehouse driver.

mod base;
mod registry;

pub use base::*;
pub use registry::*;
