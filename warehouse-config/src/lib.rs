//! Configuration types shared by warehouse connectors.
//!
//! The types in [`shared`] are plain serde structures. Callers deserialize them from whatever
//! source they own (files, environment, connection strings) and hand them to a connector.

pub mod shared;
