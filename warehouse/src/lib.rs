//! Client-protocol adapter exposing warehouses through a generic, pull-based driver contract.
//!
//! Drivers are looked up by connection string scheme in a [`driver::DriverRegistry`]. The
//! BigQuery driver lives in [`bigquery`].

pub mod bigquery;
pub mod driver;
pub mod error;
mod macros;
pub mod metrics;
pub mod retry;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
