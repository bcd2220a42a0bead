//! Shared configuration types for warehouse connections.

mod base;
mod bigquery;
mod retry;

pub use base::ValidationError;
pub use bigquery::{BIGQUERY_SCHEME, BigQueryAuth, BigQueryConnectionConfig};
pub use retry::RetryConfig;
