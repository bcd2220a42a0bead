//! BigQuery driver.
//!
//! A [`BigQueryConnection`] wraps a [`NativeClient`] and adapts it to the generic driver
//! contract. Statements bind their arguments into native query parameters, submit a job per
//! execution and retry throttled or transient failures according to the connection's
//! [`crate::retry::RetryPolicy`].

mod binder;
mod classify;
mod client;
mod connection;
mod connector;
mod encoding;
mod native;
mod result;
mod rows;
mod schema;
mod statement;

pub use binder::{NativeParameter, ParameterMode, bind_parameters, count_parameters};
pub use classify::{
    ApiErrorItem, ApiErrorStatus, BigQueryErrorClassifier, TransportFailure, api_error_status,
    classify_error, is_rate_limit_error, is_retryable_error,
};
pub use client::{GcpClientBuilder, GcpNativeClient, GcpRowIterator, bq_error_to_warehouse_error};
pub use connection::BigQueryConnection;
pub use connector::{BigQueryConnector, BigQueryDriver};
pub use native::{
    NativeClient, NativeClientBuilder, NativeJobStatus, NativeQuery, NativeRow, NativeRowIterator,
};
pub use result::BigQueryResult;
pub use rows::BigQueryRows;
pub use schema::{BigQuerySchema, Column, NativeField};
pub use statement::BigQueryStatement;
