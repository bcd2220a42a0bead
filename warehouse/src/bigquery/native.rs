use std::collections::HashMap;

use async_trait::async_trait;
use warehouse_config::shared::BigQueryConnectionConfig;

use crate::bigquery::binder::{NativeParameter, ParameterMode, parameter_mode};
use crate::bigquery::schema::NativeField;
use crate::error::WarehouseResult;
use crate::types::Value;

/// A row as returned by the native client, keyed by column name.
pub type NativeRow = HashMap<String, Value>;

/// A query job submitted to BigQuery.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeQuery {
    pub sql: String,
    pub parameters: Vec<NativeParameter>,
    pub parameter_mode: Option<ParameterMode>,
}

impl NativeQuery {
    pub fn new(sql: impl Into<String>, parameters: Vec<NativeParameter>) -> Self {
        let parameter_mode = parameter_mode(&parameters);

        Self {
            sql: sql.into(),
            parameters,
            parameter_mode,
        }
    }
}

/// Completion status of a job that returns no rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NativeJobStatus {
    /// Rows touched by a DML statement, when the server reports it.
    pub affected_rows: Option<i64>,
}

/// The subset of the BigQuery client used by the adapter.
#[async_trait]
pub trait NativeClient: Send + Sync + 'static {
    /// Lists at most `max_results` dataset ids of the project.
    async fn list_datasets(&self, max_results: u32) -> WarehouseResult<Vec<String>>;

    /// Submits a reading query and returns an iterator over its rows.
    async fn read(&self, query: NativeQuery) -> WarehouseResult<Box<dyn NativeRowIterator>>;

    /// Submits a query and waits for the job to complete.
    async fn run(&self, query: NativeQuery) -> WarehouseResult<NativeJobStatus>;

    /// Releases resources held by the client.
    async fn close(&self) -> WarehouseResult<()>;
}

/// Paging iterator over the rows of a query job.
#[async_trait]
pub trait NativeRowIterator: Send {
    /// Returns the next row, or [`None`] when the job has no more rows.
    async fn next(&mut self) -> WarehouseResult<Option<NativeRow>>;

    /// Returns the result schema.
    ///
    /// The schema is only known once [`NativeRowIterator::next`] has been called at least once,
    /// before that this returns [`None`].
    fn schema(&self) -> Option<Vec<NativeField>>;
}

/// Creates native clients for a connection configuration.
#[async_trait]
pub trait NativeClientBuilder: Send + Sync + 'static {
    type Client: NativeClient;

    async fn build(&self, config: &BigQueryConnectionConfig) -> WarehouseResult<Self::Client>;
}
