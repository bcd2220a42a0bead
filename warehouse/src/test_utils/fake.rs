use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use warehouse_config::shared::BigQueryConnectionConfig;

use crate::bigquery::{
    ApiErrorStatus, NativeClient, NativeClientBuilder, NativeField, NativeJobStatus, NativeQuery,
    NativeRow, NativeRowIterator,
};
use crate::error::{ErrorKind, WarehouseError, WarehouseResult};
use crate::types::Value;
use crate::warehouse_error;

/// Rows, schema and optional trailing failure returned by one scripted read.
#[derive(Debug, Clone, Default)]
pub struct FakeResultSet {
    pub fields: Vec<NativeField>,
    pub rows: Vec<NativeRow>,
    /// Returned by the iterator once all rows were handed out.
    pub error: Option<WarehouseError>,
}

impl FakeResultSet {
    pub fn new(fields: Vec<NativeField>) -> Self {
        Self {
            fields,
            ..Default::default()
        }
    }

    pub fn with_row<I, K>(mut self, cells: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.rows.push(native_row(cells));
        self
    }

    pub fn with_error(mut self, error: WarehouseError) -> Self {
        self.error = Some(error);
        self
    }
}

/// Builds a [`NativeRow`] from `(column, value)` pairs.
pub fn native_row<I, K>(cells: I) -> NativeRow
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    cells
        .into_iter()
        .map(|(name, value)| (name.into(), value))
        .collect()
}

/// Error shaped like a failed BigQuery API call.
pub fn api_error(code: i64, reason: &str, message: &str) -> WarehouseError {
    let status = ApiErrorStatus::new(code, message).with_item(reason, message);

    warehouse_error!(
        ErrorKind::QueryFailed,
        "BigQuery query failed",
        status.to_string(),
        source: status
    )
}

#[derive(Debug, Default)]
struct FakeState {
    read_replies: VecDeque<WarehouseResult<FakeResultSet>>,
    run_replies: VecDeque<WarehouseResult<NativeJobStatus>>,
    ping_replies: VecDeque<WarehouseResult<Vec<String>>>,
    queries: Vec<NativeQuery>,
    read_calls: usize,
    run_calls: usize,
    ping_calls: usize,
    close_calls: usize,
}

/// Scriptable [`NativeClient`].
///
/// Clones share their state. Once a reply queue is drained the client answers with an empty
/// result set, a job without affected rows, or an empty dataset list.
#[derive(Debug, Clone, Default)]
pub struct FakeNativeClient {
    state: Arc<Mutex<FakeState>>,
    latency: Option<Duration>,
}

impl FakeNativeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every native call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub async fn push_read(&self, reply: WarehouseResult<FakeResultSet>) {
        self.state.lock().await.read_replies.push_back(reply);
    }

    pub async fn push_run(&self, reply: WarehouseResult<NativeJobStatus>) {
        self.state.lock().await.run_replies.push_back(reply);
    }

    pub async fn push_ping(&self, reply: WarehouseResult<Vec<String>>) {
        self.state.lock().await.ping_replies.push_back(reply);
    }

    /// Queries submitted through `read` and `run`, in order.
    pub async fn queries(&self) -> Vec<NativeQuery> {
        self.state.lock().await.queries.clone()
    }

    pub async fn read_calls(&self) -> usize {
        self.state.lock().await.read_calls
    }

    pub async fn run_calls(&self) -> usize {
        self.state.lock().await.run_calls
    }

    pub async fn ping_calls(&self) -> usize {
        self.state.lock().await.ping_calls
    }

    pub async fn close_calls(&self) -> usize {
        self.state.lock().await.close_calls
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl NativeClient for FakeNativeClient {
    async fn list_datasets(&self, max_results: u32) -> WarehouseResult<Vec<String>> {
        self.delay().await;

        let mut state = self.state.lock().await;
        state.ping_calls += 1;
        let mut datasets = state.ping_replies.pop_front().unwrap_or(Ok(Vec::new()))?;
        datasets.truncate(max_results as usize);

        Ok(datasets)
    }

    async fn read(&self, query: NativeQuery) -> WarehouseResult<Box<dyn NativeRowIterator>> {
        self.delay().await;

        let mut state = self.state.lock().await;
        state.read_calls += 1;
        state.queries.push(query);
        let result_set = state
            .read_replies
            .pop_front()
            .unwrap_or_else(|| Ok(FakeResultSet::default()))?;

        Ok(Box::new(FakeRowIterator::new(result_set)))
    }

    async fn run(&self, query: NativeQuery) -> WarehouseResult<NativeJobStatus> {
        self.delay().await;

        let mut state = self.state.lock().await;
        state.run_calls += 1;
        state.queries.push(query);

        state
            .run_replies
            .pop_front()
            .unwrap_or(Ok(NativeJobStatus::default()))
    }

    async fn close(&self) -> WarehouseResult<()> {
        self.state.lock().await.close_calls += 1;

        Ok(())
    }
}

/// Iterator over a [`FakeResultSet`] that, like BigQuery, reports its schema only after the
/// first fetch.
#[derive(Debug)]
pub struct FakeRowIterator {
    fields: Vec<NativeField>,
    rows: VecDeque<NativeRow>,
    error: Option<WarehouseError>,
    started: bool,
}

impl FakeRowIterator {
    pub fn new(result_set: FakeResultSet) -> Self {
        Self {
            fields: result_set.fields,
            rows: result_set.rows.into(),
            error: result_set.error,
            started: false,
        }
    }
}

#[async_trait]
impl NativeRowIterator for FakeRowIterator {
    async fn next(&mut self) -> WarehouseResult<Option<NativeRow>> {
        self.started = true;

        if let Some(row) = self.rows.pop_front() {
            return Ok(Some(row));
        }

        match self.error.take() {
            Some(error) => Err(error),
            None => Ok(None),
        }
    }

    fn schema(&self) -> Option<Vec<NativeField>> {
        self.started.then(|| self.fields.clone())
    }
}

/// [`NativeClientBuilder`] handing out clones of one [`FakeNativeClient`].
#[derive(Debug, Clone, Default)]
pub struct FakeClientBuilder {
    client: FakeNativeClient,
}

impl FakeClientBuilder {
    pub fn new(client: FakeNativeClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &FakeNativeClient {
        &self.client
    }
}

#[async_trait]
impl NativeClientBuilder for FakeClientBuilder {
    type Client = FakeNativeClient;

    async fn build(&self, _config: &BigQueryConnectionConfig) -> WarehouseResult<FakeNativeClient> {
        Ok(self.client.clone())
    }
}
