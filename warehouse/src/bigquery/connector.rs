use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;
use warehouse_config::shared::{BIGQUERY_SCHEME, BigQueryConnectionConfig};

use crate::bigquery::client::GcpClientBuilder;
use crate::bigquery::connection::BigQueryConnection;
use crate::bigquery::native::NativeClientBuilder;
use crate::driver::{Connection, Connector, Driver};
use crate::error::WarehouseResult;
use crate::retry::{RetryPolicy, with_cancellation};

/// Driver for `bigquery://` connection strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct BigQueryDriver;

impl Driver for BigQueryDriver {
    fn scheme(&self) -> &'static str {
        BIGQUERY_SCHEME
    }

    fn open_connector(&self, uri: &str) -> WarehouseResult<Box<dyn Connector>> {
        Ok(Box::new(BigQueryConnector::from_uri(uri)?))
    }
}

/// Opens BigQuery connections with a fixed configuration.
///
/// The builder decides how native clients are created, which lets tests swap the Google Cloud
/// client for an in-memory one.
pub struct BigQueryConnector<B = GcpClientBuilder> {
    config: BigQueryConnectionConfig,
    builder: B,
}

impl BigQueryConnector<GcpClientBuilder> {
    /// Creates a connector talking to Google Cloud.
    pub fn new(config: BigQueryConnectionConfig) -> Self {
        Self::with_builder(config, GcpClientBuilder)
    }

    /// Creates a connector from a `bigquery://` connection string.
    pub fn from_uri(uri: &str) -> WarehouseResult<Self> {
        Ok(Self::new(BigQueryConnectionConfig::from_uri(uri)?))
    }
}

impl<B: NativeClientBuilder> BigQueryConnector<B> {
    pub fn with_builder(config: BigQueryConnectionConfig, builder: B) -> Self {
        Self { config, builder }
    }

    pub fn config(&self) -> &BigQueryConnectionConfig {
        &self.config
    }

    /// Opens a typed connection, keeping access to the concrete native client.
    pub async fn connect_native(
        &self,
        cancel: &CancellationToken,
    ) -> WarehouseResult<BigQueryConnection<B::Client>> {
        self.config.validate()?;

        let client = with_cancellation(cancel, self.builder.build(&self.config)).await?;
        let retry_policy = self.config.retry.as_ref().map(RetryPolicy::from);

        info!(
            project_id = %self.config.project_id,
            location = ?self.config.location,
            retry = retry_policy.is_some(),
            "opened bigquery connection"
        );

        Ok(BigQueryConnection::new(client, retry_policy))
    }
}

#[async_trait]
impl<B: NativeClientBuilder> Connector for BigQueryConnector<B> {
    async fn connect(&self, cancel: &CancellationToken) -> WarehouseResult<Box<dyn Connection>> {
        let connection = self.connect_native(cancel).await?;

        Ok(Box::new(connection))
    }

    fn driver(&self) -> Arc<dyn Driver> {
        Arc::new(BigQueryDriver)
    }
}
