use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bail;
use crate::bigquery::classify::BigQueryErrorClassifier;
use crate::bigquery::connector::BigQueryDriver;
use crate::bigquery::native::NativeClient;
use crate::bigquery::statement::BigQueryStatement;
use crate::driver::{Connection, Driver, Statement, Transaction};
use crate::error::{ErrorKind, WarehouseResult};
use crate::retry::{RetryPolicy, execute_with_retry, with_cancellation};
use crate::warehouse_error;

/// A session backed by a BigQuery native client.
///
/// The connection is shared by reference between its statements, so its state flags are
/// atomics. A connection marked bad keeps serving calls; the flag only tells pools to discard
/// it.
pub struct BigQueryConnection<C: NativeClient> {
    client: C,
    retry_policy: Option<RetryPolicy>,
    closed: AtomicBool,
    bad: AtomicBool,
}

impl<C: NativeClient> BigQueryConnection<C> {
    pub fn new(client: C, retry_policy: Option<RetryPolicy>) -> Self {
        Self {
            client,
            retry_policy,
            closed: AtomicBool::new(false),
            bad: AtomicBool::new(false),
        }
    }

    /// Returns the native client, for callers that need BigQuery specific functionality.
    pub fn native_client(&self) -> &C {
        &self.client
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry_policy.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_open(&self) -> WarehouseResult<()> {
        if self.is_closed() {
            bail!(
                ErrorKind::ConnectionClosed,
                "BigQuery connection is closed"
            );
        }

        Ok(())
    }
}

#[async_trait]
impl<C: NativeClient> Connection for BigQueryConnection<C> {
    async fn ping_with(&self, cancel: &CancellationToken) -> WarehouseResult<()> {
        self.ensure_open()?;

        let client = &self.client;
        let datasets = execute_with_retry(
            self.retry_policy(),
            &BigQueryErrorClassifier,
            cancel,
            "ping",
            || async move { with_cancellation(cancel, client.list_datasets(1)).await },
        )
        .await?;

        debug!(datasets = datasets.len(), "bigquery ping succeeded");

        Ok(())
    }

    fn prepare<'a>(&'a self, query: &str) -> WarehouseResult<Box<dyn Statement + 'a>> {
        self.ensure_open()?;

        Ok(Box::new(BigQueryStatement::new(self, query)))
    }

    async fn begin(&self) -> WarehouseResult<Box<dyn Transaction>> {
        Err(warehouse_error!(
            ErrorKind::NotSupported,
            "transactions are not supported"
        ))
    }

    async fn close(&self) -> WarehouseResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.client.close().await?;
        info!("bigquery connection closed");

        if self.is_bad() {
            bail!(
                ErrorKind::BadConnection,
                "BigQuery connection was marked bad",
                "the native client was released, the connection must not be reused"
            );
        }

        Ok(())
    }

    fn is_bad(&self) -> bool {
        self.bad.load(Ordering::Acquire)
    }

    fn mark_bad(&self) {
        if !self.bad.swap(true, Ordering::AcqRel) {
            warn!("bigquery connection marked bad");
        }
    }

    fn driver(&self) -> Arc<dyn Driver> {
        Arc::new(BigQueryDriver)
    }

    fn raw(&self) -> &dyn Any {
        &self.client
    }
}
