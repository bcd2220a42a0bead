use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bail;
use crate::bigquery::binder::{bind_parameters, count_parameters};
use crate::bigquery::classify::BigQueryErrorClassifier;
use crate::bigquery::connection::BigQueryConnection;
use crate::bigquery::native::{NativeClient, NativeQuery};
use crate::bigquery::result::BigQueryResult;
use crate::bigquery::rows::BigQueryRows;
use crate::driver::{NamedValue, QueryResult, Rows, Statement};
use crate::error::{ErrorKind, WarehouseResult};
use crate::retry::{execute_with_retry, with_cancellation};

/// A query prepared on a [`BigQueryConnection`].
///
/// Preparation is purely local: BigQuery has no server-side prepared statements, so the query
/// text is submitted as a new job on every execution.
pub struct BigQueryStatement<'c, C: NativeClient> {
    connection: &'c BigQueryConnection<C>,
    query: String,
    num_input: usize,
}

impl<'c, C: NativeClient> BigQueryStatement<'c, C> {
    pub(crate) fn new(connection: &'c BigQueryConnection<C>, query: &str) -> Self {
        Self {
            connection,
            query: query.to_string(),
            num_input: count_parameters(query),
        }
    }

    /// Normalizes and binds `args` into a native query.
    fn native_query(&self, args: &[NamedValue]) -> WarehouseResult<NativeQuery> {
        if args.len() != self.num_input {
            bail!(
                ErrorKind::InvalidData,
                "Wrong number of statement arguments",
                format!("expected {} arguments, got {}", self.num_input, args.len())
            );
        }

        let mut args = args.to_vec();
        for arg in &mut args {
            self.check_named_value(arg)?;
        }

        Ok(NativeQuery::new(self.query.clone(), bind_parameters(&args)))
    }
}

#[async_trait]
impl<C: NativeClient> Statement for BigQueryStatement<'_, C> {
    fn num_input(&self) -> usize {
        self.num_input
    }

    async fn exec(
        &self,
        cancel: &CancellationToken,
        args: &[NamedValue],
    ) -> WarehouseResult<Box<dyn QueryResult>> {
        self.connection.ensure_open()?;
        let query = self.native_query(args)?;
        let client = self.connection.native_client();

        debug!(
            parameters = query.parameters.len(),
            "executing bigquery statement"
        );

        let status = execute_with_retry(
            self.connection.retry_policy(),
            &BigQueryErrorClassifier,
            cancel,
            "exec",
            || {
                let query = query.clone();
                async move { with_cancellation(cancel, client.run(query)).await }
            },
        )
        .await?;

        Ok(Box::new(BigQueryResult::new(status.affected_rows)))
    }

    async fn query(
        &self,
        cancel: &CancellationToken,
        args: &[NamedValue],
    ) -> WarehouseResult<Box<dyn Rows>> {
        self.connection.ensure_open()?;
        let query = self.native_query(args)?;
        let client = self.connection.native_client();

        debug!(
            parameters = query.parameters.len(),
            "running bigquery query"
        );

        let iter = execute_with_retry(
            self.connection.retry_policy(),
            &BigQueryErrorClassifier,
            cancel,
            "query",
            || {
                let query = query.clone();
                async move { with_cancellation(cancel, client.read(query)).await }
            },
        )
        .await?;

        Ok(Box::new(BigQueryRows::new(iter, cancel.clone()).await))
    }
}
