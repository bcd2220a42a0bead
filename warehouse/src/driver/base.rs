use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::WarehouseResult;
use crate::types::Value;

/// A caller argument for a statement.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedValue {
    /// Parameter name without the leading marker, when the argument is named.
    pub name: Option<String>,
    /// 1-based position of the argument in the call.
    pub ordinal: usize,
    pub value: Value,
}

impl NamedValue {
    /// Creates a positional argument.
    pub fn positional(ordinal: usize, value: impl Into<Value>) -> Self {
        Self {
            name: None,
            ordinal,
            value: value.into(),
        }
    }

    /// Creates a named argument.
    pub fn named(name: impl Into<String>, ordinal: usize, value: impl Into<Value>) -> Self {
        Self {
            name: Some(name.into()),
            ordinal,
            value: value.into(),
        }
    }
}

/// Builds positional arguments from a list of values, numbering them from 1.
pub fn positional_args<I, V>(values: I) -> Vec<NamedValue>
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| NamedValue::positional(index + 1, value))
        .collect()
}

/// Entry point for a warehouse family, selected by connection string scheme.
pub trait Driver: fmt::Debug + Send + Sync {
    /// Connection string scheme handled by this driver, e.g. `bigquery`.
    fn scheme(&self) -> &'static str;

    /// Parses `uri` and returns a connector able to open connections.
    ///
    /// No network activity happens here.
    fn open_connector(&self, uri: &str) -> WarehouseResult<Box<dyn Connector>>;
}

/// Opens connections with a fixed configuration.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a new connection, giving up when `cancel` fires.
    async fn connect(&self, cancel: &CancellationToken) -> WarehouseResult<Box<dyn Connection>>;

    /// Returns the driver that produced this connector.
    fn driver(&self) -> Arc<dyn Driver>;
}

/// A live session with a warehouse.
///
/// Methods suffixed with `_with` observe the given cancellation token. The plain variants run
/// until completion.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn ping(&self) -> WarehouseResult<()> {
        self.ping_with(&CancellationToken::new()).await
    }

    /// Checks that the warehouse is reachable.
    async fn ping_with(&self, cancel: &CancellationToken) -> WarehouseResult<()>;

    /// Prepares `query` for execution. Preparation never contacts the warehouse.
    fn prepare<'a>(&'a self, query: &str) -> WarehouseResult<Box<dyn Statement + 'a>>;

    async fn exec(
        &self,
        query: &str,
        args: &[NamedValue],
    ) -> WarehouseResult<Box<dyn QueryResult>> {
        self.exec_with(&CancellationToken::new(), query, args).await
    }

    /// Prepares and executes a statement that returns no rows.
    async fn exec_with(
        &self,
        cancel: &CancellationToken,
        query: &str,
        args: &[NamedValue],
    ) -> WarehouseResult<Box<dyn QueryResult>> {
        let statement = self.prepare(query)?;
        statement.exec(cancel, args).await
    }

    async fn query(&self, query: &str, args: &[NamedValue]) -> WarehouseResult<Box<dyn Rows>> {
        self.query_with(&CancellationToken::new(), query, args).await
    }

    /// Prepares and executes a statement that returns rows.
    async fn query_with(
        &self,
        cancel: &CancellationToken,
        query: &str,
        args: &[NamedValue],
    ) -> WarehouseResult<Box<dyn Rows>> {
        let statement = self.prepare(query)?;
        statement.query(cancel, args).await
    }

    /// Starts a transaction.
    async fn begin(&self) -> WarehouseResult<Box<dyn Transaction>>;

    /// Releases the connection. Calling it more than once is a no-op.
    async fn close(&self) -> WarehouseResult<()>;

    /// Returns `true` once the connection has been flagged as unusable.
    fn is_bad(&self) -> bool;

    /// Flags the connection as unusable so that pools discard it.
    fn mark_bad(&self);

    fn driver(&self) -> Arc<dyn Driver>;

    /// Returns the native client backing this connection.
    fn raw(&self) -> &dyn Any;
}

#[async_trait]
pub trait Transaction: Send + Sync {
    async fn commit(&self) -> WarehouseResult<()>;

    async fn rollback(&self) -> WarehouseResult<()>;
}

/// A prepared statement bound to the connection that created it.
#[async_trait]
pub trait Statement: Send + Sync {
    /// Number of parameters the statement expects.
    fn num_input(&self) -> usize;

    /// Executes the statement, discarding any rows.
    async fn exec(
        &self,
        cancel: &CancellationToken,
        args: &[NamedValue],
    ) -> WarehouseResult<Box<dyn QueryResult>>;

    /// Executes the statement and returns a cursor over its rows.
    async fn query(&self, cancel: &CancellationToken, args: &[NamedValue])
    -> WarehouseResult<Box<dyn Rows>>;

    async fn close(&self) -> WarehouseResult<()> {
        Ok(())
    }

    /// Normalizes an argument before it is bound.
    ///
    /// The default implementation accepts every argument as is.
    fn check_named_value(&self, _value: &mut NamedValue) -> WarehouseResult<()> {
        Ok(())
    }
}

/// Outcome of a statement that returns no rows.
pub trait QueryResult: fmt::Debug + Send + Sync {
    fn last_insert_id(&self) -> WarehouseResult<i64>;

    fn rows_affected(&self) -> WarehouseResult<i64>;
}

/// A forward-only cursor over query results.
#[async_trait]
pub trait Rows: Send {
    /// Column names in result order.
    fn columns(&self) -> Vec<String>;

    /// Writes the next row into `dest`.
    ///
    /// Returns `Ok(false)` when there are no more rows, and keeps doing so on further calls.
    async fn next(&mut self, dest: &mut [Value]) -> WarehouseResult<bool>;

    /// Releases the cursor. Further calls to [`Rows::next`] report the end of results.
    async fn close(&mut self) -> WarehouseResult<()>;

    /// Database type name of the column at `index`, or an empty string when out of range.
    fn column_type_database_type_name(&self, index: usize) -> String;
}
