use crate::driver::QueryResult;
use crate::error::{ErrorKind, WarehouseResult};
use crate::warehouse_error;

/// Outcome of a BigQuery statement that returns no rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BigQueryResult {
    rows_affected: Option<i64>,
}

impl BigQueryResult {
    pub fn new(rows_affected: Option<i64>) -> Self {
        Self { rows_affected }
    }
}

impl QueryResult for BigQueryResult {
    /// BigQuery has no auto-increment columns.
    fn last_insert_id(&self) -> WarehouseResult<i64> {
        Err(warehouse_error!(
            ErrorKind::NotSupported,
            "Last insert id is not supported by BigQuery"
        ))
    }

    /// Rows touched by a DML statement, or 0 when BigQuery did not report a count.
    fn rows_affected(&self) -> WarehouseResult<i64> {
        Ok(self.rows_affected.unwrap_or(0))
    }
}
