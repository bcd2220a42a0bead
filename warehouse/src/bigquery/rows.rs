use std::sync::OnceLock;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bail;
use crate::bigquery::native::{NativeRow, NativeRowIterator};
use crate::bigquery::schema::BigQuerySchema;
use crate::driver::Rows;
use crate::error::{ErrorKind, WarehouseResult};
use crate::retry::with_cancellation;
use crate::types::Value;

/// Pull cursor over the rows of a BigQuery job.
///
/// BigQuery only reports the result schema once rows have been fetched, while callers expect
/// column names before reading the first row. The cursor therefore fetches one row when it is
/// created and hands that buffered outcome out on the first call to [`Rows::next`].
pub struct BigQueryRows {
    iter: Option<Box<dyn NativeRowIterator>>,
    buffered: Option<WarehouseResult<Option<NativeRow>>>,
    schema: OnceLock<BigQuerySchema>,
    cancel: CancellationToken,
    exhausted: bool,
}

impl BigQueryRows {
    /// Wraps `iter`, performing the priming fetch under `cancel`.
    ///
    /// A failed priming fetch is not reported here but by the first call to [`Rows::next`].
    pub async fn new(mut iter: Box<dyn NativeRowIterator>, cancel: CancellationToken) -> Self {
        let first = with_cancellation(&cancel, iter.next()).await;

        Self {
            iter: Some(iter),
            buffered: Some(first),
            schema: OnceLock::new(),
            cancel,
            exhausted: false,
        }
    }

    /// Returns the result schema, if the native iterator reported one.
    ///
    /// Never triggers a fetch. Once built the schema is cached for the lifetime of the cursor.
    pub fn schema(&self) -> Option<&BigQuerySchema> {
        if let Some(schema) = self.schema.get() {
            return Some(schema);
        }

        let fields = self.iter.as_ref()?.schema()?;

        Some(self.schema.get_or_init(|| BigQuerySchema::new(fields)))
    }

    fn check_destination(&self, dest: &[Value]) -> WarehouseResult<()> {
        if let Some(schema) = self.schema() {
            if dest.len() < schema.len() {
                bail!(
                    ErrorKind::InvalidState,
                    "Row destination is too small",
                    format!(
                        "expected room for {} columns, got {}",
                        schema.len(),
                        dest.len()
                    )
                );
            }
        }

        Ok(())
    }

    fn write_row(&self, mut row: NativeRow, dest: &mut [Value]) -> WarehouseResult<()> {
        let Some(schema) = self.schema() else {
            bail!(
                ErrorKind::InvalidState,
                "BigQuery result schema is unavailable",
                "the native iterator returned a row without reporting its schema"
            );
        };

        self.check_destination(dest)?;

        for (index, column) in schema.columns().iter().enumerate() {
            let value = row.remove(&column.name).unwrap_or(Value::Null);
            dest[index] = schema.convert_column_value(index, value);
        }

        Ok(())
    }
}

#[async_trait]
impl Rows for BigQueryRows {
    fn columns(&self) -> Vec<String> {
        self.schema()
            .map(BigQuerySchema::column_names)
            .unwrap_or_default()
    }

    async fn next(&mut self, dest: &mut [Value]) -> WarehouseResult<bool> {
        if self.exhausted {
            return Ok(false);
        }

        self.check_destination(dest)?;

        let outcome = match self.buffered.take() {
            Some(outcome) => outcome,
            None => {
                let Some(iter) = self.iter.as_mut() else {
                    self.exhausted = true;
                    return Ok(false);
                };

                with_cancellation(&self.cancel, iter.next()).await
            }
        };

        match outcome? {
            Some(row) => {
                self.write_row(row, dest)?;
                Ok(true)
            }
            None => {
                self.exhausted = true;
                Ok(false)
            }
        }
    }

    async fn close(&mut self) -> WarehouseResult<()> {
        if self.iter.take().is_some() {
            debug!("closing bigquery row cursor");
        }
        self.buffered = None;
        self.exhausted = true;

        Ok(())
    }

    fn column_type_database_type_name(&self, index: usize) -> String {
        self.schema()
            .map(|schema| schema.column_type_database_type_name(index))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::bigquery::schema::NativeField;
    use crate::error::WarehouseError;
    use crate::warehouse_error;

    /// Iterator that counts fetches and only reports its schema after the first one.
    struct CountingIterator {
        rows: Vec<WarehouseResult<NativeRow>>,
        fetches: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl NativeRowIterator for CountingIterator {
        async fn next(&mut self) -> WarehouseResult<Option<NativeRow>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.rows.is_empty() {
                return Ok(None);
            }

            self.rows.remove(0).map(Some)
        }

        fn schema(&self) -> Option<Vec<NativeField>> {
            if self.fetches.load(Ordering::SeqCst) == 0 {
                return None;
            }

            Some(vec![
                NativeField::new("id", "INTEGER"),
                NativeField::new("name", "STRING"),
            ])
        }
    }

    fn row(id: i64, name: Option<&str>) -> NativeRow {
        let mut row = NativeRow::new();
        row.insert("id".to_string(), Value::Int64(id));
        if let Some(name) = name {
            row.insert("name".to_string(), Value::from(name));
        }
        row
    }

    async fn open_rows(rows: Vec<WarehouseResult<NativeRow>>) -> (BigQueryRows, Arc<AtomicUsize>) {
        let fetches = Arc::new(AtomicUsize::new(0));
        let iter = CountingIterator {
            rows,
            fetches: fetches.clone(),
        };

        (
            BigQueryRows::new(Box::new(iter), CancellationToken::new()).await,
            fetches,
        )
    }

    #[tokio::test]
    async fn test_columns_are_known_before_first_next() {
        let (rows, fetches) = open_rows(vec![Ok(row(1, Some("a")))]).await;

        assert_eq!(rows.columns(), vec!["id", "name"]);
        assert_eq!(rows.column_type_database_type_name(0), "INTEGER");
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_next_consumes_buffer_then_fetches() {
        let (mut rows, fetches) = open_rows(vec![Ok(row(1, Some("a"))), Ok(row(2, None))]).await;
        let mut dest = vec![Value::Null; 2];

        assert!(rows.next(&mut dest).await.unwrap());
        assert_eq!(dest, vec![Value::Int64(1), Value::from("a")]);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        assert!(rows.next(&mut dest).await.unwrap());
        assert_eq!(dest, vec![Value::Int64(2), Value::Null]);
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_end_of_results_is_sticky() {
        let (mut rows, fetches) = open_rows(vec![Ok(row(1, Some("a")))]).await;
        let mut dest = vec![Value::Null; 2];

        assert!(rows.next(&mut dest).await.unwrap());
        assert!(!rows.next(&mut dest).await.unwrap());
        assert!(!rows.next(&mut dest).await.unwrap());
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_result() {
        let (mut rows, _) = open_rows(vec![]).await;
        let mut dest = vec![Value::Null; 2];

        assert!(!rows.next(&mut dest).await.unwrap());
    }

    #[tokio::test]
    async fn test_priming_error_is_reported_by_next() {
        let failure: WarehouseError = warehouse_error!(ErrorKind::QueryFailed, "page failed");
        let (mut rows, _) = open_rows(vec![Err(failure)]).await;
        let mut dest = vec![Value::Null; 2];

        let err = rows.next(&mut dest).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::QueryFailed);
    }

    #[tokio::test]
    async fn test_short_destination_is_rejected() {
        let (mut rows, _) = open_rows(vec![Ok(row(1, Some("a")))]).await;
        let mut dest = vec![Value::Null; 1];

        let err = rows.next(&mut dest).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        // The buffered row is still delivered once the caller provides enough room.
        let mut dest = vec![Value::Null; 2];
        assert!(rows.next(&mut dest).await.unwrap());
    }

    #[tokio::test]
    async fn test_close_ends_iteration() {
        let (mut rows, _) = open_rows(vec![Ok(row(1, Some("a"))), Ok(row(2, Some("b")))]).await;
        let mut dest = vec![Value::Null; 2];

        rows.close().await.unwrap();

        assert!(!rows.next(&mut dest).await.unwrap());
    }
}
