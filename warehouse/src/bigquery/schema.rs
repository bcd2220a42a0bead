use crate::types::Value;

/// Description of a result column as reported by BigQuery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeField {
    pub name: String,
    /// Type keyword such as `STRING`, `INTEGER` or `RECORD`.
    pub field_type: String,
    /// Whether the field has mode `REPEATED`.
    pub repeated: bool,
    /// Sub-fields of `RECORD` columns.
    pub fields: Vec<NativeField>,
}

impl NativeField {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            repeated: false,
            fields: Vec::new(),
        }
    }

    pub fn repeated(mut self) -> Self {
        self.repeated = true;
        self
    }

    pub fn with_fields(mut self, fields: Vec<NativeField>) -> Self {
        self.fields = fields;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub field: NativeField,
}

/// Ordered result columns of a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BigQuerySchema {
    columns: Vec<Column>,
}

impl BigQuerySchema {
    pub fn new(fields: Vec<NativeField>) -> Self {
        let columns = fields
            .into_iter()
            .map(|field| Column {
                name: field.name.clone(),
                field,
            })
            .collect();

        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Returns `ARRAY` for repeated columns, the native type keyword otherwise, and an empty
    /// string when `index` is out of range.
    pub fn column_type_database_type_name(&self, index: usize) -> String {
        match self.columns.get(index) {
            Some(column) if column.field.repeated => "ARRAY".to_string(),
            Some(column) => column.field.field_type.clone(),
            None => String::new(),
        }
    }

    /// Converts a native cell into the value handed to callers.
    ///
    /// Cells are already decoded by the native client, so values pass through unchanged. An
    /// out-of-range `index` is tolerated.
    pub fn convert_column_value(&self, _index: usize, value: Value) -> Value {
        value
    }
}
