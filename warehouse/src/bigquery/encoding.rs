//! Conversion between [`Value`]s and the BigQuery REST API models.
//!
//! Query responses carry every cell as a string (or a nested `{"f": [...]}` record, or a list of
//! `{"v": ...}` entries for repeated fields) regardless of the column type, so decoding needs the
//! result schema. Query parameters are sent as typed [`QueryParameter`]s.

use std::collections::VecDeque;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat};
use gcp_bigquery_client::model::field_type::FieldType;
use gcp_bigquery_client::model::get_query_results_response::GetQueryResultsResponse;
use gcp_bigquery_client::model::job_reference::JobReference;
use gcp_bigquery_client::model::query_parameter::QueryParameter;
use gcp_bigquery_client::model::query_parameter_type::QueryParameterType;
use gcp_bigquery_client::model::query_parameter_value::QueryParameterValue;
use gcp_bigquery_client::model::query_request::QueryRequest;
use gcp_bigquery_client::model::query_response::QueryResponse;
use gcp_bigquery_client::model::table_field_schema::TableFieldSchema;
use gcp_bigquery_client::model::table_row::TableRow;
use gcp_bigquery_client::model::table_schema::TableSchema;
use serde_json::{Map, json};

use crate::bigquery::binder::NativeParameter;
use crate::bigquery::native::{NativeQuery, NativeRow};
use crate::bigquery::schema::NativeField;
use crate::error::{ErrorKind, WarehouseResult};
use crate::types::Value;
use crate::{bail, warehouse_error};

/// The parts of a `jobs.query` or `jobs.getQueryResults` response used by the adapter.
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub job_complete: Option<bool>,
    pub job_reference: Option<JobReference>,
    pub page_token: Option<String>,
    pub rows: Option<Vec<TableRow>>,
    pub schema: Option<TableSchema>,
    pub num_dml_affected_rows: Option<String>,
}

impl From<QueryResponse> for QueryPage {
    fn from(response: QueryResponse) -> Self {
        Self {
            job_complete: response.job_complete,
            job_reference: response.job_reference,
            page_token: response.page_token,
            rows: response.rows,
            schema: response.schema,
            num_dml_affected_rows: response.num_dml_affected_rows,
        }
    }
}

impl From<GetQueryResultsResponse> for QueryPage {
    fn from(response: GetQueryResultsResponse) -> Self {
        Self {
            job_complete: response.job_complete,
            job_reference: response.job_reference,
            page_token: response.page_token,
            rows: response.rows,
            schema: response.schema,
            num_dml_affected_rows: response.num_dml_affected_rows,
        }
    }
}

impl QueryPage {
    /// `false` only when the server explicitly reported that the job is still running.
    pub fn is_complete(&self) -> bool {
        self.job_complete.unwrap_or(true)
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_reference
            .as_ref()
            .and_then(|reference| reference.job_id.as_deref())
    }

    pub fn job_location(&self) -> Option<&str> {
        self.job_reference
            .as_ref()
            .and_then(|reference| reference.location.as_deref())
    }

    pub fn fields(&self) -> Option<Vec<NativeField>> {
        let fields = self.schema.as_ref()?.fields.as_ref()?;

        Some(fields.iter().map(native_field).collect())
    }

    /// Rows modified by a DML job, reported as a decimal string by the API.
    pub fn affected_rows(&self) -> WarehouseResult<Option<i64>> {
        let Some(count) = &self.num_dml_affected_rows else {
            return Ok(None);
        };

        count.parse().map(Some).map_err(|err| {
            warehouse_error!(
                ErrorKind::InvalidData,
                "Invalid affected row count",
                format!("`{count}` is not an integer"),
                source: err
            )
        })
    }

    /// Decodes the rows of this page against `fields`.
    pub fn decode_rows(&mut self, fields: &[NativeField]) -> WarehouseResult<VecDeque<NativeRow>> {
        self.rows
            .take()
            .unwrap_or_default()
            .into_iter()
            .map(|row| decode_row(fields, row))
            .collect()
    }
}

fn native_field(field: &TableFieldSchema) -> NativeField {
    NativeField {
        name: field.name.clone(),
        field_type: field_type_name(&field.r#type).to_string(),
        repeated: field
            .mode
            .as_deref()
            .is_some_and(|mode| mode.eq_ignore_ascii_case("REPEATED")),
        fields: field
            .fields
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(native_field)
            .collect(),
    }
}

/// Returns the type keyword BigQuery reports for `field_type`.
fn field_type_name(field_type: &FieldType) -> &'static str {
    match field_type {
        FieldType::String => "STRING",
        FieldType::Bytes => "BYTES",
        FieldType::Integer => "INTEGER",
        FieldType::Int64 => "INT64",
        FieldType::Float => "FLOAT",
        FieldType::Float64 => "FLOAT64",
        FieldType::Numeric => "NUMERIC",
        FieldType::Bignumeric => "BIGNUMERIC",
        FieldType::Boolean => "BOOLEAN",
        FieldType::Bool => "BOOL",
        FieldType::Timestamp => "TIMESTAMP",
        FieldType::Date => "DATE",
        FieldType::Time => "TIME",
        FieldType::Datetime => "DATETIME",
        FieldType::Record => "RECORD",
        FieldType::Struct => "STRUCT",
        FieldType::Geography => "GEOGRAPHY",
        FieldType::Json => "JSON",
        FieldType::Interval => "INTERVAL",
    }
}

/// Decodes one row, keying cells by column name.
pub fn decode_row(fields: &[NativeField], row: TableRow) -> WarehouseResult<NativeRow> {
    let cells = row.columns.unwrap_or_default();
    if cells.len() != fields.len() {
        bail!(
            ErrorKind::InvalidData,
            "BigQuery row does not match its schema",
            format!("expected {} cells, got {}", fields.len(), cells.len())
        );
    }

    fields
        .iter()
        .zip(cells)
        .map(|(field, cell)| Ok((field.name.clone(), decode_cell(field, cell.value.as_ref())?)))
        .collect()
}

/// Decodes a single cell of type `field`.
pub fn decode_cell(
    field: &NativeField,
    raw: Option<&serde_json::Value>,
) -> WarehouseResult<Value> {
    let Some(raw) = raw.filter(|raw| !raw.is_null()) else {
        return Ok(Value::Null);
    };

    if field.repeated {
        let serde_json::Value::Array(entries) = raw else {
            bail!(
                ErrorKind::InvalidData,
                "Invalid repeated BigQuery cell",
                format!("column `{}` is not a list: {raw}", field.name)
            );
        };

        let element = NativeField {
            repeated: false,
            ..field.clone()
        };

        return entries
            .iter()
            .map(|entry| decode_cell(&element, entry.get("v")))
            .collect::<WarehouseResult<Vec<_>>>()
            .map(Value::Array);
    }

    if matches!(field.field_type.as_str(), "RECORD" | "STRUCT") {
        return decode_record(field, raw).map(Value::Json);
    }

    let Some(text) = raw.as_str() else {
        bail!(
            ErrorKind::InvalidData,
            "Invalid BigQuery cell",
            format!("column `{}` holds a non-string scalar: {raw}", field.name)
        );
    };

    decode_scalar(field, text)
}

fn decode_scalar(field: &NativeField, text: &str) -> WarehouseResult<Value> {
    let invalid = |expected: &str| {
        warehouse_error!(
            ErrorKind::ConversionError,
            "Invalid BigQuery cell value",
            format!(
                "column `{}` of type {} holds `{text}`, expected {expected}",
                field.name, field.field_type
            )
        )
    };

    let value = match field.field_type.as_str() {
        "INTEGER" | "INT64" => Value::Int64(text.parse().map_err(|_| invalid("an integer"))?),
        "FLOAT" | "FLOAT64" => Value::Float64(text.parse().map_err(|_| invalid("a float"))?),
        "BOOLEAN" | "BOOL" => match text {
            "true" | "TRUE" => Value::Bool(true),
            "false" | "FALSE" => Value::Bool(false),
            _ => return Err(invalid("a boolean")),
        },
        "NUMERIC" | "BIGNUMERIC" | "DECIMAL" | "BIGDECIMAL" => Value::Numeric(text.to_string()),
        "BYTES" => Value::Bytes(
            BASE64
                .decode(text)
                .map_err(|_| invalid("base64 encoded bytes"))?,
        ),
        "TIMESTAMP" => {
            let seconds: f64 = text.parse().map_err(|_| invalid("epoch seconds"))?;
            let micros = (seconds * 1_000_000.0).round() as i64;
            Value::Timestamp(
                DateTime::from_timestamp_micros(micros).ok_or_else(|| invalid("a timestamp"))?,
            )
        }
        "DATE" => Value::Date(
            NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| invalid("a date"))?,
        ),
        "TIME" => Value::Time(
            NaiveTime::parse_from_str(text, "%H:%M:%S%.f").map_err(|_| invalid("a time"))?,
        ),
        "DATETIME" => Value::DateTime(
            NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
                .map_err(|_| invalid("a datetime"))?,
        ),
        "JSON" => {
            Value::Json(serde_json::from_str(text).map_err(|_| invalid("a JSON document"))?)
        }
        // STRING, GEOGRAPHY, INTERVAL and RANGE are handed out in their textual form.
        _ => Value::String(text.to_string()),
    };

    Ok(value)
}

/// Decodes a `{"f": [{"v": ...}]}` record into a JSON object keyed by sub-field name.
fn decode_record(
    field: &NativeField,
    raw: &serde_json::Value,
) -> WarehouseResult<serde_json::Value> {
    let cells = raw
        .get("f")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| {
            warehouse_error!(
                ErrorKind::InvalidData,
                "Invalid BigQuery record cell",
                format!("column `{}` is not a record: {raw}", field.name)
            )
        })?;
    if cells.len() != field.fields.len() {
        bail!(
            ErrorKind::InvalidData,
            "BigQuery record does not match its schema",
            format!(
                "column `{}` expects {} sub-fields, got {}",
                field.name,
                field.fields.len(),
                cells.len()
            )
        );
    }

    let mut object = Map::with_capacity(field.fields.len());
    for (sub_field, cell) in field.fields.iter().zip(cells) {
        let value = decode_cell(sub_field, cell.get("v"))?;
        object.insert(sub_field.name.clone(), value_to_json(value));
    }

    Ok(serde_json::Value::Object(object))
}

/// Renders a decoded value as plain JSON, used for record contents.
fn value_to_json(value: Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(value) => json!(value),
        Value::Int64(value) => json!(value),
        Value::Float64(value) => serde_json::Number::from_f64(value)
            .map(serde_json::Value::Number)
            .unwrap_or_else(|| json!(value.to_string())),
        Value::Numeric(value) | Value::String(value) => json!(value),
        Value::Bytes(value) => json!(BASE64.encode(value)),
        Value::Date(value) => json!(value.to_string()),
        Value::Time(value) => json!(value.to_string()),
        Value::DateTime(value) => json!(value.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        Value::Timestamp(value) => json!(value.to_rfc3339_opts(SecondsFormat::Micros, true)),
        Value::Json(value) => value,
        Value::Array(values) => {
            serde_json::Value::Array(values.into_iter().map(value_to_json).collect())
        }
        Value::Expression(expression) => value_to_json(expression.native().into_native()),
    }
}

/// Builds a `jobs.query` request for `query`.
pub fn encode_query_request(
    query: &NativeQuery,
    location: Option<&str>,
) -> WarehouseResult<QueryRequest> {
    let mut request = QueryRequest::new(query.sql.clone());
    request.location = location.map(str::to_string);

    if let Some(mode) = query.parameter_mode {
        request.parameter_mode = Some(mode.as_str().to_string());
        request.query_parameters = Some(
            query
                .parameters
                .iter()
                .map(encode_parameter)
                .collect::<WarehouseResult<Vec<_>>>()?,
        );
    }

    Ok(request)
}

/// Encodes a bound parameter as a [`QueryParameter`].
pub fn encode_parameter(parameter: &NativeParameter) -> WarehouseResult<QueryParameter> {
    let (parameter_type, parameter_value) = encode_value(&parameter.value)?;

    Ok(QueryParameter {
        name: parameter.name.clone(),
        parameter_type: Some(parameter_type),
        parameter_value: Some(parameter_value),
    })
}

fn scalar_type(type_name: &str) -> QueryParameterType {
    QueryParameterType {
        r#type: type_name.to_string(),
        ..Default::default()
    }
}

fn scalar(type_name: &str, text: String) -> (QueryParameterType, QueryParameterValue) {
    let value = QueryParameterValue {
        value: Some(text),
        ..Default::default()
    };

    (scalar_type(type_name), value)
}

fn encode_value(value: &Value) -> WarehouseResult<(QueryParameterType, QueryParameterValue)> {
    let encoded = match value {
        // Untyped NULL, BigQuery coerces a NULL STRING parameter to the expected type.
        Value::Null => (scalar_type("STRING"), QueryParameterValue::default()),
        Value::Bool(value) => scalar("BOOL", value.to_string()),
        Value::Int64(value) => scalar("INT64", value.to_string()),
        Value::Float64(value) => scalar("FLOAT64", encode_float(*value)),
        Value::Numeric(value) => scalar("BIGNUMERIC", value.clone()),
        Value::String(value) => scalar("STRING", value.clone()),
        Value::Bytes(value) => scalar("BYTES", BASE64.encode(value)),
        Value::Date(value) => scalar("DATE", value.format("%Y-%m-%d").to_string()),
        Value::Time(value) => scalar("TIME", value.format("%H:%M:%S%.f").to_string()),
        Value::DateTime(value) => {
            scalar("DATETIME", value.format("%Y-%m-%d %H:%M:%S%.f").to_string())
        }
        Value::Timestamp(value) => scalar(
            "TIMESTAMP",
            value.to_rfc3339_opts(SecondsFormat::Micros, true),
        ),
        Value::Json(value) => scalar("JSON", value.to_string()),
        Value::Array(values) => {
            if values.iter().any(|value| matches!(value, Value::Array(_))) {
                bail!(
                    ErrorKind::NotSupported,
                    "Nested arrays are not supported by BigQuery"
                );
            }

            let mut element_type = scalar_type("STRING");
            let mut array_values = Vec::with_capacity(values.len());
            for value in values {
                let (value_type, encoded) = encode_value(value)?;
                if !value.is_null() {
                    element_type = value_type;
                }
                array_values.push(encoded);
            }

            let array_type = QueryParameterType {
                r#type: "ARRAY".to_string(),
                array_type: Some(Box::new(element_type)),
                ..Default::default()
            };
            let array_value = QueryParameterValue {
                array_values: Some(array_values),
                ..Default::default()
            };

            (array_type, array_value)
        }
        Value::Expression(expression) => return encode_value(&expression.native().into_native()),
    };

    Ok(encoded)
}

fn encode_float(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "Infinity".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        value.to_string()
    }
}
