#![cfg(feature = "test-utils")]

use tokio_util::sync::CancellationToken;
use warehouse::bigquery::{BigQueryConnector, NativeField, NativeJobStatus, ParameterMode};
use warehouse::driver::{
    Connection, Connector, Driver, DriverRegistry, NamedValue, QueryResult, Rows, positional_args,
};
use warehouse::error::ErrorKind;
use warehouse::test_utils::fake::{FakeClientBuilder, FakeNativeClient, FakeResultSet, api_error};
use warehouse::types::Value;
use warehouse_config::shared::{BigQueryConnectionConfig, RetryConfig};
use warehouse_telemetry::tracing::init_test_tracing;

fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        initial_interval_ms: 100,
        randomization_factor: 0.0,
        multiplier: 2.0,
        max_interval_ms: 1_000,
        max_retries,
        max_elapsed_time_ms: 0,
    }
}

fn connector(
    client: &FakeNativeClient,
    retry: Option<RetryConfig>,
) -> BigQueryConnector<FakeClientBuilder> {
    let mut config = BigQueryConnectionConfig::from_uri("bigquery://analytics-project/EU").unwrap();
    config.retry = retry;

    BigQueryConnector::with_builder(config, FakeClientBuilder::new(client.clone()))
}

fn users_result_set() -> FakeResultSet {
    FakeResultSet::new(vec![
        NativeField::new("id", "INTEGER"),
        NativeField::new("email", "STRING"),
        NativeField::new("tags", "STRING").repeated(),
    ])
    .with_row([
        ("id", Value::Int64(1)),
        ("email", Value::from("ada@example.com")),
        ("tags", Value::Array(vec![Value::from("admin")])),
    ])
    .with_row([("id", Value::Int64(2)), ("email", Value::Null)])
}

#[test]
fn registry_opens_bigquery_connectors() {
    init_test_tracing();

    let registry = DriverRegistry::with_default_drivers();
    let connector = registry
        .open_connector("bigquery://analytics-project?location=US")
        .unwrap();

    assert_eq!(connector.driver().scheme(), "bigquery");

    let err = registry
        .open_connector("snowflake://account/db")
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::DriverNotFound);
}

#[tokio::test]
async fn query_flow_reads_rows_through_generic_contract() {
    init_test_tracing();

    let client = FakeNativeClient::new();
    client.push_ping(Ok(vec!["events".to_string()])).await;
    client.push_read(Ok(users_result_set())).await;

    let cancel = CancellationToken::new();
    let connection = connector(&client, None).connect(&cancel).await.unwrap();
    connection.ping().await.unwrap();

    let mut rows = connection
        .query(
            "SELECT id, email, tags FROM users WHERE id >= ? AND id < ?",
            &positional_args([1i64, 10i64]),
        )
        .await
        .unwrap();

    assert_eq!(rows.columns(), vec!["id", "email", "tags"]);
    assert_eq!(rows.column_type_database_type_name(0), "INTEGER");
    assert_eq!(rows.column_type_database_type_name(2), "ARRAY");

    let mut dest = vec![Value::Null; 3];
    assert!(rows.next(&mut dest).await.unwrap());
    assert_eq!(
        dest,
        vec![
            Value::Int64(1),
            Value::from("ada@example.com"),
            Value::Array(vec![Value::from("admin")]),
        ]
    );

    assert!(rows.next(&mut dest).await.unwrap());
    assert_eq!(dest, vec![Value::Int64(2), Value::Null, Value::Null]);
    assert!(!rows.next(&mut dest).await.unwrap());
    rows.close().await.unwrap();

    let queries = client.queries().await;
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].parameter_mode, Some(ParameterMode::Positional));
    assert_eq!(queries[0].parameters.len(), 2);

    connection.close().await.unwrap();
    assert_eq!(client.close_calls().await, 1);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_exec_is_retried_until_success() {
    init_test_tracing();

    let client = FakeNativeClient::new();
    for _ in 0..2 {
        client
            .push_run(Err(api_error(
                403,
                "rateLimitExceeded",
                "Exceeded rate limits: too many table update operations for this table",
            )))
            .await;
    }
    client
        .push_run(Ok(NativeJobStatus {
            affected_rows: Some(7),
        }))
        .await;

    let cancel = CancellationToken::new();
    let connection = connector(&client, Some(fast_retry(5)))
        .connect(&cancel)
        .await
        .unwrap();

    let result = connection
        .exec(
            "UPDATE users SET active = FALSE WHERE last_seen < @cutoff",
            &[NamedValue::named("cutoff", 1, "2024-01-01")],
        )
        .await
        .unwrap();

    assert_eq!(result.rows_affected().unwrap(), 7);
    assert_eq!(client.run_calls().await, 3);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_return_the_last_error() {
    init_test_tracing();

    let client = FakeNativeClient::new();
    for _ in 0..3 {
        client
            .push_run(Err(api_error(503, "backendError", "Backend error")))
            .await;
    }

    let cancel = CancellationToken::new();
    let connection = connector(&client, Some(fast_retry(2)))
        .connect(&cancel)
        .await
        .unwrap();

    let err = connection
        .exec("DELETE FROM users WHERE TRUE", &[])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::QueryFailed);
    assert_eq!(client.run_calls().await, 3);
}

#[tokio::test]
async fn canceled_connect_does_not_build_a_client() {
    init_test_tracing();

    let client = FakeNativeClient::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = connector(&client, None).connect(&cancel).await.err().unwrap();

    assert_eq!(err.kind(), ErrorKind::OperationCanceled);
}

#[tokio::test]
async fn mid_stream_failures_surface_from_next() {
    init_test_tracing();

    let client = FakeNativeClient::new();
    client
        .push_read(Ok(users_result_set().with_error(api_error(
            500,
            "internalError",
            "Internal error during paging",
        ))))
        .await;

    let cancel = CancellationToken::new();
    let connection = connector(&client, None).connect(&cancel).await.unwrap();
    let mut rows = connection
        .query(
            "SELECT id, email, tags FROM users WHERE id BETWEEN ? AND ?",
            &positional_args([0i64, 100i64]),
        )
        .await
        .unwrap();

    let mut dest = vec![Value::Null; 3];
    assert!(rows.next(&mut dest).await.unwrap());
    assert!(rows.next(&mut dest).await.unwrap());
    let err = rows.next(&mut dest).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::QueryFailed);
}
