//! Native client backed by the Google Cloud BigQuery REST API.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use gcp_bigquery_client::Client;
use gcp_bigquery_client::auth::Authenticator;
use gcp_bigquery_client::client_builder::ClientBuilder;
use gcp_bigquery_client::dataset::ListOptions;
use gcp_bigquery_client::error::BQError;
use gcp_bigquery_client::model::get_query_results_parameters::GetQueryResultsParameters;
use gcp_bigquery_client::yup_oauth2::parse_service_account_key;
use secrecy::ExposeSecret;
use tracing::debug;
use warehouse_config::shared::{BigQueryAuth, BigQueryConnectionConfig};

use crate::bigquery::classify::{ApiErrorItem, ApiErrorStatus, TransportFailure};
use crate::bigquery::encoding::{QueryPage, encode_query_request};
use crate::bigquery::native::{
    NativeClient, NativeClientBuilder, NativeJobStatus, NativeQuery, NativeRow, NativeRowIterator,
};
use crate::bigquery::schema::NativeField;
use crate::error::{ErrorKind, WarehouseError, WarehouseResult};
use crate::{bail, warehouse_error};

/// Server-side wait applied to each `jobs.getQueryResults` call while a job is running.
const RESULTS_WAIT_MS: i32 = 10_000;

/// Access token sent when authentication is disabled.
const UNAUTHENTICATED_TOKEN: &str = "unauthenticated";

/// [`Authenticator`] for emulators and local endpoints that accept any bearer token.
#[derive(Debug, Clone, Copy, Default)]
struct NoopAuthenticator;

#[async_trait]
impl Authenticator for NoopAuthenticator {
    async fn access_token(&self) -> Result<String, BQError> {
        Ok(UNAUTHENTICATED_TOKEN.to_string())
    }
}

/// Builds [`GcpNativeClient`]s from connection configurations.
#[derive(Debug, Clone, Copy, Default)]
pub struct GcpClientBuilder;

#[async_trait]
impl NativeClientBuilder for GcpClientBuilder {
    type Client = GcpNativeClient;

    async fn build(&self, config: &BigQueryConnectionConfig) -> WarehouseResult<GcpNativeClient> {
        let mut builder = ClientBuilder::new();
        if let Some(endpoint) = &config.endpoint {
            builder.with_v2_base_url(endpoint.clone());
        }
        if let Some(auth_endpoint) = &config.auth_endpoint {
            builder.with_auth_base_url(auth_endpoint.clone());
        }

        if !config.scopes.is_empty() {
            // The client requests its own BigQuery scope set.
            debug!(scopes = ?config.scopes, "ignoring custom bigquery oauth scopes");
        }

        let client = match &config.auth {
            BigQueryAuth::ServiceAccountKey { key } => {
                let key = parse_service_account_key(key.expose_secret())
                    .map_err(BQError::from)
                    .map_err(bq_error_to_warehouse_error)?;
                builder
                    .build_from_service_account_key(key, false)
                    .await
                    .map_err(bq_error_to_warehouse_error)?
            }
            BigQueryAuth::ServiceAccountKeyFile { path } => {
                let Some(path) = path.to_str() else {
                    bail!(
                        ErrorKind::ConfigError,
                        "Invalid BigQuery service account key path",
                        format!("{} is not valid UTF-8", path.display())
                    );
                };
                builder
                    .build_from_service_account_key_file(path)
                    .await
                    .map_err(bq_error_to_warehouse_error)?
            }
            BigQueryAuth::ApplicationDefault => builder
                .build_from_application_default_credentials()
                .await
                .map_err(bq_error_to_warehouse_error)?,
            BigQueryAuth::Disabled => {
                debug!(endpoint = ?config.endpoint, "building unauthenticated bigquery client");
                builder
                    .build_from_authenticator(Arc::new(NoopAuthenticator))
                    .await
                    .map_err(bq_error_to_warehouse_error)?
            }
        };

        Ok(GcpNativeClient {
            client,
            project_id: config.project_id.clone(),
            location: config.location.clone(),
        })
    }
}

/// [`NativeClient`] issuing jobs through `gcp-bigquery-client`.
#[derive(Clone)]
pub struct GcpNativeClient {
    client: Client,
    project_id: String,
    location: Option<String>,
}

impl GcpNativeClient {
    /// Returns the underlying Google Cloud client.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    async fn submit(&self, query: &NativeQuery) -> WarehouseResult<QueryPage> {
        let request = encode_query_request(query, self.location())?;

        let response = self
            .client
            .job()
            .query(&self.project_id, request)
            .await
            .map_err(bq_error_to_warehouse_error)?;

        Ok(response.into())
    }

    async fn results_page(
        &self,
        job_id: &str,
        location: Option<&str>,
        page_token: Option<&str>,
    ) -> WarehouseResult<QueryPage> {
        let parameters = GetQueryResultsParameters {
            location: location.map(str::to_string),
            page_token: page_token.map(str::to_string),
            timeout_ms: Some(RESULTS_WAIT_MS),
            ..Default::default()
        };

        let response = self
            .client
            .job()
            .get_query_results(&self.project_id, job_id, parameters)
            .await
            .map_err(bq_error_to_warehouse_error)?;

        Ok(response.into())
    }
}

#[async_trait]
impl NativeClient for GcpNativeClient {
    async fn list_datasets(&self, max_results: u32) -> WarehouseResult<Vec<String>> {
        let options = ListOptions::default().max_results(u64::from(max_results));
        let datasets = match self.client.dataset().list(&self.project_id, options).await {
            Ok(datasets) => datasets,
            // The API omits `datasets` for a project without any, which the client cannot decode.
            Err(BQError::RequestError(err)) if err.is_decode() => {
                debug!(project_id = %self.project_id, "bigquery project has no datasets");
                return Ok(Vec::new());
            }
            Err(err) => return Err(bq_error_to_warehouse_error(err)),
        };

        let ids = datasets
            .datasets
            .into_iter()
            .take(max_results as usize)
            .map(|dataset| dataset.dataset_reference.dataset_id)
            .collect();

        Ok(ids)
    }

    async fn read(&self, query: NativeQuery) -> WarehouseResult<Box<dyn NativeRowIterator>> {
        let page = self.submit(&query).await?;

        Ok(Box::new(GcpRowIterator::new(self.clone(), page)))
    }

    async fn run(&self, query: NativeQuery) -> WarehouseResult<NativeJobStatus> {
        let mut page = self.submit(&query).await?;

        while !page.is_complete() {
            let Some(job_id) = page.job_id().map(str::to_string) else {
                bail!(
                    ErrorKind::InvalidState,
                    "BigQuery job is incomplete but has no job id"
                );
            };
            let location = page.job_location().map(str::to_string);

            debug!(%job_id, "waiting for bigquery job to complete");
            page = self
                .results_page(&job_id, location.as_deref(), None)
                .await?;
        }

        Ok(NativeJobStatus {
            affected_rows: page.affected_rows()?,
        })
    }

    async fn close(&self) -> WarehouseResult<()> {
        Ok(())
    }
}

/// Pages through the results of a query job.
///
/// The first page comes with the `jobs.query` response; later pages and the pages of jobs that
/// were still running are fetched with `jobs.getQueryResults`.
pub struct GcpRowIterator {
    client: GcpNativeClient,
    job_id: Option<String>,
    location: Option<String>,
    page_token: Option<String>,
    pending: Option<QueryPage>,
    fields: Option<Vec<NativeField>>,
    buffered: VecDeque<NativeRow>,
    exhausted: bool,
}

impl GcpRowIterator {
    fn new(client: GcpNativeClient, first_page: QueryPage) -> Self {
        Self {
            job_id: first_page.job_id().map(str::to_string),
            location: first_page
                .job_location()
                .map(str::to_string)
                .or_else(|| client.location.clone()),
            client,
            page_token: None,
            pending: Some(first_page),
            fields: None,
            buffered: VecDeque::new(),
            exhausted: false,
        }
    }

    async fn next_page(&mut self) -> WarehouseResult<QueryPage> {
        if let Some(page) = self.pending.take() {
            return Ok(page);
        }

        let Some(job_id) = &self.job_id else {
            bail!(
                ErrorKind::InvalidState,
                "BigQuery results have more pages but no job id"
            );
        };

        self.client
            .results_page(job_id, self.location.as_deref(), self.page_token.as_deref())
            .await
    }
}

#[async_trait]
impl NativeRowIterator for GcpRowIterator {
    async fn next(&mut self) -> WarehouseResult<Option<NativeRow>> {
        loop {
            if let Some(row) = self.buffered.pop_front() {
                return Ok(Some(row));
            }

            if self.exhausted {
                return Ok(None);
            }

            let mut page = self.next_page().await?;
            if !page.is_complete() {
                continue;
            }

            if self.fields.is_none() {
                self.fields = Some(page.fields().unwrap_or_default());
            }
            let fields = self.fields.as_deref().unwrap_or_default();

            self.buffered = page.decode_rows(fields)?;
            self.page_token = page.page_token.take();
            self.exhausted = self.page_token.is_none();
        }
    }

    fn schema(&self) -> Option<Vec<NativeField>> {
        self.fields.clone()
    }
}

/// Converts a `gcp-bigquery-client` error into a [`WarehouseError`].
///
/// API error responses keep their status as an [`ApiErrorStatus`] source and requests that
/// never reached the server carry a [`TransportFailure`], both are read by the retry
/// classifier.
pub fn bq_error_to_warehouse_error(err: BQError) -> WarehouseError {
    let (kind, description) = match &err {
        BQError::InvalidServiceAccountKey(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery service account key",
        ),
        BQError::InvalidServiceAccountAuthenticator(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery service account authenticator",
        ),
        BQError::InvalidApplicationDefaultCredentialsAuthenticator(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery application default credentials",
        ),
        BQError::AuthError(_) | BQError::YupAuthError(_) => (
            ErrorKind::AuthenticationError,
            "BigQuery authentication failed",
        ),
        BQError::NoToken => (
            ErrorKind::AuthenticationError,
            "BigQuery authentication token is missing",
        ),
        BQError::RequestError(request_error) => {
            let error = warehouse_error!(
                ErrorKind::ConnectionFailed,
                "BigQuery request failed",
                err.to_string()
            );

            return if request_error.is_connect() || request_error.is_timeout() {
                error.with_source(TransportFailure {
                    message: request_error.to_string(),
                })
            } else {
                error
            };
        }
        BQError::ResponseError { error } => {
            let status = ApiErrorStatus {
                code: error.error.code,
                items: error
                    .error
                    .errors
                    .iter()
                    .map(|item| ApiErrorItem {
                        reason: item.get("reason").cloned().unwrap_or_default(),
                        message: item.get("message").cloned().unwrap_or_default(),
                    })
                    .collect(),
                message: error.error.message.clone(),
            };

            return warehouse_error!(
                ErrorKind::QueryFailed,
                "BigQuery query failed",
                status.to_string(),
                source: status
            );
        }
        BQError::TonicTransportError(transport_error) => {
            return warehouse_error!(
                ErrorKind::ConnectionFailed,
                "BigQuery storage channel failed",
                err.to_string(),
                source: TransportFailure {
                    message: transport_error.to_string(),
                }
            );
        }
        BQError::SerializationError(_) => (
            ErrorKind::SerializationError,
            "BigQuery response could not be decoded",
        ),
        _ => (ErrorKind::Unknown, "BigQuery client error"),
    };

    warehouse_error!(kind, description, err.to_string())
}
