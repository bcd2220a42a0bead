use std::path::PathBuf;

use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

use crate::shared::{RetryConfig, ValidationError};

/// Connection string scheme registered for BigQuery.
pub const BIGQUERY_SCHEME: &str = "bigquery";

/// How a BigQuery connection authenticates against Google Cloud.
///
/// This intentionally does not implement [`serde::Serialize`] to avoid leaking the inline key.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BigQueryAuth {
    /// Inline service account key in JSON form.
    ServiceAccountKey { key: SecretString },
    /// Path to a service account key file.
    ServiceAccountKeyFile { path: PathBuf },
    /// Application default credentials from the environment.
    #[default]
    ApplicationDefault,
    /// No authentication, used against emulators.
    Disabled,
}

/// Options used to open a BigQuery connection.
///
/// This intentionally does not implement [`serde::Serialize`] to avoid accidentally
/// leaking secrets in the config into serialized forms.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BigQueryConnectionConfig {
    /// Google Cloud project that owns the jobs.
    pub project_id: String,
    /// Location where query jobs run, for example `US` or `europe-west1`.
    #[serde(default)]
    pub location: Option<String>,
    /// Authentication method.
    #[serde(default)]
    pub auth: BigQueryAuth,
    /// OAuth scopes requested for the connection.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Override for the BigQuery REST API base URL.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Override for the OAuth token endpoint, used together with emulators.
    #[serde(default)]
    pub auth_endpoint: Option<String>,
    /// Retry policy for transient failures. When absent every call is attempted exactly once.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl BigQueryConnectionConfig {
    /// Creates a configuration for `project_id` using application default credentials.
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            location: None,
            auth: BigQueryAuth::default(),
            scopes: Vec::new(),
            endpoint: None,
            auth_endpoint: None,
            retry: None,
        }
    }

    /// Parses a connection string of the form `bigquery://<project>[/<location>]?<params>`.
    ///
    /// Recognized parameters are `scopes` (comma separated), `endpoint`, `auth_endpoint`,
    /// `disable_auth`, `credentials_file`, `credentials_json` and `location`.
    pub fn from_uri(uri: &str) -> Result<Self, ValidationError> {
        let url = Url::parse(uri).map_err(|err| ValidationError::MalformedUri(err.to_string()))?;

        if url.scheme() != BIGQUERY_SCHEME {
            return Err(ValidationError::UnsupportedScheme {
                expected: BIGQUERY_SCHEME.to_string(),
                actual: url.scheme().to_string(),
            });
        }

        let project_id = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| ValidationError::MissingField("project_id".to_string()))?;

        let mut config = BigQueryConnectionConfig::new(project_id);

        let path_location = url.path().trim_matches('/');
        if !path_location.is_empty() {
            config.location = Some(path_location.to_string());
        }

        let mut disable_auth = false;
        let mut credentials_file = None;
        let mut credentials_json = None;

        for (key, value) in url.query_pairs() {
            match &*key {
                "scopes" => {
                    config.scopes = value
                        .split(',')
                        .map(str::trim)
                        .filter(|scope| !scope.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                "endpoint" => config.endpoint = Some(value.into_owned()),
                "auth_endpoint" => config.auth_endpoint = Some(value.into_owned()),
                "disable_auth" => disable_auth = parse_bool("disable_auth", &value)?,
                "credentials_file" => credentials_file = Some(PathBuf::from(value.into_owned())),
                "credentials_json" => credentials_json = Some(value.into_owned()),
                "location" => {
                    if config.location.is_some() {
                        return Err(ValidationError::ConflictingOptions(
                            "location is set both in the uri path and as a parameter".to_string(),
                        ));
                    }
                    config.location = Some(value.into_owned());
                }
                other => return Err(ValidationError::UnknownParameter(other.to_string())),
            }
        }

        config.auth = match (disable_auth, credentials_file, credentials_json) {
            (false, None, None) => BigQueryAuth::ApplicationDefault,
            (true, None, None) => BigQueryAuth::Disabled,
            (false, Some(path), None) => BigQueryAuth::ServiceAccountKeyFile { path },
            (false, None, Some(key)) => BigQueryAuth::ServiceAccountKey {
                key: SecretString::new(key),
            },
            _ => {
                return Err(ValidationError::ConflictingOptions(
                    "only one of `disable_auth`, `credentials_file` and `credentials_json` \
                     can be set"
                        .to_string(),
                ));
            }
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates the connection configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.project_id.trim().is_empty() {
            return Err(ValidationError::MissingField("project_id".to_string()));
        }

        for (field, value) in [
            ("endpoint", &self.endpoint),
            ("auth_endpoint", &self.auth_endpoint),
        ] {
            if let Some(value) = value {
                Url::parse(value).map_err(|err| ValidationError::InvalidFieldValue {
                    field: field.to_string(),
                    constraint: format!("must be an absolute url ({err})"),
                })?;
            }
        }

        if matches!(self.auth, BigQueryAuth::Disabled) && self.endpoint.is_none() {
            return Err(ValidationError::InvalidFieldValue {
                field: "auth".to_string(),
                constraint: "disabling authentication requires an `endpoint` override".to_string(),
            });
        }

        if let Some(retry) = &self.retry {
            retry.validate()?;
        }

        Ok(())
    }
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ValidationError::InvalidFieldValue {
            field: field.to_string(),
            constraint: format!("expected a boolean, got `{value}`"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn test_from_uri_with_project_only() {
        let config = BigQueryConnectionConfig::from_uri("bigquery://my-project").unwrap();

        assert_eq!(config.project_id, "my-project");
        assert!(config.location.is_none());
        assert!(matches!(config.auth, BigQueryAuth::ApplicationDefault));
        assert!(config.scopes.is_empty());
        assert!(config.retry.is_none());
    }

    #[test]
    fn test_from_uri_with_all_parameters() {
        let config = BigQueryConnectionConfig::from_uri(
            "bigquery://my-project/EU?scopes=https://a.example/s1,%20https://a.example/s2\
             &endpoint=http://localhost:9050&credentials_file=/etc/sa.json",
        )
        .unwrap();

        assert_eq!(config.location.as_deref(), Some("EU"));
        assert_eq!(
            config.scopes,
            vec!["https://a.example/s1", "https://a.example/s2"]
        );
        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:9050"));
        assert!(matches!(
            config.auth,
            BigQueryAuth::ServiceAccountKeyFile { ref path }
                if path == &PathBuf::from("/etc/sa.json")
        ));
    }

    #[test]
    fn test_from_uri_with_inline_credentials() {
        let config = BigQueryConnectionConfig::from_uri(
            "bigquery://p?credentials_json=%7B%22type%22%3A%22service_account%22%7D",
        )
        .unwrap();

        match config.auth {
            BigQueryAuth::ServiceAccountKey { key } => {
                assert_eq!(key.expose_secret(), r#"{"type":"service_account"}"#)
            }
            other => panic!("unexpected auth {other:?}"),
        }
    }

    #[test]
    fn test_from_uri_disable_auth_requires_endpoint() {
        let err =
            BigQueryConnectionConfig::from_uri("bigquery://p?disable_auth=true").unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidFieldValue { ref field, .. } if field == "auth"
        ));

        let config = BigQueryConnectionConfig::from_uri(
            "bigquery://p?disable_auth=true&endpoint=http://localhost:9050",
        )
        .unwrap();
        assert!(matches!(config.auth, BigQueryAuth::Disabled));
    }

    #[test]
    fn test_from_uri_rejects_wrong_scheme() {
        let err = BigQueryConnectionConfig::from_uri("snowflake://account").unwrap_err();

        assert_eq!(
            err,
            ValidationError::UnsupportedScheme {
                expected: "bigquery".to_string(),
                actual: "snowflake".to_string(),
            }
        );
    }

    #[test]
    fn test_from_uri_rejects_malformed_input() {
        assert!(matches!(
            BigQueryConnectionConfig::from_uri("not a uri"),
            Err(ValidationError::MalformedUri(_))
        ));
        assert!(matches!(
            BigQueryConnectionConfig::from_uri("bigquery:///EU"),
            Err(ValidationError::MissingField(_))
        ));
    }

    #[test]
    fn test_from_uri_rejects_unknown_parameter() {
        let err = BigQueryConnectionConfig::from_uri("bigquery://p?dataset=x").unwrap_err();

        assert_eq!(err, ValidationError::UnknownParameter("dataset".to_string()));
    }

    #[test]
    fn test_from_uri_rejects_conflicting_credentials() {
        let err = BigQueryConnectionConfig::from_uri(
            "bigquery://p?credentials_file=/a.json&credentials_json=%7B%7D",
        )
        .unwrap_err();

        assert!(matches!(err, ValidationError::ConflictingOptions(_)));
    }

    #[test]
    fn test_from_uri_rejects_bad_boolean() {
        let err =
            BigQueryConnectionConfig::from_uri("bigquery://p?disable_auth=maybe").unwrap_err();

        assert!(matches!(
            err,
            ValidationError::InvalidFieldValue { ref field, .. } if field == "disable_auth"
        ));
    }

    #[test]
    fn test_deserialize_config() {
        let config: BigQueryConnectionConfig = serde_json::from_str(
            r#"{
                "project_id": "p",
                "auth": {"service_account_key_file": {"path": "/sa.json"}},
                "retry": {"max_retries": 5}
            }"#,
        )
        .unwrap();

        assert!(matches!(config.auth, BigQueryAuth::ServiceAccountKeyFile { .. }));
        assert_eq!(config.retry.map(|retry| retry.max_retries), Some(5));
    }
}
