//! Classification of BigQuery failures into rate limits, transient and permanent errors.
//!
//! BigQuery does not signal throttling consistently. Besides HTTP 429 and the dedicated
//! `rateLimitExceeded`/`quotaExceeded` reasons, some table-level limits come back as
//! `400 invalidQuery` and can only be told apart from real query errors by their message. When
//! no structured status is available the error text itself is scanned.

use std::error::Error;
use std::fmt;

use crate::error::WarehouseError;
use crate::retry::{ErrorClass, ErrorClassifier};

/// Reasons that always denote throttling when paired with a 403 or 429 status.
const RATE_LIMIT_REASONS: [&str; 3] = [
    "rateLimitExceeded",
    "quotaExceeded",
    "jobRateLimitExceeded",
];

/// Reasons reported for server-side failures that are expected to clear on their own.
const TRANSIENT_REASONS: [&str; 2] = ["backendError", "internalError"];

/// Lowercase fragments found in throttling messages.
///
/// The reason spellings at the end cover API errors that were turned into plain text before
/// reaching the classifier.
const RATE_LIMIT_PHRASES: [&str; 8] = [
    "too many table update operations",
    "too many dml statements",
    "exceeded rate limits",
    "quota exceeded",
    "rate limit exceeded",
    "ratelimitexceeded",
    "quotaexceeded",
    "jobratelimitexceeded",
];

/// One entry of the `errors` list of a BigQuery API error response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiErrorItem {
    pub reason: String,
    pub message: String,
}

/// Structured status of a failed BigQuery API call.
///
/// Native failures carry one of these as their source so that the classifier does not have to
/// parse error text when the server told us exactly what went wrong.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiErrorStatus {
    /// HTTP status code.
    pub code: i64,
    pub items: Vec<ApiErrorItem>,
    pub message: String,
}

impl ApiErrorStatus {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            items: Vec::new(),
            message: message.into(),
        }
    }

    pub fn with_item(mut self, reason: impl Into<String>, message: impl Into<String>) -> Self {
        self.items.push(ApiErrorItem {
            reason: reason.into(),
            message: message.into(),
        });
        self
    }

    /// Returns `true` when any item carries `reason`.
    pub fn has_reason(&self, reason: &str) -> bool {
        self.items.iter().any(|item| item.reason == reason)
    }

    fn is_rate_limit(&self) -> bool {
        if self.code == 429 {
            return true;
        }

        self.items.iter().any(|item| match self.code {
            403 => RATE_LIMIT_REASONS.contains(&item.reason.as_str()),
            400 if item.reason == "invalidQuery" => {
                contains_rate_limit_phrase(&item.message)
                    || contains_rate_limit_phrase(&self.message)
            }
            _ => false,
        })
    }

    fn is_transient(&self) -> bool {
        (500..600).contains(&self.code)
            || self
                .items
                .iter()
                .any(|item| TRANSIENT_REASONS.contains(&item.reason.as_str()))
    }
}

impl fmt::Display for ApiErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bigquery api error {}: {}", self.code, self.message)?;
        for item in &self.items {
            write!(f, ", {}: {}", item.reason, item.message)?;
        }

        Ok(())
    }
}

impl Error for ApiErrorStatus {}

/// Marker source for requests that never got an answer from the server, such as connection
/// failures and timeouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    pub message: String,
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bigquery transport failure: {}", self.message)
    }
}

impl Error for TransportFailure {}

/// Returns the structured API status carried in the source chain of `error`, if any.
pub fn api_error_status(error: &WarehouseError) -> Option<&ApiErrorStatus> {
    sources(error).find_map(|source| source.downcast_ref::<ApiErrorStatus>())
}

/// Returns `true` when `error` denotes throttling by BigQuery.
pub fn is_rate_limit_error(error: &WarehouseError) -> bool {
    match api_error_status(error) {
        Some(status) => status.is_rate_limit(),
        None => contains_rate_limit_phrase(&error_text(error)),
    }
}

/// Returns `true` when retrying `error` may succeed.
pub fn is_retryable_error(error: &WarehouseError) -> bool {
    classify_error(error).is_retryable()
}

/// Classifies `error` for the retry engine.
pub fn classify_error(error: &WarehouseError) -> ErrorClass {
    if error.is_canceled() {
        return ErrorClass::Permanent;
    }

    if is_rate_limit_error(error) {
        return ErrorClass::RateLimit;
    }

    let transient = api_error_status(error).is_some_and(ApiErrorStatus::is_transient)
        || sources(error).any(|source| source.is::<TransportFailure>());

    if transient {
        ErrorClass::Transient
    } else {
        ErrorClass::Permanent
    }
}

/// [`ErrorClassifier`] implementing the BigQuery retry rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct BigQueryErrorClassifier;

impl ErrorClassifier for BigQueryErrorClassifier {
    fn classify(&self, error: &WarehouseError) -> ErrorClass {
        classify_error(error)
    }
}

fn contains_rate_limit_phrase(text: &str) -> bool {
    let text = text.to_lowercase();
    RATE_LIMIT_PHRASES.iter().any(|phrase| text.contains(phrase))
}

fn sources(error: &WarehouseError) -> impl Iterator<Item = &(dyn Error + 'static)> {
    std::iter::successors(error.source(), |source: &&(dyn Error + 'static)| (*source).source())
}

/// Description, detail and every source message, without location or backtrace noise.
fn error_text(error: &WarehouseError) -> String {
    let mut text = error.description().to_string();
    if let Some(detail) = error.detail() {
        text.push('\n');
        text.push_str(detail);
    }

    for source in sources(error) {
        text.push('\n');
        text.push_str(&source.to_string());
    }

    text
}
