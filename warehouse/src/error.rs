//! Error types and result definitions for warehouse client operations.
//!
//! Every fallible operation in this crate returns a [`WarehouseError`]. Errors carry a
//! [`ErrorKind`] used by callers and by the retry engine to decide how to react, a static
//! description, optional dynamic detail, an optional source error and the callsite where they
//! were created.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use warehouse_config::shared::ValidationError;

/// Convenient result type for warehouse operations.
pub type WarehouseResult<T> = Result<T, WarehouseError>;

/// Categories of failures surfaced by warehouse clients.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Connection Errors
    ConnectionFailed,
    ConnectionClosed,
    BadConnection,

    // Security & Authentication Errors
    AuthenticationError,

    // Configuration Errors
    ConfigError,
    DriverNotFound,

    // Query & Execution Errors
    QueryFailed,
    OperationCanceled,
    NotSupported,

    // Data & Transformation Errors
    ConversionError,
    InvalidData,
    SerializationError,

    // IO Errors
    IoError,

    // State Errors
    InvalidState,

    // Unknown / Uncategorized
    Unknown,
}

/// Main error type for warehouse operations.
///
/// Cloning is cheap: the source and the backtrace are reference counted, which lets scripted
/// failures and buffered row outcomes be handed out more than once.
#[derive(Debug, Clone)]
pub struct WarehouseError {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

impl WarehouseError {
    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the static description of this error.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the dynamic detail attached to this error, if any.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Returns the captured backtrace for this error.
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Returns the callsite where this error was created.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Returns `true` when the error was produced by a cancellation signal.
    pub fn is_canceled(&self) -> bool {
        self.kind == ErrorKind::OperationCanceled
    }

    /// Attaches an originating error and returns the modified instance.
    ///
    /// The stored source is preserved across clones and exposed via [`error::Error::source`],
    /// which is how the error classifier reaches structured API statuses.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
    ) -> Self {
        WarehouseError {
            kind,
            description,
            detail,
            source: None,
            location: Location::caller(),
            backtrace: Arc::new(Backtrace::capture()),
        }
    }
}

impl PartialEq for WarehouseError {
    fn eq(&self, other: &WarehouseError) -> bool {
        self.kind == other.kind
    }
}

impl fmt::Display for WarehouseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = self.location;
        write!(
            f,
            "[{:?}] {} @ {}:{}:{}",
            self.kind,
            self.description,
            location.file(),
            location.line(),
            location.column()
        )?;

        if let Some(detail) = self.detail.as_deref() {
            if detail.trim().is_empty() {
                write!(f, "\n  Detail: <empty>")?;
            } else {
                write!(f, "\n  Detail:")?;
                for line in detail.lines() {
                    write!(f, "\n    {line}")?;
                }
            }
        }

        Ok(())
    }
}

impl error::Error for WarehouseError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|source| source as &(dyn error::Error + 'static))
    }
}

/// Creates a [`WarehouseError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for WarehouseError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> WarehouseError {
        WarehouseError::from_components(kind, Cow::Borrowed(desc), None)
    }
}

/// Creates a [`WarehouseError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for WarehouseError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> WarehouseError {
        WarehouseError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()))
    }
}

/// Converts [`std::io::Error`] to [`WarehouseError`] with [`ErrorKind::IoError`].
impl From<std::io::Error> for WarehouseError {
    #[track_caller]
    fn from(err: std::io::Error) -> WarehouseError {
        WarehouseError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(err.to_string())),
        )
        .with_source(err)
    }
}

/// Converts [`serde_json::Error`] to [`WarehouseError`].
///
/// Syntax and data failures become [`ErrorKind::InvalidData`] since they always come from
/// decoding payloads returned by the warehouse.
impl From<serde_json::Error> for WarehouseError {
    #[track_caller]
    fn from(err: serde_json::Error) -> WarehouseError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => {
                (ErrorKind::InvalidData, "JSON deserialization failed")
            }
        };

        WarehouseError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(err.to_string())),
        )
        .with_source(err)
    }
}

/// Converts configuration [`ValidationError`]s to [`ErrorKind::ConfigError`].
impl From<ValidationError> for WarehouseError {
    #[track_caller]
    fn from(err: ValidationError) -> WarehouseError {
        WarehouseError::from_components(
            ErrorKind::ConfigError,
            Cow::Borrowed("Invalid warehouse configuration"),
            Some(Cow::Owned(err.to_string())),
        )
        .with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;
    use crate::warehouse_error;

    #[test]
    fn test_display_contains_kind_description_and_detail() {
        let err = warehouse_error!(
            ErrorKind::QueryFailed,
            "BigQuery response error",
            "table not found"
        );
        let rendered = err.to_string();

        assert!(rendered.starts_with("[QueryFailed] BigQuery response error @ "));
        assert!(rendered.contains("Detail:\n    table not found"));
    }

    #[test]
    fn test_source_is_downcastable() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let err = WarehouseError::from(io);

        assert_eq!(err.kind(), ErrorKind::IoError);
        let source = err.source().unwrap();
        assert!(source.downcast_ref::<std::io::Error>().is_some());
    }

    #[test]
    fn test_equality_compares_kinds_only() {
        let a = warehouse_error!(ErrorKind::ConfigError, "first");
        let b = warehouse_error!(ErrorKind::ConfigError, "second", "with detail");
        let c = warehouse_error!(ErrorKind::QueryFailed, "first");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_validation_error_becomes_config_error() {
        let err = WarehouseError::from(ValidationError::MissingField("project_id".to_string()));

        assert_eq!(err.kind(), ErrorKind::ConfigError);
        assert!(err.detail().unwrap().contains("project_id"));
    }

    #[test]
    fn test_location_points_at_callsite() {
        let err = warehouse_error!(ErrorKind::Unknown, "somewhere");

        assert_eq!(err.location().file(), file!());
    }
}
