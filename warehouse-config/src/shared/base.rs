use thiserror::Error;

/// Errors raised while validating or parsing warehouse configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A field holds a value outside of its allowed range.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
    /// A required field is missing.
    #[error("missing required field `{0}`")]
    MissingField(String),
    /// The connection string could not be parsed as a URI.
    #[error("malformed connection uri: {0}")]
    MalformedUri(String),
    /// The connection string uses a scheme other than the expected one.
    #[error("unsupported connection uri scheme `{actual}`, expected `{expected}`")]
    UnsupportedScheme { expected: String, actual: String },
    /// The connection string carries a query parameter that is not recognized.
    #[error("unknown connection uri parameter `{0}`")]
    UnknownParameter(String),
    /// Two or more options that exclude each other were set together.
    #[error("conflicting options: {0}")]
    ConflictingOptions(String),
}
