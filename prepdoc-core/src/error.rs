//! Error types and result types for prepared statement operations.
//!
//! Every fallible operation in this crate returns [`QueryResult<T>`]. Compilation
//! errors are raised before any driver call is made; driver failures are carried
//! through as [`QueryError::Driver`].

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors raised while preparing, compiling or executing a statement.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// The template string was empty.
    #[error("Cannot prepare an empty template")]
    EmptyTemplate,
    /// The template is not valid JSON or its top level is not an object.
    #[error("Malformed template: {0}")]
    MalformedTemplate(String),
    /// The number of `"?"` placeholders differs from the number of bindings.
    #[error("Parameter count mismatch: template has {placeholders} placeholders, {bindings} bound")]
    ParameterCountMismatch {
        /// Number of placeholders found in the template.
        placeholders: usize,
        /// Number of bound parameters.
        bindings: usize,
    },
    /// The template carries no `collection` attribute.
    #[error("Invalid query format - no collection found")]
    NoCollection,
    /// A placeholder has no binding under its name.
    #[error("No value bound for placeholder {0}")]
    UnboundPlaceholder(String),
    /// The `$limit` stage could not be resolved to an integer.
    #[error("Invalid $limit value: {0}")]
    InvalidLimit(String),
    /// `distinct()` was called on a template without a `distinct` attribute.
    #[error("Template has no distinct key")]
    MissingDistinctKey,
    /// An update was requested but the template yields no update document.
    #[error("Template has no update document")]
    MissingUpdate,
    /// A bulk execution was requested with no queued operations.
    #[error("No batched operations to execute")]
    EmptyBatch,
    /// The statement has been closed.
    #[error("Prepared statement is closed")]
    Closed,
    /// A value could not be converted between document formats.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// The driver cannot run the requested command.
    #[error("Unsupported: {0}")]
    Unsupported(String),
    /// An error reported by the underlying driver.
    #[error("Driver error: {0}")]
    Driver(String),
}

/// A specialized `Result` type for prepared statement operations.
pub type QueryResult<T> = Result<T, QueryError>;

impl From<SerdeJsonError> for QueryError {
    fn from(err: SerdeJsonError) -> Self {
        QueryError::MalformedTemplate(err.to_string())
    }
}

impl From<BsonError> for QueryError {
    fn from(err: BsonError) -> Self {
        QueryError::Serialization(err.to_string())
    }
}
