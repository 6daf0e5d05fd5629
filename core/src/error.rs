//! Error types for dataset discovery and scanning.

use arrow::error::ArrowError;
use parquet::errors::ParquetError;
use strata_common::CommonError;
use thiserror::Error;

/// Errors raised while discovering, planning or scanning a dataset.
#[derive(Error, Debug)]
pub enum DatasetError {
    /// A partition path segment or partition value could not be parsed.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Two schemas disagree on a field in a way nullability widening cannot fix.
    #[error("Schema conflict: {0}")]
    SchemaConflict(String),

    /// Expression operands have incomparable or unexpected types.
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// A filter or projection references a column that does not exist.
    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// The filesystem failed to list, open or read a file.
    #[error("IO failure: {0}")]
    IoFailure(#[from] CommonError),

    /// No file format claims a file.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),

    #[error("Internal error: {0}")]
    Internal(String),

    /// A failure while scanning one fragment.
    #[error(transparent)]
    Fragment(Box<FragmentError>),
}

/// Result type alias for dataset operations.
pub type DatasetResult<T> = std::result::Result<T, DatasetError>;

/// A scan failure tagged with the fragment it came from.
#[derive(Error, Debug)]
#[error("fragment '{path}': {error}")]
pub struct FragmentError {
    pub path: String,
    #[source]
    pub error: DatasetError,
}

impl FragmentError {
    pub fn new(path: impl Into<String>, error: DatasetError) -> Self {
        Self {
            path: path.into(),
            error,
        }
    }
}

impl From<FragmentError> for DatasetError {
    fn from(error: FragmentError) -> Self {
        DatasetError::Fragment(Box::new(error))
    }
}
