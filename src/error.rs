use thiserror::Error;

/// Distributor error types
#[derive(Error, Debug)]
pub enum DistributorError {
    #[error("duplicate key at index {index}")]
    Duplicate { index: usize },

    #[error("keys out of lexicographic order at index {index}")]
    NotSorted { index: usize },

    #[error("key at index {index} is a prefix of its successor")]
    NotPrefixFree { index: usize },

    #[error("temporary file I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("static function construction failed: {0}")]
    StaticFunction(String),
}

pub type Result<T> = std::result::Result<T, DistributorError>;
