use thiserror::Error;

/// Errors raised by a log source collaborator
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("log stream error: {0}")]
    Stream(String),

    #[error("not found: {0}")]
    NotFound(String),
}

/// Errors raised by the log session
#[derive(Debug, Error)]
pub enum LogError {
    #[error("invalid filter expression `{expr}`: {source}")]
    InvalidFilter {
        expr: String,
        #[source]
        source: regex::Error,
    },

    #[error("buffer capacity must be greater than zero")]
    InvalidCapacity,

    #[error("invalid resource path `{0}`")]
    InvalidPath(String),

    #[error("session used before init")]
    NotInitialized,

    #[error(transparent)]
    Source(#[from] SourceError),
}

pub type Result<T, E = LogError> = std::result::Result<T, E>;
