use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SiltError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("SQL error: {0}")]
    Sql(String),

    #[error("query returned {0} rows where at most one was expected")]
    Cardinality(usize),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("subscription error: {0}")]
    Subscription(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SiltError>;

impl SiltError {
    /// Wrap this error with additional context, prepended to the message.
    pub fn context(self, msg: impl Into<String>) -> Self {
        SiltError::Internal(format!("{}: {}", msg.into(), self))
    }
}
