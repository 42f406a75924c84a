//! Core error taxonomy.
//!
//! The library distinguishes four failure classes: invalid input rejected
//! before any provider call, external provider failures, document-store
//! failures, and malformed structured output during process decomposition.
//! Retrieval-tier failures never surface here — each tier is skipped on
//! error inside the search engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed caller input, rejected before any provider call.
    #[error("validation error: {0}")]
    Validation(String),

    /// Embedding or completion provider failure.
    #[error("provider error: {0}")]
    Provider(String),

    /// Document store failure. Fatal for the current request.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Malformed structured output while decomposing a document into steps.
    /// Recovered locally with a generic skeleton; callers outside the
    /// guided engine should never observe this variant.
    #[error("decomposition error: {0}")]
    Decomposition(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Error::Provider(msg.into())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Provider(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
