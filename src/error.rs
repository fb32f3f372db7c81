//! Error types for the navigation pipeline.
//!
//! Only configuration and backend-construction problems are fatal. Transient
//! input absence and match failures are not errors at all: they surface as
//! `None` or as skipped cycles.

use thiserror::Error;

/// Errors reported by `visnav` components.
#[derive(Error, Debug)]
pub enum NavError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unsupported coordinate reference system: {0}")]
    UnsupportedCrs(String),

    #[error("could not construct pose estimator '{backend}': {reason}")]
    EstimatorConstruction { backend: String, reason: String },

    #[error("map fetch failed: {0}")]
    MapFetch(String),

    #[error("estimation worker error: {0}")]
    Worker(String),

    #[error("wire protocol error: {0}")]
    Wire(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NavError {
    pub fn construction(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        NavError::EstimatorConstruction {
            backend: backend.into(),
            reason: reason.into(),
        }
    }
}

impl From<postcard::Error> for NavError {
    fn from(e: postcard::Error) -> Self {
        NavError::Wire(e.to_string())
    }
}

impl From<toml::de::Error> for NavError {
    fn from(e: toml::de::Error) -> Self {
        NavError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NavError>;
