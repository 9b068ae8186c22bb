//! services/app/src/error.rs
//!
//! Defines the primary error type for the entire app service.

use crate::config::ConfigError;
use dao_reader_core::ports::{IdentityError, StoreError};

/// The primary error type for the `app` service.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from the document store port.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Represents an error that propagated up from the identity port.
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Represents an error from the underlying database library.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a failure while applying schema migrations at startup.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Represents a failure while parsing an uploaded corpus file.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Represents a standard Input/Output error (e.g. reading an import file).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A bad command line invocation of an administrative tool.
    #[error("{0}")]
    Usage(String),
}
