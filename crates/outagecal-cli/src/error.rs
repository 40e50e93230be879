//! CLI error types.

use std::io;

use outagecal_core::TracingError;
use outagecal_server::{FeedError, ServerError};
use thiserror::Error;

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

/// Errors surfaced to the user by the `outagecal` binary.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration file missing, unreadable or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The server failed to start or stopped with an error.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// An offline render failed.
    #[error("render failed: {0}")]
    Render(#[from] FeedError),

    /// Logging could not be set up.
    #[error(transparent)]
    Tracing(#[from] TracingError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
