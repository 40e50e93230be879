//! Server error types.

use std::io;
use std::net::SocketAddr;

use outagecal_core::CalendarError;
use outagecal_source::SourceError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// IO error while serving.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Two feeds share a slug.
    #[error("duplicate feed slug: {slug}")]
    DuplicateFeed { slug: String },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl ServerError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a bind error.
    pub fn bind(addr: SocketAddr, source: io::Error) -> Self {
        Self::Bind { addr, source }
    }
}

/// Failure of one run of a feed pipeline.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Fetching or interpreting the raw record failed.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The calendar could not be built from the normalized schedule.
    #[error("calendar build failed: {0}")]
    Calendar(#[from] CalendarError),
}

impl FeedError {
    /// True if retrying soon may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Source(e) => e.is_retryable(),
            Self::Calendar(_) => false,
        }
    }
}
