//! Error types for schedule sources.

use std::fmt;
use thiserror::Error;

/// The category of a source error.
///
/// Used by the refresh driver to decide whether to back off and retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceErrorCode {
    /// The upstream could not be reached or the collaborator failed.
    Unavailable,
    /// The collaborator did not answer in time.
    Timeout,
    /// The record could not be parsed or holds values in an unknown format.
    InvalidResponse,
    /// The source is misconfigured (missing program, unreadable path).
    Configuration,
    /// Unexpected internal state.
    Internal,
}

impl SourceErrorCode {
    /// Returns true if this error is transient and the fetch may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable | Self::Timeout)
    }

    /// Returns a stable name for this error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::Timeout => "timeout",
            Self::InvalidResponse => "invalid_response",
            Self::Configuration => "configuration_error",
            Self::Internal => "internal_error",
        }
    }
}

impl fmt::Display for SourceErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An error raised while fetching or interpreting a raw schedule record.
#[derive(Debug, Error)]
pub struct SourceError {
    code: SourceErrorCode,
    message: String,
    source_name: Option<String>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SourceError {
    /// Creates a new source error with the given code and message.
    pub fn new(code: SourceErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source_name: None,
            source: None,
        }
    }

    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(SourceErrorCode::Unavailable, message)
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(SourceErrorCode::Timeout, message)
    }

    /// Creates an invalid response error.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(SourceErrorCode::InvalidResponse, message)
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(SourceErrorCode::Configuration, message)
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(SourceErrorCode::Internal, message)
    }

    /// Sets the name of the source that failed.
    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = Some(name.into());
        self
    }

    /// Sets the underlying cause.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns the error code.
    pub fn code(&self) -> SourceErrorCode {
        self.code
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the source name, if set.
    pub fn source_name(&self) -> Option<&str> {
        self.source_name.as_deref()
    }

    /// Returns true if this error is transient and may be retried.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref name) = self.source_name {
            write!(f, "[{}] ", name)?;
        }
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// A specialized Result type for source operations.
pub type SourceResult<T> = Result<T, SourceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_codes() {
        assert!(SourceErrorCode::Unavailable.is_retryable());
        assert!(SourceErrorCode::Timeout.is_retryable());
        assert!(!SourceErrorCode::InvalidResponse.is_retryable());
        assert!(!SourceErrorCode::Configuration.is_retryable());
        assert!(!SourceErrorCode::Internal.is_retryable());
    }

    #[test]
    fn display_includes_name_and_code() {
        let err = SourceError::timeout("scraper took longer than 120s").with_source_name("dnem");
        assert_eq!(
            err.to_string(),
            "[dnem] timeout: scraper took longer than 120s"
        );
        assert_eq!(err.source_name(), Some("dnem"));
        assert!(err.is_retryable());
    }

    #[test]
    fn keeps_cause() {
        use std::error::Error;
        let io_err = std::io::Error::other("pipe closed");
        let err = SourceError::unavailable("scraper failed").with_source(io_err);
        assert!(err.source().is_some());
        assert_eq!(err.code(), SourceErrorCode::Unavailable);
        assert_eq!(err.message(), "scraper failed");
    }
}
