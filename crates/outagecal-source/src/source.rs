//! The [`ScheduleSource`] trait.
//!
//! A source hands back one [`RawScheduleRecord`] per call. Sources never
//! cache; deduplication of concurrent fetches happens in the refresh
//! coordinator.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{SourceError, SourceResult};
use crate::raw::RawScheduleRecord;

/// A boxed future for object-safe async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Produces raw schedule records for one address.
///
/// ```ignore
/// struct Scraper { program: PathBuf }
///
/// impl ScheduleSource for Scraper {
///     fn name(&self) -> &str { "scraper" }
///
///     fn fetch(&self) -> BoxFuture<'_, SourceResult<RawScheduleRecord>> {
///         Box::pin(async move {
///             let stdout = run(&self.program).await?;
///             RawScheduleRecord::from_json(&stdout)
///         })
///     }
/// }
/// ```
pub trait ScheduleSource: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Fetches a fresh record.
    ///
    /// # Errors
    ///
    /// Returns a retryable [`SourceError`] when the collaborator could not be
    /// reached or timed out, and a non-retryable one when its output does not
    /// parse.
    fn fetch(&self) -> BoxFuture<'_, SourceResult<RawScheduleRecord>>;
}

impl<S: ScheduleSource + ?Sized> ScheduleSource for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch(&self) -> BoxFuture<'_, SourceResult<RawScheduleRecord>> {
        (**self).fetch()
    }
}

/// A source that always returns the same record.
#[derive(Debug, Clone)]
pub struct StaticSource {
    name: String,
    record: RawScheduleRecord,
}

impl StaticSource {
    /// Creates a source serving `record`.
    pub fn new(name: impl Into<String>, record: RawScheduleRecord) -> Self {
        Self {
            name: name.into(),
            record,
        }
    }
}

impl ScheduleSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self) -> BoxFuture<'_, SourceResult<RawScheduleRecord>> {
        let record = self.record.clone();
        Box::pin(async move { Ok(record) })
    }
}

/// A source that always fails.
///
/// Stands in for a source that could not be constructed, so the feed still
/// answers with a descriptive error.
#[derive(Debug)]
pub struct ErrorSource {
    name: String,
    error: SourceError,
}

impl ErrorSource {
    /// Creates a new error source.
    pub fn new(name: impl Into<String>, error: SourceError) -> Self {
        Self {
            name: name.into(),
            error,
        }
    }
}

impl ScheduleSource for ErrorSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self) -> BoxFuture<'_, SourceResult<RawScheduleRecord>> {
        let error =
            SourceError::new(self.error.code(), self.error.message()).with_source_name(&self.name);
        Box::pin(async move { Err(error) })
    }
}
