//! Source reading a record written to disk by an external job.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{SourceError, SourceResult};
use crate::raw::RawScheduleRecord;
use crate::source::{BoxFuture, ScheduleSource};

/// Reads the raw JSON record from a file on every fetch.
#[derive(Debug, Clone)]
pub struct FileSource {
    name: String,
    path: PathBuf,
}

impl FileSource {
    /// Creates a source for `path`.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// The file being read.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> SourceResult<RawScheduleRecord> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| {
                let message = format!("failed to read {}: {e}", self.path.display());
                let err = match e.kind() {
                    // The writer may not have produced the file yet.
                    ErrorKind::NotFound => SourceError::unavailable(message),
                    _ => SourceError::configuration(message),
                };
                err.with_source(e)
            })?;
        debug!(path = %self.path.display(), bytes = contents.len(), "Read schedule record");
        RawScheduleRecord::from_json(&contents)
    }
}

impl ScheduleSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self) -> BoxFuture<'_, SourceResult<RawScheduleRecord>> {
        Box::pin(async move { self.read().await.map_err(|e| e.with_source_name(&self.name)) })
    }
}
