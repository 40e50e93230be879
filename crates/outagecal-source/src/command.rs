//! Source running the external scraper program.
//!
//! The program is expected to print a single JSON record on stdout and exit
//! with status 0. Anything on stderr is only used for error messages.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{SourceError, SourceResult};
use crate::raw::RawScheduleRecord;
use crate::source::{BoxFuture, ScheduleSource};

/// Default time allowed for one scraper run. Upstream pages can be slow to
/// settle under load.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(180);

const STDERR_EXCERPT: usize = 512;

/// Runs a program and parses its stdout as a raw record.
#[derive(Debug, Clone)]
pub struct CommandSource {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
    timeout: Duration,
}

impl CommandSource {
    /// Creates a source running `program` with no arguments.
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Builder method to set arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Builder method to add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Builder method to set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn run(&self) -> SourceResult<RawScheduleRecord> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            program = %self.program.display(),
            args = ?self.args,
            timeout_secs = self.timeout.as_secs(),
            "Running schedule scraper"
        );

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(result) => result.map_err(|e| self.spawn_error(e))?,
            Err(_) => {
                return Err(SourceError::timeout(format!(
                    "{} did not finish within {:?}",
                    self.program.display(),
                    self.timeout
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let excerpt = excerpt(stderr.trim());
            warn!(status = %output.status, stderr = %excerpt, "Schedule scraper failed");
            return Err(SourceError::unavailable(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                excerpt
            )));
        }

        let stdout = String::from_utf8(output.stdout).map_err(|e| {
            SourceError::invalid_response("scraper output is not valid UTF-8").with_source(e)
        })?;
        if stdout.trim().is_empty() {
            return Err(SourceError::invalid_response("scraper printed nothing"));
        }
        RawScheduleRecord::from_json(&stdout)
    }

    fn spawn_error(&self, e: std::io::Error) -> SourceError {
        let message = format!("failed to run {}: {e}", self.program.display());
        let err = match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                SourceError::configuration(message)
            }
            _ => SourceError::unavailable(message),
        };
        err.with_source(e)
    }
}

impl ScheduleSource for CommandSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self) -> BoxFuture<'_, SourceResult<RawScheduleRecord>> {
        Box::pin(async move { self.run().await.map_err(|e| e.with_source_name(&self.name)) })
    }
}

fn excerpt(text: &str) -> &str {
    if text.len() <= STDERR_EXCERPT {
        return text;
    }
    let mut end = STDERR_EXCERPT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SourceErrorCode;

    const RECORD: &str =
        r#"{ "group": 3.1, "schedule": { "updatedAt": "01.01.2024 08:00", "days": [] } }"#;

    fn shell(name: &str, script: &str) -> CommandSource {
        CommandSource::new(name, "sh").with_args(["-c", script])
    }

    #[tokio::test]
    async fn parses_stdout() {
        let source = shell("scraper", &format!("printf '%s' '{RECORD}'"));
        let record = source.fetch().await.unwrap();
        assert_eq!(record.group.label(), "3.1");
    }

    #[tokio::test]
    async fn passes_environment() {
        let source = shell("scraper", r#"printf '{ "group": %s, "schedule": { "updatedAt": "01.01.2024 08:00" } }' "$GROUP""#)
            .with_env("GROUP", "5");
        let record = source.fetch().await.unwrap();
        assert_eq!(record.group.label(), "5");
    }

    #[tokio::test]
    async fn non_zero_exit_is_unavailable() {
        let source = shell("scraper", "echo 'page did not load' >&2; exit 3");
        let err = source.fetch().await.unwrap_err();
        assert_eq!(err.code(), SourceErrorCode::Unavailable);
        assert!(err.message().contains("page did not load"));
        assert_eq!(err.source_name(), Some("scraper"));
    }

    #[tokio::test]
    async fn slow_program_times_out() {
        let source = shell("scraper", "sleep 5").with_timeout(Duration::from_millis(200));
        let err = source.fetch().await.unwrap_err();
        assert_eq!(err.code(), SourceErrorCode::Timeout);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn missing_program_is_configuration() {
        let source = CommandSource::new("scraper", "/nonexistent/outagecal-scraper");
        let err = source.fetch().await.unwrap_err();
        assert_eq!(err.code(), SourceErrorCode::Configuration);
    }

    #[tokio::test]
    async fn empty_output_is_invalid() {
        let err = shell("scraper", "true").fetch().await.unwrap_err();
        assert_eq!(err.code(), SourceErrorCode::InvalidResponse);
    }

    #[test]
    fn excerpt_respects_char_boundaries() {
        let long = "ї".repeat(STDERR_EXCERPT);
        let cut = excerpt(&long);
        assert!(cut.len() <= STDERR_EXCERPT);
        assert!(cut.chars().all(|c| c == 'ї'));
        assert_eq!(excerpt("short"), "short");
    }
}
