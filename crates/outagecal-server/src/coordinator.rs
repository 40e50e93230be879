//! Single-flight refresh coordination.
//!
//! A [`RefreshCoordinator`] wraps one fetch pipeline. At most one run of the
//! pipeline is in flight at a time; callers arriving while it runs join its
//! waiter list and all receive the same outcome.
//!
//! ```text
//!   Idle ──request()──▶ InFlight ──fetch resolves──▶ Draining ──▶ Idle
//!                         ▲   │
//!            request() ───┘   └── joins waiter list
//! ```
//!
//! The waiter list and the last-known-good value live behind one mutex. The
//! list is taken out of the state in the same critical section that records
//! the result, so a caller arriving during dispatch sees `Idle` and starts a
//! new run instead of joining one that has already finished.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use outagecal_source::BoxFuture;
use tokio::sync::{Mutex, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Failure delivered to waiters.
#[derive(Debug)]
pub enum RefreshError<E> {
    /// The pipeline returned an error.
    Fetch(Arc<E>),
    /// The pipeline panicked or its task was cancelled.
    Aborted,
}

impl<E> Clone for RefreshError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Fetch(e) => Self::Fetch(Arc::clone(e)),
            Self::Aborted => Self::Aborted,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RefreshError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch(e) => write!(f, "refresh failed: {e}"),
            Self::Aborted => f.write_str("refresh aborted before completion"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RefreshError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Fetch(e) => Some(e.as_ref()),
            Self::Aborted => None,
        }
    }
}

/// What a waiter receives for one run.
#[derive(Debug)]
pub struct RefreshOutcome<T, E> {
    /// The value to serve: the fresh result, the last-known-good value after a
    /// failure, or the failure when nothing has ever succeeded.
    pub served: Result<T, RefreshError<E>>,
    /// Set when this run failed, even if a previous value was served.
    pub failure: Option<RefreshError<E>>,
}

impl<T: Clone, E> Clone for RefreshOutcome<T, E> {
    fn clone(&self) -> Self {
        Self {
            served: self.served.clone(),
            failure: self.failure.clone(),
        }
    }
}

impl<T, E> RefreshOutcome<T, E> {
    /// True when the run succeeded.
    pub fn is_fresh(&self) -> bool {
        self.failure.is_none()
    }
}

/// Counters describing the coordinator's history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshStats {
    /// Pipeline runs started.
    pub runs: u64,
    /// Runs that succeeded.
    pub successes: u64,
    /// Runs that failed.
    pub failures: u64,
    /// Failed runs answered with the last-known-good value.
    pub fallbacks: u64,
    /// Callers that joined an already running pipeline.
    pub joins: u64,
    /// Completion time of the last successful run.
    pub last_success: Option<DateTime<Utc>>,
}

type FetchFn<T, E> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync>;
type Waiter<T, E> = oneshot::Sender<RefreshOutcome<T, E>>;

struct State<T, E> {
    /// `Some` while a run is in flight.
    waiters: Option<Vec<Waiter<T, E>>>,
    last_good: Option<T>,
    stats: RefreshStats,
}

/// Deduplicates concurrent refresh demand for one feed.
pub struct RefreshCoordinator<T, E> {
    name: String,
    fetch: FetchFn<T, E>,
    state: Arc<Mutex<State<T, E>>>,
}

impl<T, E> fmt::Debug for RefreshCoordinator<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<T, E> RefreshCoordinator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: fmt::Display + Send + Sync + 'static,
{
    /// Creates a coordinator around `fetch`.
    pub fn new<F, Fut>(name: impl Into<String>, pipeline: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let fetch: FetchFn<T, E> =
            Arc::new(move || -> BoxFuture<'static, Result<T, E>> { Box::pin(pipeline()) });
        Self {
            name: name.into(),
            fetch,
            state: Arc::new(Mutex::new(State {
                waiters: None,
                last_good: None,
                stats: RefreshStats::default(),
            })),
        }
    }

    /// Name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a fresh result, or the last-known-good one if this run failed.
    ///
    /// Joins the in-flight run if there is one.
    pub async fn request(&self) -> Result<T, RefreshError<E>> {
        self.request_outcome().await.served
    }

    /// Like [`request`](Self::request) but also reports whether the run
    /// itself failed.
    pub async fn request_outcome(&self) -> RefreshOutcome<T, E> {
        let (tx, rx) = oneshot::channel();

        let start = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            match state.waiters.as_mut() {
                Some(waiters) => {
                    waiters.push(tx);
                    state.stats.joins += 1;
                    false
                }
                None => {
                    state.waiters = Some(vec![tx]);
                    state.stats.runs += 1;
                    true
                }
            }
        };

        if start {
            self.spawn_run();
        } else {
            debug!(feed = %self.name, "Joined in-flight refresh");
        }

        rx.await.unwrap_or_else(|_| RefreshOutcome {
            served: Err(RefreshError::Aborted),
            failure: Some(RefreshError::Aborted),
        })
    }

    /// The most recent successful value, without triggering a run.
    pub async fn last_good(&self) -> Option<T> {
        self.state.lock().await.last_good.clone()
    }

    /// True while a run is in flight.
    pub async fn is_refreshing(&self) -> bool {
        self.state.lock().await.waiters.is_some()
    }

    /// Snapshot of the counters.
    pub async fn stats(&self) -> RefreshStats {
        self.state.lock().await.stats.clone()
    }

    fn spawn_run(&self) {
        let fetch = Arc::clone(&self.fetch);
        let state = Arc::clone(&self.state);
        let name = self.name.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            debug!(feed = %name, "Refresh started");

            // Run the pipeline in its own task so a panic resolves the
            // waiters instead of leaving them pending.
            let result = match tokio::spawn(fetch()).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(RefreshError::Fetch(Arc::new(e))),
                Err(join_error) => {
                    error!(feed = %name, error = %join_error, "Refresh task aborted");
                    Err(RefreshError::Aborted)
                }
            };

            let (waiters, outcome) = {
                let mut guard = state.lock().await;
                let state = &mut *guard;
                let waiters = state.waiters.take().unwrap_or_default();
                let outcome = match result {
                    Ok(value) => {
                        state.stats.successes += 1;
                        state.stats.last_success = Some(Utc::now());
                        state.last_good = Some(value.clone());
                        info!(
                            feed = %name,
                            waiters = waiters.len(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Refresh succeeded"
                        );
                        RefreshOutcome {
                            served: Ok(value),
                            failure: None,
                        }
                    }
                    Err(err) => {
                        state.stats.failures += 1;
                        let served = match &state.last_good {
                            Some(previous) => {
                                state.stats.fallbacks += 1;
                                warn!(
                                    feed = %name,
                                    error = %err,
                                    waiters = waiters.len(),
                                    "Refresh failed, serving last known good"
                                );
                                Ok(previous.clone())
                            }
                            None => {
                                error!(
                                    feed = %name,
                                    error = %err,
                                    waiters = waiters.len(),
                                    "Refresh failed with no previous result"
                                );
                                Err(err.clone())
                            }
                        };
                        RefreshOutcome {
                            served,
                            failure: Some(err),
                        }
                    }
                };
                (waiters, outcome)
            };

            for waiter in waiters {
                // A dropped receiver means the caller went away; nothing to do.
                let _ = waiter.send(outcome.clone());
            }
        });
    }
}
