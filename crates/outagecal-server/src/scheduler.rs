//! Periodic refresh driver.
//!
//! Keeps a feed's last-known-good snapshot warm between client polls:
//! - jittered interval between runs
//! - exponential backoff while runs keep failing
//! - on-demand runs through [`SchedulerHandle::refresh_now`]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Base interval between refreshes.
    pub refresh_interval: Duration,
    /// Maximum jitter added to or removed from the interval (fraction 0.0-1.0).
    pub jitter_fraction: f64,
    /// Delay after the first failure.
    pub initial_backoff: Duration,
    /// Upper bound for the backoff delay.
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub backoff_multiplier: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30 * 60),
            jitter_fraction: 0.1,
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(15 * 60),
            backoff_multiplier: 2.0,
        }
    }
}

impl SchedulerConfig {
    /// Creates a config refreshing every `refresh_interval`.
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            refresh_interval,
            ..Default::default()
        }
    }

    /// Builder: set jitter fraction.
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    /// Builder: set backoff parameters.
    pub fn with_backoff(mut self, initial: Duration, max: Duration, multiplier: f64) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self.backoff_multiplier = multiplier;
        self
    }

    /// Next delay after a successful run.
    pub fn next_refresh_delay(&self) -> Duration {
        let base = self.refresh_interval.as_secs_f64();
        let jitter = rand_jitter(base * self.jitter_fraction);
        Duration::from_secs_f64((base + jitter).max(0.0))
    }

    /// Delay after `consecutive_failures` failed runs in a row.
    pub fn backoff_delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(consecutive_failures - 1).unwrap_or(i32::MAX);
        let delay = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let max = self.max_backoff.as_secs_f64();

        Duration::from_secs_f64(delay.min(max))
    }
}

/// Value in [-range, range] derived from the clock's sub-second nanos.
fn rand_jitter(range: f64) -> f64 {
    use std::time::SystemTime;

    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();

    let fraction = f64::from(nanos) / 1_000_000_000.0;
    (fraction * 2.0 - 1.0) * range
}

/// Commands accepted by a running scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerCommand {
    /// Run immediately.
    RefreshNow,
    /// Leave the loop.
    Stop,
}

/// Bookkeeping shared between the loop and its handles.
#[derive(Debug, Clone, Default)]
pub struct SchedulerState {
    /// Failed runs since the last success.
    pub consecutive_failures: u32,
    /// Total runs started.
    pub runs: u64,
    /// Last successful run.
    pub last_success: Option<DateTime<Utc>>,
    /// Last run, successful or not.
    pub last_attempt: Option<DateTime<Utc>>,
    /// Message of the last failure, cleared on success.
    pub last_error: Option<String>,
}

impl SchedulerState {
    /// Records a successful run.
    pub fn record_success(&mut self) {
        let now = Utc::now();
        self.runs += 1;
        self.consecutive_failures = 0;
        self.last_success = Some(now);
        self.last_attempt = Some(now);
        self.last_error = None;
    }

    /// Records a failed run.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.runs += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_attempt = Some(Utc::now());
        self.last_error = Some(error.into());
    }
}

type SharedState = Arc<RwLock<SchedulerState>>;

/// Drives one refresh function on a timer.
pub struct Scheduler {
    name: String,
    config: SchedulerConfig,
    state: SharedState,
    command_tx: mpsc::Sender<SchedulerCommand>,
    command_rx: mpsc::Receiver<SchedulerCommand>,
}

impl Scheduler {
    /// Creates a scheduler; `name` only labels log lines.
    pub fn new(name: impl Into<String>, config: SchedulerConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(8);
        Self {
            name: name.into(),
            config,
            state: SharedState::default(),
            command_tx,
            command_rx,
        }
    }

    /// Returns a handle for sending commands to the scheduler.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            command_tx: self.command_tx.clone(),
            state: Arc::clone(&self.state),
        }
    }

    /// Runs until [`SchedulerCommand::Stop`] arrives or every handle is gone.
    ///
    /// The first run starts immediately. `refresh_fn` reports failure as a
    /// message, which only feeds logging and backoff.
    pub async fn run<F, Fut>(self, refresh_fn: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send,
    {
        let Self {
            name,
            config,
            state,
            command_tx,
            mut command_rx,
        } = self;
        // Only handles keep the channel open from here on.
        drop(command_tx);

        info!(
            feed = %name,
            interval_secs = config.refresh_interval.as_secs(),
            "Scheduler started"
        );

        run_once(&name, &state, &refresh_fn).await;

        loop {
            let delay = next_delay(&config, &*state.read().await);
            debug!(feed = %name, delay_secs = delay.as_secs(), "Scheduling next refresh");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    run_once(&name, &state, &refresh_fn).await;
                }
                cmd = command_rx.recv() => match cmd {
                    Some(SchedulerCommand::RefreshNow) => {
                        debug!(feed = %name, "Refresh requested");
                        run_once(&name, &state, &refresh_fn).await;
                    }
                    Some(SchedulerCommand::Stop) | None => {
                        info!(feed = %name, "Scheduler stopping");
                        break;
                    }
                },
            }
        }
    }
}

fn next_delay(config: &SchedulerConfig, state: &SchedulerState) -> Duration {
    if state.consecutive_failures > 0 {
        let backoff = config.backoff_delay(state.consecutive_failures);
        debug!(
            failures = state.consecutive_failures,
            backoff_secs = backoff.as_secs(),
            "Using backoff delay"
        );
        return backoff;
    }
    config.next_refresh_delay()
}

async fn run_once<F, Fut>(name: &str, state: &SharedState, refresh_fn: &F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<(), String>>,
{
    match refresh_fn().await {
        Ok(()) => {
            debug!(feed = %name, "Scheduled refresh succeeded");
            state.write().await.record_success();
        }
        Err(e) => {
            warn!(feed = %name, error = %e, "Scheduled refresh failed");
            state.write().await.record_failure(e);
        }
    }
}

/// Handle for sending commands to a running scheduler.
#[derive(Clone, Debug)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    state: SharedState,
}

impl SchedulerHandle {
    /// Asks for an immediate run.
    pub async fn refresh_now(&self) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.command_tx.send(SchedulerCommand::RefreshNow).await
    }

    /// Stops the scheduler.
    pub async fn stop(&self) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.command_tx.send(SchedulerCommand::Stop).await
    }

    /// Snapshot of the current state.
    pub async fn state(&self) -> SchedulerState {
        self.state.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    type Ready = std::future::Ready<Result<(), String>>;

    /// Counts calls; the first `fail_first` of them fail.
    fn counting(count: Arc<AtomicU32>, fail_first: u32) -> impl Fn() -> Ready + Send + Sync {
        move || {
            let n = count.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if n < fail_first {
                Err(format!("failure {n}"))
            } else {
                Ok(())
            })
        }
    }

    #[test]
    fn config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.refresh_interval, Duration::from_secs(1800));
        assert!(config.jitter_fraction > 0.0);
    }

    #[test]
    fn jitter_stays_in_range() {
        let config = SchedulerConfig::new(Duration::from_secs(60)).with_jitter(0.1);
        for _ in 0..20 {
            let delay = config.next_refresh_delay().as_secs_f64();
            assert!((54.0..=66.0).contains(&delay), "delay {delay}");
        }
        let exact = SchedulerConfig::new(Duration::from_secs(60)).with_jitter(0.0);
        assert_eq!(exact.next_refresh_delay(), Duration::from_secs(60));
    }

    #[test]
    fn jitter_is_clamped() {
        assert_eq!(SchedulerConfig::default().with_jitter(3.0).jitter_fraction, 1.0);
        assert_eq!(SchedulerConfig::default().with_jitter(-1.0).jitter_fraction, 0.0);
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let config = SchedulerConfig::default().with_backoff(
            Duration::from_secs(5),
            Duration::from_secs(300),
            2.0,
        );

        assert_eq!(config.backoff_delay(0), Duration::ZERO);
        assert_eq!(config.backoff_delay(1), Duration::from_secs(5));
        assert_eq!(config.backoff_delay(2), Duration::from_secs(10));
        assert_eq!(config.backoff_delay(3), Duration::from_secs(20));
        assert_eq!(config.backoff_delay(10), Duration::from_secs(300));
        assert_eq!(config.backoff_delay(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn state_bookkeeping() {
        let mut state = SchedulerState::default();
        state.record_failure("scraper exited 1");
        state.record_failure("scraper exited 1");
        assert_eq!(state.consecutive_failures, 2);
        assert_eq!(state.last_error.as_deref(), Some("scraper exited 1"));
        assert!(state.last_success.is_none());

        state.record_success();
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.runs, 3);
        assert!(state.last_error.is_none());
        assert_eq!(state.last_success, state.last_attempt);
    }

    #[tokio::test(start_paused = true)]
    async fn runs_immediately_then_on_interval() {
        let config = SchedulerConfig::new(Duration::from_secs(60)).with_jitter(0.0);
        let scheduler = Scheduler::new("home", config);
        let handle = scheduler.handle();
        let count = Arc::new(AtomicU32::new(0));
        let task = tokio::spawn(scheduler.run(counting(Arc::clone(&count), 0)));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        handle.stop().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_now_runs_out_of_band() {
        let config = SchedulerConfig::new(Duration::from_secs(3600)).with_jitter(0.0);
        let scheduler = Scheduler::new("home", config);
        let handle = scheduler.handle();
        let count = Arc::new(AtomicU32::new(0));
        let task = tokio::spawn(scheduler.run(counting(Arc::clone(&count), 0)));

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.refresh_now().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(handle.state().await.runs, 2);

        handle.stop().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn backs_off_then_recovers() {
        let config = SchedulerConfig::new(Duration::from_secs(3600))
            .with_jitter(0.0)
            .with_backoff(Duration::from_secs(10), Duration::from_secs(100), 2.0);
        let scheduler = Scheduler::new("down", config);
        let handle = scheduler.handle();
        let count = Arc::new(AtomicU32::new(0));
        let task = tokio::spawn(scheduler.run(counting(Arc::clone(&count), 3)));

        // Failures at t=0, 10, 30; success at t=70.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.state().await.consecutive_failures, 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(handle.state().await.consecutive_failures, 3);

        tokio::time::sleep(Duration::from_secs(40)).await;
        let state = handle.state().await;
        assert_eq!(count.load(Ordering::SeqCst), 4);
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.last_success.is_some());

        handle.stop().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn stops_when_handles_are_dropped() {
        let scheduler = Scheduler::new("home", SchedulerConfig::default());
        let count = Arc::new(AtomicU32::new(0));
        tokio::time::timeout(
            Duration::from_secs(5),
            scheduler.run(counting(Arc::clone(&count), 0)),
        )
        .await
        .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
