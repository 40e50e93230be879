//! Runtime: single-flight refresh, feed pipeline, HTTP sink.
//!
//! Each configured feed owns one [`RefreshCoordinator`]. Calendar requests
//! arriving while a run is in flight join it; a failed run falls back to the
//! last good calendar when there is one.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use outagecal_server::{AppState, Feed, FeedRegistry, FeedSettings, ServerConfig};
//! use outagecal_source::FileSource;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let feed = Feed::new(
//!         FeedSettings::new("home", "dnem"),
//!         Arc::new(FileSource::new("dtek", "record.json")),
//!     );
//!     let mut feeds = FeedRegistry::new();
//!     feeds.insert(feed.into_coordinator())?;
//!
//!     let router = outagecal_server::build_router(AppState::new(Arc::new(feeds)));
//!     outagecal_server::serve(&ServerConfig::default(), router, std::future::pending()).await?;
//!     Ok(())
//! }
//! ```

mod config;
mod coordinator;
mod error;
mod feed;
mod http;
mod scheduler;
mod signals;

pub use config::{DEFAULT_PORT, ServerConfig};
pub use coordinator::{RefreshCoordinator, RefreshError, RefreshOutcome, RefreshStats};
pub use error::{FeedError, ServerError, ServerResult};
pub use feed::{
    Feed, FeedCoordinator, FeedRegistry, FeedSettings, FeedSnapshot, ShutdownMetadata, etag_for,
};
pub use http::{AppState, build_router, serve};
pub use scheduler::{Scheduler, SchedulerCommand, SchedulerConfig, SchedulerHandle, SchedulerState};
pub use signals::{RefreshSignal, ShutdownHandle, ShutdownSignal, SignalHandler};
