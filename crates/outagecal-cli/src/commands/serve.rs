//! Serve command: runs the HTTP sink in the foreground.
//!
//! - one coordinator per configured feed
//! - a scheduler per feed with `refresh_interval_secs`
//! - SIGHUP refreshes every feed, SIGTERM/SIGINT stop the server

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use outagecal_server::{
    AppState, FeedCoordinator, FeedRegistry, RefreshSignal, Scheduler, SchedulerHandle,
    SignalHandler, build_router, serve,
};

use crate::config::AppConfig;
use crate::error::CliResult;

/// Serves every configured feed until a shutdown signal arrives.
pub async fn run(config: &AppConfig, bind: Option<SocketAddr>) -> CliResult<()> {
    let mut server_config = config.server.to_server_config();
    if let Some(bind) = bind {
        server_config.bind = bind;
    }

    let signals = SignalHandler::new();
    signals.spawn_listener()?;

    let mut registry = FeedRegistry::new();
    for feed_config in &config.feeds {
        registry.insert(feed_config.build_feed()?.into_coordinator())?;
        info!(
            feed = %feed_config.slug,
            region = %feed_config.region,
            timezone = %feed_config.timezone,
            "Feed registered"
        );
    }
    let registry = Arc::new(registry);

    let mut schedulers: Vec<(SchedulerHandle, JoinHandle<()>)> = Vec::new();
    let mut scheduled: BTreeMap<String, SchedulerHandle> = BTreeMap::new();
    for feed_config in &config.feeds {
        let (Some(scheduler_config), Some(coordinator)) = (
            feed_config.scheduler_config(),
            registry.get(&feed_config.slug),
        ) else {
            continue;
        };
        let scheduler = Scheduler::new(&feed_config.slug, scheduler_config);
        let handle = scheduler.handle();
        let task = tokio::spawn(scheduler.run(move || {
            let coordinator = Arc::clone(&coordinator);
            async move { refresh(&coordinator).await }
        }));
        scheduled.insert(feed_config.slug.clone(), handle.clone());
        schedulers.push((handle, task));
    }

    tokio::spawn(refresh_on_signal(
        signals.refresh(),
        Arc::clone(&registry),
        scheduled,
    ));

    let router = build_router(AppState::new(Arc::clone(&registry)));
    serve(&server_config, router, signals.shutdown().wait()).await?;

    info!("Shutting down...");
    for (handle, _) in &schedulers {
        if let Err(e) = handle.stop().await {
            warn!(error = %e, "Failed to send stop command to scheduler");
        }
    }
    let drain = async {
        for (_, task) in schedulers {
            let _ = task.await;
        }
    };
    if tokio::time::timeout(server_config.shutdown_timeout, drain)
        .await
        .is_err()
    {
        warn!("Schedulers did not stop in time");
    }

    info!("Server stopped");
    Ok(())
}

/// One refresh as seen by a scheduler: serving stale data still counts as a
/// failure so the scheduler backs off.
async fn refresh(coordinator: &FeedCoordinator) -> Result<(), String> {
    match coordinator.request_outcome().await.failure {
        Some(err) => Err(err.to_string()),
        None => Ok(()),
    }
}

/// Feeds with a scheduler refresh through it, which restarts its timer and
/// backoff; the rest hit their coordinator directly.
async fn refresh_on_signal(
    mut signal: RefreshSignal,
    registry: Arc<FeedRegistry>,
    scheduled: BTreeMap<String, SchedulerHandle>,
) {
    while signal.changed().await {
        for (slug, coordinator) in registry.iter() {
            let slug = slug.to_string();
            if let Some(handle) = scheduled.get(&slug) {
                let handle = handle.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle.refresh_now().await {
                        warn!(feed = %slug, error = %e, "Scheduler is gone, refresh dropped");
                    }
                });
                continue;
            }
            let coordinator = Arc::clone(coordinator);
            tokio::spawn(async move {
                match refresh(&coordinator).await {
                    Ok(()) => info!(feed = %slug, "Refreshed on request"),
                    Err(e) => warn!(feed = %slug, error = %e, "Requested refresh failed"),
                }
            });
        }
    }
}
