//! HTTP sink.
//!
//! | Route | Response |
//! |---|---|
//! | `GET /health` | `ok` |
//! | `GET /{slug}.ics` | calendar from the feed's coordinator |
//! | `GET /{slug}/shutdown.json` | last known planned shutdown, or `null` |

use std::future::Future;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::feed::FeedRegistry;

const CALENDAR_CONTENT_TYPE: &str = "text/calendar; charset=utf-8";

/// Shared router state.
#[derive(Debug, Clone)]
pub struct AppState {
    feeds: Arc<FeedRegistry>,
}

impl AppState {
    /// Wraps a registry.
    pub fn new(feeds: Arc<FeedRegistry>) -> Self {
        Self { feeds }
    }
}

/// Builds the router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/{file}", get(calendar))
        .route("/{slug}/shutdown.json", get(shutdown_metadata))
        .with_state(state)
}

/// Binds the configured address and serves until `shutdown` resolves.
pub async fn serve<F>(config: &ServerConfig, router: Router, shutdown: F) -> ServerResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(config.bind)
        .await
        .map_err(|e| ServerError::bind(config.bind, e))?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn calendar(State(state): State<AppState>, Path(file): Path<String>) -> Response {
    let Some(slug) = file.strip_suffix(".ics") else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(feed) = state.feeds.get(slug) else {
        debug!(feed = slug, "Unknown feed requested");
        return StatusCode::NOT_FOUND.into_response();
    };

    match feed.request().await {
        Ok(snapshot) => {
            let mut response = snapshot.body.clone().into_response();
            let headers = response.headers_mut();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(CALENDAR_CONTENT_TYPE),
            );
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            if let Ok(etag) = HeaderValue::from_str(&snapshot.etag) {
                headers.insert(header::ETAG, etag);
            }
            response
        }
        Err(err) => {
            warn!(feed = slug, error = %err, "Serving refresh error");
            (StatusCode::BAD_GATEWAY, format!("{err}\n")).into_response()
        }
    }
}

async fn shutdown_metadata(State(state): State<AppState>, Path(slug): Path<String>) -> Response {
    let Some(feed) = state.feeds.get(&slug) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let metadata = feed
        .last_good()
        .await
        .and_then(|snapshot| snapshot.shutdown.clone());
    Json(metadata).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::tests::static_feed;
    use crate::feed::{Feed, FeedSettings};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use outagecal_source::{ErrorSource, SourceError};
    use tower::ServiceExt;

    fn app(feeds: Vec<Feed>) -> (Router, Arc<FeedRegistry>) {
        let mut registry = FeedRegistry::new();
        for feed in feeds {
            registry.insert(feed.into_coordinator()).unwrap();
        }
        let registry = Arc::new(registry);
        (build_router(AppState::new(Arc::clone(&registry))), registry)
    }

    fn failing_feed(slug: &str) -> Feed {
        Feed::new(
            FeedSettings::new(slug, "dnem"),
            Arc::new(ErrorSource::new(
                "scraper",
                SourceError::unavailable("page did not load"),
            )),
        )
    }

    async fn get(router: &Router, uri: &str) -> Response {
        router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (router, _) = app(vec![]);
        let response = get(&router, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok");
    }

    #[tokio::test]
    async fn serves_calendar() {
        let (router, _) = app(vec![static_feed("home")]);
        let response = get(&router, "/home.ics").await;

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], CALENDAR_CONTENT_TYPE);
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        let etag = headers[header::ETAG].to_str().unwrap().to_string();
        assert!(etag.starts_with('"') && etag.ends_with('"'));

        let body = body_text(response).await;
        assert!(body.starts_with("BEGIN:VCALENDAR\r\n"));
        assert!(body.ends_with("END:VCALENDAR\r\n"));
    }

    #[tokio::test]
    async fn unknown_feed_is_not_found() {
        let (router, _) = app(vec![static_feed("home")]);
        assert_eq!(get(&router, "/other.ics").await.status(), StatusCode::NOT_FOUND);
        assert_eq!(get(&router, "/home").await.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            get(&router, "/other/shutdown.json").await.status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn first_failure_is_bad_gateway_with_detail() {
        let (router, _) = app(vec![failing_feed("down")]);
        let response = get(&router, "/down.ics").await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_text(response).await;
        assert!(body.contains("page did not load"), "body: {body}");
    }

    #[tokio::test]
    async fn shutdown_metadata_comes_from_last_good() {
        let (router, _) = app(vec![static_feed("home")]);

        let before = get(&router, "/home/shutdown.json").await;
        assert_eq!(before.status(), StatusCode::OK);
        assert_eq!(body_text(before).await, "null");

        assert_eq!(get(&router, "/home.ics").await.status(), StatusCode::OK);

        let after = get(&router, "/home/shutdown.json").await;
        let json: serde_json::Value = serde_json::from_str(&body_text(after).await).unwrap();
        assert_eq!(json["feed"], "home");
        assert_eq!(json["reason"], "Планові ремонтні роботи");
    }

    #[tokio::test]
    async fn feeds_are_independent() {
        let (router, registry) = app(vec![static_feed("home"), failing_feed("down")]);
        assert_eq!(get(&router, "/down.ics").await.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(get(&router, "/home.ics").await.status(), StatusCode::OK);
        assert!(registry.get("down").unwrap().last_good().await.is_none());
        assert!(registry.get("home").unwrap().last_good().await.is_some());
    }
}
