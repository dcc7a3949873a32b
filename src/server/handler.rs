//! HTTP handlers
//!
//! Routes:
//! - `GET /camera/{id}` streams `multipart/x-mixed-replace` JPEG parts
//! - `GET /snapshot/{id}` returns the latest frame as `image/jpeg`
//! - `GET /health` reports every configured camera
//!
//! Every consumer-facing failure is a `404` with a short plain-text reason.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::media::multipart;
use crate::registry::{SessionRegistry, SourceId};
use crate::session::{ClientSubscription, SubscriptionKind};

use super::config::ServerConfig;

const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    /// Cancelled on server shutdown; ends open streams
    pub shutdown: CancellationToken,
    pub config: Arc<ServerConfig>,
    pub start_time: Instant,
}

/// Build the relay router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/camera/{id}", get(handle_camera))
        .route("/snapshot/{id}", get(handle_snapshot))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn not_found(reason: impl std::fmt::Display) -> Response {
    (StatusCode::NOT_FOUND, reason.to_string()).into_response()
}

/// Per-response state of a multipart stream
struct CameraStream {
    subscription: ClientSubscription,
    cancel: CancellationToken,
    boundary: String,
    /// Frame fetched before the response headers were sent
    pending: Option<Bytes>,
}

impl CameraStream {
    async fn next_part(&mut self) -> Option<Bytes> {
        let frame = match self.pending.take() {
            Some(frame) => frame,
            None => match self.subscription.next_frame(&self.cancel).await {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::info!(
                        source = %self.subscription.session().id(),
                        reason = %e,
                        "Ending camera stream"
                    );
                    return None;
                }
            },
        };

        Some(multipart::encode_part(&self.boundary, &frame))
    }
}

/// `GET /camera/{id}`
pub async fn handle_camera(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = SourceId::new(&id);

    let session = match state.registry.acquire(&id).await {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(source = %id, error = %e, "Camera lookup failed");
            return not_found(e);
        }
    };

    let mut subscription = session.subscribe(SubscriptionKind::Stream).await;
    let cancel = state.shutdown.child_token();

    // Fail with a 404 rather than an empty 200 if the camera never comes up
    let first = match subscription.next_frame(&cancel).await {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(source = %id, error = %e, "Camera stream unavailable");
            return not_found(e);
        }
    };

    tracing::info!(source = %id, clients = session.demand(), "Client streaming");

    let boundary = state.config.boundary.clone();
    let stream = CameraStream {
        subscription,
        cancel,
        boundary: boundary.clone(),
        pending: Some(first),
    };

    // Dropping the body on client disconnect drops the subscription
    let body = futures::stream::unfold(stream, |mut stream| async move {
        let part = stream.next_part().await?;
        Some((Ok::<_, Infallible>(part), stream))
    });

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, multipart::content_type(&boundary)),
            (header::CACHE_CONTROL, NO_CACHE.to_string()),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

/// `GET /snapshot/{id}`
pub async fn handle_snapshot(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = SourceId::new(&id);

    let session = match state.registry.acquire(&id).await {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(source = %id, error = %e, "Camera lookup failed");
            return not_found(e);
        }
    };

    let mut subscription = session.subscribe(SubscriptionKind::Snapshot).await;
    let result = subscription.snapshot(&state.shutdown.child_token()).await;
    subscription.release();

    match result {
        Ok(jpeg) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "image/jpeg"),
                (header::CACHE_CONTROL, NO_CACHE),
            ],
            jpeg,
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(source = %id, error = %e, "Snapshot failed");
            not_found(e)
        }
    }
}

/// `GET /health`
pub async fn handle_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cameras = state.registry.statuses().await;

    Json(serde_json::json!({
        "status": "healthy",
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "cameras": cameras,
    }))
}
