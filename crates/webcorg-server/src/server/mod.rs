//! HTTP and WebSocket server.
//!
//! One axum router carries the relay socket (`/ws`), the health probe, the
//! admin control surface and the user/history endpoints. Presence lives in
//! the relay; users and history live in the [`PersistenceGateway`].

pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{debug, info, warn, Level};
use webcorg_relay::{ChannelTransport, LifecycleManager, PresenceEvent};

use crate::config::ServerConfig;
use crate::store::PersistenceGateway;

/// The relay as wired into the server.
pub type Relay = LifecycleManager<ChannelTransport>;

/// How long shutdown waits for socket tasks to report their close.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state.
pub struct AppState {
    /// Presence registry and message routing
    pub relay: Arc<Relay>,
    /// Users, history and the admin secret
    pub persistence: Arc<PersistenceGateway>,
    /// Cancelled when the server is shutting down
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        relay: Arc<Relay>,
        persistence: Arc<PersistenceGateway>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            relay,
            persistence,
            shutdown,
        }
    }
}

/// Bind the configured address and serve until `shutdown` is cancelled.
pub async fn start(
    config: ServerConfig,
    persistence: Arc<PersistenceGateway>,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    serve(listener, &config, persistence, shutdown).await
}

/// Serve on an already bound listener until `shutdown` is cancelled.
///
/// On shutdown every live connection is closed, axum drains in-flight
/// requests, and socket tasks get [`DRAIN_TIMEOUT`] to report their close so
/// their leave events reach the last-seen tracker.
pub async fn serve(
    listener: TcpListener,
    config: &ServerConfig,
    persistence: Arc<PersistenceGateway>,
    shutdown: CancellationToken,
) -> Result<()> {
    let transport = Arc::new(ChannelTransport::new(config.outbound_buffer));
    let relay = Arc::new(Relay::with_transport(transport));

    let tracker_stop = CancellationToken::new();
    let tracker = tokio::spawn(track_last_seen(
        relay.subscribe(),
        Arc::clone(&persistence),
        tracker_stop.clone(),
    ));

    let state = Arc::new(AppState::new(
        Arc::clone(&relay),
        persistence,
        shutdown.clone(),
    ));
    let app = create_router(state, config);

    let addr = listener.local_addr()?;
    info!("Starting Axum HTTP server on {}", addr);

    let shutdown_relay = Arc::clone(&relay);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("HTTP server received shutdown signal, draining connections");
            shutdown_relay.shutdown();
        })
        .await?;

    if tokio::time::timeout(DRAIN_TIMEOUT, wait_for_drain(&relay))
        .await
        .is_err()
    {
        warn!(
            remaining = relay.connection_count(),
            "Timed out waiting for connections to close"
        );
    }

    tracker_stop.cancel();
    if let Err(e) = tracker.await {
        warn!(error = %e, "Last-seen tracker task failed");
    }

    info!("HTTP server stopped");
    Ok(())
}

async fn wait_for_drain(relay: &Relay) {
    while relay.connection_count() > 0 {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Refresh a user's `lastSeen` whenever one of their sessions leaves.
///
/// Events already queued when `stop` fires are still applied.
async fn track_last_seen(
    mut events: broadcast::Receiver<PresenceEvent>,
    persistence: Arc<PersistenceGateway>,
    stop: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            event = events.recv() => event,
            _ = stop.cancelled() => break,
        };
        match event {
            Ok(event) => record_leave(&persistence, event).await,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Last-seen tracker lagged behind presence events");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }

    while let Ok(event) = events.try_recv() {
        record_leave(&persistence, event).await;
    }
}

async fn record_leave(persistence: &PersistenceGateway, event: PresenceEvent) {
    let PresenceEvent::Left { identity, cause, .. } = event else {
        return;
    };
    match persistence.touch_last_seen(&identity.email).await {
        Ok(true) => debug!(email = %identity.email, %cause, "Updated last seen"),
        Ok(false) => debug!(email = %identity.email, "Left user has no stored record"),
        Err(e) => warn!(email = %identity.email, error = %e, "Failed to update last seen"),
    }
}

/// Configure CORS layer.
///
/// With explicit origins configured only those are allowed; otherwise CORS
/// is permissive.
fn configure_cors(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let allowed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    if allowed.is_empty() {
        warn!("WEBCORG_CORS_ORIGINS set but no valid origins parsed, falling back to permissive CORS");
        CorsLayer::permissive()
    } else {
        info!(origins = ?allowed, "Configured CORS with explicit allowed origins");
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Create the Axum router with all routes and middleware
pub fn create_router(state: Arc<AppState>, config: &ServerConfig) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .with_state(Arc::clone(&state))
        .merge(routes::websocket::router(Arc::clone(&state)))
        .merge(routes::admin::router(Arc::clone(&state)))
        .merge(routes::users::router(state));

    if let Some(dir) = &config.static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CompressionLayer::new())
        .layer(configure_cors(&config.cors_origins))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    connections: usize,
    online: usize,
}

/// GET /health
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy",
            service: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            connections: state.relay.connection_count(),
            online: state.relay.online_count(),
        }),
    )
}
