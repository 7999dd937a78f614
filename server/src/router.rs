//! Router composition.

use crate::auth::require_token;
use crate::handlers;
use crate::state::AppState;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Create the relay router with every endpoint.
///
/// # Routes
///
/// ## Push channel
/// - `GET /subscribe/:channel` - Open an SSE session (token-protected when configured)
///
/// ## Ingress
/// - `POST /webhooks/:channel` - Publish a webhook on `channel`
/// - `POST /webhooks/:channel/*path` - Same, keeping the extra path for the target
///
/// ## Probes
/// - `GET /health` - Liveness
/// - `GET /ready` - Readiness
/// - `GET /metrics` - Prometheus metrics
///
/// # Example
///
/// ```rust,ignore
/// let (state, _sessions) = AppState::new(bus, Duration::from_secs(5));
/// let app = relay_router(state);
/// axum::serve(listener, app).await?;
/// ```
pub fn relay_router(state: AppState) -> Router {
    let subscribe = get(handlers::subscribe).route_layer(require_token(state.auth_token.clone()));

    Router::new()
        // Push channel
        .route("/subscribe/:channel", subscribe)
        // Ingress
        .route("/webhooks/:channel", post(handlers::publish))
        .route("/webhooks/:channel/*path", post(handlers::publish))
        // Probes
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/metrics", get(handlers::metrics))
        .layer(DefaultBodyLimit::max(state.max_payload_size))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
