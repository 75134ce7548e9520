use axum::{
    Router,
    extract::FromRef,
    http::{HeaderName, HeaderValue, header},
};
use std::sync::Arc;

use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Request pipeline.
pub mod auth;
pub mod csrf;
pub mod handlers;
pub mod request;
pub mod response;
pub mod router;

// Collaborators and shared building blocks.
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod password;
pub mod repository;
pub mod templates;
pub mod transfer;

// --- Public Re-exports ---

pub use auth::SessionStore;
pub use config::AppConfig;
pub use error::AppError;
pub use repository::{RepositoryState, SqliteRepository};
pub use router::RouterError;
pub use templates::Skins;

/// AppState
///
/// Everything a request needs, built once at startup and shared read-only
/// by every request.
#[derive(Clone)]
pub struct AppState {
    pub repo: RepositoryState,
    pub config: AppConfig,
    pub router: Arc<router::Router>,
    pub sessions: Arc<SessionStore>,
    pub skins: Arc<Skins>,
}

impl AppState {
    /// Builds the router, session store and skin loader from the configuration.
    /// Fails when the URL prefix is unusable.
    pub fn new(repo: RepositoryState, config: AppConfig) -> Result<Self, RouterError> {
        let router = router::Router::new(&config.url_prefix)?;
        Ok(Self {
            repo,
            router: Arc::new(router),
            sessions: Arc::new(SessionStore::new(&config)),
            skins: Arc::new(Skins::new(&config.blog_path, &config.skin)),
            config,
        })
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// create_router
///
/// Wraps the blog's own router in the HTTP service. axum only provides the
/// fallback entry point; all matching happens in [`router::Router`].
pub fn create_router(state: AppState) -> Router {
    let x_request_id = HeaderName::from_static("x-request-id");
    let hsts = hsts_header(&state.config);

    let app = Router::new()
        .fallback(handlers::dispatch)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                // 1. Request ID generation.
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                // 2. One span per request, tagged with the request ID.
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                // 3. Echo the request ID back to the client.
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        );

    // 4. HSTS, only for secure deployments.
    match hsts {
        Some(value) => app.layer(SetResponseHeaderLayer::overriding(
            header::STRICT_TRANSPORT_SECURITY,
            value,
        )),
        None => app,
    }
}

fn hsts_header(config: &AppConfig) -> Option<HeaderValue> {
    if !config.secure || config.hsts_max_age == 0 {
        return None;
    }
    HeaderValue::from_str(&format!("max-age={}", config.hsts_max_age)).ok()
}

/// trace_span_logger
///
/// Span for `TraceLayer`: method, URI and the `x-request-id` header.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
