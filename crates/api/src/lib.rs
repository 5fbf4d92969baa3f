//! Service shell for the command engine.
//!
//! Runs the [`Engine`] and exposes health, Prometheus metrics and the
//! remote wait-notification callback over HTTP, with structured logging
//! (tracing) throughout.

pub mod config;
pub mod engine;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use messaging::WaitStrategyRegistrar;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{Config, LogFormat};
pub use engine::Engine;
pub use error::{ApiError, Result};

/// Creates the Axum application router.
pub fn create_app(registrar: Arc<WaitStrategyRegistrar>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/command/wait", post(routes::wait::notify))
        .with_state(registrar)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
