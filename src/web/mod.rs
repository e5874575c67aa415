//! Web server module.

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::db::{IncidentStore, MonitorStore, SampleStore};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub monitors: Arc<dyn MonitorStore>,
    pub samples: Arc<dyn SampleStore>,
    pub incidents: Arc<dyn IncidentStore>,
}

/// Web server exposing monitors, summaries and trends.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(
        config: ServerConfig,
        monitors: Arc<dyn MonitorStore>,
        samples: Arc<dyn SampleStore>,
        incidents: Arc<dyn IncidentStore>,
    ) -> Self {
        Self {
            state: AppState {
                config,
                monitors,
                samples,
                incidents,
            },
        }
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/healthz", get(handlers::handle_healthz))
            // Admin
            .route(
                "/monitors",
                get(handlers::handle_list_monitors).post(handlers::handle_create_monitor),
            )
            .route(
                "/monitors/{id}",
                put(handlers::handle_update_monitor).delete(handlers::handle_delete_monitor),
            )
            .route("/monitors/{id}/samples", post(handlers::handle_ingest_samples))
            .route(
                "/incidents/{id}/notifications",
                get(handlers::handle_list_notifications),
            )
            // Public
            .route("/public/monitors", get(handlers::handle_list_monitors))
            .route("/public/monitors/{id}/summary", get(handlers::handle_summary))
            .route("/public/monitors/{id}/trend", get(handlers::handle_trend))
            .route("/public/status", get(handlers::handle_status))
            .route("/public/incidents/active", get(handlers::handle_active_incidents))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
            .with_state(self.state.clone())
    }

    /// Serve on the configured port until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
