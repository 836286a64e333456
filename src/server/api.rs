//! Router construction

use super::handlers::*;
use crate::config::Config;
use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, services::ServeFile};

/// Relay HTTP router
pub struct RelayApi;

impl RelayApi {
    /// Create the router: websocket endpoint, static assets, health and metrics
    pub fn create_router(state: AppState, config: &Config) -> Router {
        let mut routes = Router::new()
            .route(&config.server.ws_path, get(websocket_handler))
            .route("/health", get(health_check));

        if config.monitoring.stats_enabled {
            routes = routes.route("/stats", get(get_stats));
        }

        if config.monitoring.prometheus_enabled {
            routes = routes.route("/metrics", get(export_metrics));
        }

        let mut router = routes.with_state(state);

        if config.assets.enabled {
            router = router
                .route_service("/", ServeFile::new(&config.assets.index_path))
                .route_service("/script.js", ServeFile::new(&config.assets.script_path));
        }

        if config.cors.allow_any_origin {
            router = router.layer(CorsLayer::permissive());
        }

        router
    }
}
