//! clustermon-api: REST API for the cluster monitor.
//!
//! A thin layer over the [`Store`]: reads never probe a cluster, they return
//! whatever the heart monitor last recorded.
//!
//! # API Routes
//!
//! | Method | Path | Group | Description |
//! |---|---|---|---|
//! | GET | `/api/v1/self` | admin | Initialisation state |
//! | POST | `/api/v1/self` | admin | Create the first admin user |
//! | POST | `/api/v1/self/token` | admin | Issue a session token |
//! | GET | `/api/v1/clusters` | cluster | List tracked clusters |
//! | POST | `/api/v1/clusters` | cluster | Connect to and track a cluster |
//! | GET | `/api/v1/clusters/{id}` | cluster | Cluster details (id or alias) |
//! | PATCH | `/api/v1/clusters/{id}` | cluster | Update hosts or credentials |
//! | DELETE | `/api/v1/clusters/{id}` | cluster | Stop tracking a cluster |
//! | GET | `/api/v1/clusters/{id}/status` | cluster | Last heart beat result |
//! | GET | `/api/v1/clusters/{id}/nodes/{node}` | cluster | One node's summary |
//! | GET | `/api/v1/clusters/{id}/nodes/{node}/logs/{log}` | extended | Fetch a node log |
//! | POST | `/api/v1/aliases/{alias}` | extended | Alias a cluster |
//! | DELETE | `/api/v1/aliases/{alias}` | extended | Remove an alias |
//! | GET | `/api/v1/cloud/credentials` | extended | List cloud credentials |
//! | POST | `/api/v1/cloud/credentials` | extended | Store cloud credentials |
//! | GET | `/api/v1/metrics` | always | Prometheus metrics |
//! | GET | `/api/v1/_prometheus` | always | Prometheus metrics |
//!
//! Everything outside `/self` and the metrics routes answers 503 until the
//! first user exists and then requires an `Authorization: Bearer <token>`
//! header.

pub mod auth;
pub mod handlers;
pub mod metrics;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};

use clustermon_client::ClusterConnector;
use clustermon_core::{KeyMaterial, MonitorStats};
use clustermon_state::Store;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn Store>,
    pub connector: Arc<dyn ClusterConnector>,
    /// Keys of the current process run; tokens die with them.
    pub keys: Arc<KeyMaterial>,
    /// Request timeout used when the API itself talks to a cluster.
    pub cluster_timeout: Duration,
    /// Counters published by the heart monitor and discovery.
    pub stats: Arc<MonitorStats>,
}

/// Which route groups to mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteGroups {
    pub admin: bool,
    pub cluster: bool,
    pub extended: bool,
}

impl Default for RouteGroups {
    fn default() -> Self {
        Self {
            admin: true,
            cluster: true,
            extended: true,
        }
    }
}

/// Build the API router.
pub fn build_router(state: ApiState, groups: RouteGroups) -> Router {
    let mut api = Router::new()
        .route("/metrics", get(metrics::prometheus_metrics))
        .route("/_prometheus", get(metrics::prometheus_metrics));

    if groups.admin {
        api = api
            .route("/self", get(handlers::get_init_state).post(handlers::initialize))
            .route("/self/token", post(handlers::issue_token));
    }

    let mut protected = Router::new();
    if groups.cluster {
        protected = protected
            .route("/clusters", get(handlers::list_clusters).post(handlers::add_cluster))
            .route(
                "/clusters/{id}",
                get(handlers::get_cluster)
                    .patch(handlers::update_cluster)
                    .delete(handlers::delete_cluster),
            )
            .route("/clusters/{id}/status", get(handlers::get_cluster_status))
            .route("/clusters/{id}/nodes/{node}", get(handlers::get_node));
    }
    if groups.extended {
        protected = protected
            .route("/clusters/{id}/nodes/{node}/logs/{log}", get(handlers::get_node_log))
            .route(
                "/aliases/{alias}",
                post(handlers::add_alias).delete(handlers::delete_alias),
            )
            .route(
                "/cloud/credentials",
                get(handlers::list_cloud_credentials).post(handlers::add_cloud_credentials),
            );
    }
    if groups.cluster || groups.extended {
        protected = protected.route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ));
    }

    Router::new()
        .nest("/api/v1", api.merge(protected).with_state(state))
        .layer(middleware::from_fn(auth::log_requests))
}
