//! REST API handlers.
//!
//! Each handler reads/writes via the [`Store`](clustermon_state::Store) and
//! returns JSON responses. Only adding or re-pointing a cluster and fetching
//! a node log talk to a cluster; every other read returns stored state.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use clustermon_client::{
    ClientError, ClusterSession, ConnectError, ConnectionInfo, parse_connection_string,
};
use clustermon_core::password::{hash_password, verify_password};
use clustermon_core::token::{DEFAULT_TOKEN_LIFETIME, issue_token as sign_token};
use clustermon_state::*;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

/// Map a store failure onto a status code.
fn store_error(e: &StateError) -> Response {
    let status = match e {
        StateError::NotFound(_) => StatusCode::NOT_FOUND,
        StateError::AlreadyExists(_) => StatusCode::CONFLICT,
        StateError::InvalidAlias(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status)
}

/// Resolve `id` (uuid or alias) and load the cluster.
fn load_cluster(state: &ApiState, id: &str, sensitive: bool) -> Result<TrackedCluster, Response> {
    let uuid = resolve_cluster_id(state.store.as_ref(), id).map_err(|e| store_error(&e))?;
    state
        .store
        .get_cluster(&uuid, sensitive)
        .map_err(|e| store_error(&e))
}

async fn connect(
    state: &ApiState,
    info: ConnectionInfo,
) -> Result<Box<dyn ClusterSession>, Response> {
    state.connector.connect(&info).await.map_err(|e| {
        warn!(hosts = ?info.hosts, error = %e, "could not connect to cluster");
        let status = match &e {
            ConnectError::InvalidConnectionString(_) | ConnectError::Tls(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::BAD_GATEWAY,
        };
        error_response(&format!("could not establish connection: {e}"), status)
    })
}

fn validate_ca_cert(pem: &str) -> Result<(), Response> {
    let certs: Result<Vec<_>, _> = rustls_pemfile::certs(&mut pem.as_bytes()).collect();
    match certs {
        Ok(certs) if !certs.is_empty() => Ok(()),
        _ => Err(error_response(
            "ca_cert must contain at least one PEM certificate",
            StatusCode::BAD_REQUEST,
        )),
    }
}

fn parse_hosts(host: &str) -> Result<Vec<String>, Response> {
    parse_connection_string(host)
        .map_err(|e| error_response(&e.to_string(), StatusCode::BAD_REQUEST))
}

// ── Self ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct InitState {
    pub initialized: bool,
}

/// GET /api/v1/self
pub async fn get_init_state(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.is_initialized() {
        Ok(initialized) => ApiResponse::ok(InitState { initialized }).into_response(),
        Err(e) => store_error(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

/// POST /api/v1/self
pub async fn initialize(
    State(state): State<ApiState>,
    Json(req): Json<Credentials>,
) -> impl IntoResponse {
    match state.store.is_initialized() {
        Ok(true) => {
            return error_response("already initialized", StatusCode::CONFLICT);
        }
        Ok(false) => {}
        Err(e) => return store_error(&e),
    }
    if req.user.is_empty() || req.password.is_empty() {
        return error_response("user and password are required", StatusCode::BAD_REQUEST);
    }

    let user = User {
        user: req.user,
        password: hash_password(&req.password),
        admin: true,
    };
    match state.store.add_user(&user) {
        Ok(()) => {
            info!(user = %user.user, "initialized with first admin user");
            (
                StatusCode::CREATED,
                ApiResponse::ok(serde_json::json!({ "user": user.user })),
            )
                .into_response()
        }
        Err(e) => store_error(&e),
    }
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub user: String,
    pub expires_at: DateTime<Utc>,
}

/// POST /api/v1/self/token
pub async fn issue_token(
    State(state): State<ApiState>,
    Json(req): Json<Credentials>,
) -> impl IntoResponse {
    let user = match state.store.get_user(&req.user) {
        Ok(user) => user,
        Err(e) if e.is_not_found() => {
            return error_response("invalid user or password", StatusCode::UNAUTHORIZED);
        }
        Err(e) => return store_error(&e),
    };
    if !verify_password(&req.password, &user.password) {
        return error_response("invalid user or password", StatusCode::UNAUTHORIZED);
    }

    let now = Utc::now();
    match sign_token(&state.keys, &user.user, now, DEFAULT_TOKEN_LIFETIME) {
        Ok(token) => ApiResponse::ok(TokenResponse {
            token,
            user: user.user,
            expires_at: now + DEFAULT_TOKEN_LIFETIME,
        })
        .into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

// ── Clusters ───────────────────────────────────────────────────

/// GET /api/v1/clusters
pub async fn list_clusters(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.get_clusters(false, false) {
        Ok(clusters) => ApiResponse::ok(clusters).into_response(),
        Err(e) => store_error(&e),
    }
}

/// GET /api/v1/clusters/{id}
pub async fn get_cluster(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match load_cluster(&state, &id, false) {
        Ok(cluster) => ApiResponse::ok(cluster).into_response(),
        Err(resp) => resp,
    }
}

#[derive(Debug, Deserialize)]
pub struct AddClusterRequest {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub alias: Option<String>,
    pub ca_cert: Option<String>,
}

/// POST /api/v1/clusters
pub async fn add_cluster(
    State(state): State<ApiState>,
    Json(req): Json<AddClusterRequest>,
) -> impl IntoResponse {
    let result = async {
        if req.host.is_empty() || req.user.is_empty() || req.password.is_empty() {
            return Err(error_response(
                "host, user and password are required",
                StatusCode::BAD_REQUEST,
            ));
        }
        if let Some(alias) = &req.alias {
            validate_alias(alias).map_err(|e| store_error(&e))?;
        }
        if let Some(pem) = &req.ca_cert {
            validate_ca_cert(pem)?;
        }
        let hosts = parse_hosts(&req.host)?;

        let info = ConnectionInfo::new(hosts.clone(), req.user.as_str(), req.password.as_str())
            .with_ca_cert(req.ca_cert.clone())
            .with_timeout(state.cluster_timeout);
        let session = connect(&state, info).await?;
        let buckets = session.buckets_summary().await.map_err(|e| {
            error_response(
                &format!("could not get bucket information: {e}"),
                StatusCode::BAD_GATEWAY,
            )
        })?;

        let mut cluster = TrackedCluster {
            uuid: session.cluster_uuid().to_string(),
            name: session.cluster_name().to_string(),
            alias: req.alias.clone(),
            user: req.user.clone(),
            password: req.password.clone(),
            ca_cert: req.ca_cert.clone(),
            enterprise: session.is_enterprise(),
            hosts,
            nodes_summary: session.nodes_summary().to_vec(),
            buckets_summary: buckets,
            cluster_info: Some(session.cluster_info().clone()),
            heart_issue: HeartIssue::None,
            last_update: Utc::now(),
            discovered: false,
        };
        state.store.add_cluster(&cluster).map_err(|e| store_error(&e))?;
        info!(cluster = %cluster.uuid, name = %cluster.name, "cluster added");

        cluster.redact();
        Ok::<_, Response>(cluster)
    }
    .await;

    match result {
        Ok(cluster) => (StatusCode::CREATED, ApiResponse::ok(cluster)).into_response(),
        Err(resp) => resp,
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateClusterRequest {
    pub host: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub ca_cert: Option<String>,
    pub alias: Option<String>,
}

/// PATCH /api/v1/clusters/{id}
///
/// Reconnects with the merged connection details and refuses the update if
/// they now lead to a different cluster.
pub async fn update_cluster(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateClusterRequest>,
) -> impl IntoResponse {
    let result = async {
        if req.host.is_none() && req.user.is_none() && req.password.is_none() && req.ca_cert.is_none()
        {
            return Err(error_response(
                "at least one of host, user, password or ca_cert is required",
                StatusCode::BAD_REQUEST,
            ));
        }
        if let Some(alias) = &req.alias {
            validate_alias(alias).map_err(|e| store_error(&e))?;
        }
        if let Some(pem) = &req.ca_cert {
            validate_ca_cert(pem)?;
        }
        let cluster = load_cluster(&state, &id, true)?;

        let hosts = req.host.as_deref().map(parse_hosts).transpose()?;
        let info = ConnectionInfo::new(
            hosts.clone().unwrap_or_else(|| cluster.connection_hosts()),
            req.user.as_deref().unwrap_or(&cluster.user),
            req.password.as_deref().unwrap_or(&cluster.password),
        )
        .with_ca_cert(req.ca_cert.clone().or_else(|| cluster.ca_cert.clone()))
        .with_timeout(state.cluster_timeout);

        let session = connect(&state, info).await?;
        if session.cluster_uuid() != cluster.uuid {
            return Err(error_response(
                "new cluster information does not point to the same cluster",
                StatusCode::BAD_REQUEST,
            ));
        }

        let update = ClusterUpdate {
            name: Some(session.cluster_name().to_string()),
            alias: req.alias.clone(),
            user: req.user.clone(),
            password: req.password.clone(),
            ca_cert: req.ca_cert.clone(),
            enterprise: Some(session.is_enterprise()),
            hosts,
            nodes_summary: Some(session.nodes_summary().to_vec()),
            cluster_info: Some(session.cluster_info().clone()),
            ..Default::default()
        };
        state
            .store
            .update_cluster(&cluster.uuid, update)
            .map_err(|e| store_error(&e))?;
        info!(cluster = %cluster.uuid, "cluster connection details updated");

        state
            .store
            .get_cluster(&cluster.uuid, false)
            .map_err(|e| store_error(&e))
    }
    .await;

    match result {
        Ok(cluster) => ApiResponse::ok(cluster).into_response(),
        Err(resp) => resp,
    }
}

/// DELETE /api/v1/clusters/{id}
pub async fn delete_cluster(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let uuid = match resolve_cluster_id(state.store.as_ref(), &id) {
        Ok(uuid) => uuid,
        Err(e) => return store_error(&e),
    };
    match state.store.delete_cluster(&uuid) {
        Ok(()) => {
            info!(cluster = %uuid, "cluster deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => store_error(&e),
    }
}

/// Last recorded heartbeat result for a cluster.
#[derive(Debug, Serialize)]
pub struct ClusterStatus {
    pub uuid: ClusterId,
    pub name: String,
    pub nodes_summary: Vec<NodeSummary>,
    pub buckets_summary: Vec<BucketSummary>,
    pub heart_beat_issue: HeartIssue,
    pub heart_beat_description: &'static str,
    pub last_update: DateTime<Utc>,
}

/// GET /api/v1/clusters/{id}/status
pub async fn get_cluster_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match load_cluster(&state, &id, false) {
        Ok(cluster) => ApiResponse::ok(ClusterStatus {
            uuid: cluster.uuid,
            name: cluster.name,
            nodes_summary: cluster.nodes_summary,
            buckets_summary: cluster.buckets_summary,
            heart_beat_issue: cluster.heart_issue,
            heart_beat_description: cluster.heart_issue.description(),
            last_update: cluster.last_update,
        })
        .into_response(),
        Err(resp) => resp,
    }
}

fn find_node(cluster: &TrackedCluster, node: &str) -> Result<NodeSummary, Response> {
    cluster
        .nodes_summary
        .iter()
        .find(|n| n.node_uuid == node)
        .cloned()
        .ok_or_else(|| error_response("node not found", StatusCode::NOT_FOUND))
}

/// GET /api/v1/clusters/{id}/nodes/{node}
pub async fn get_node(
    State(state): State<ApiState>,
    Path((id, node)): Path<(String, String)>,
) -> impl IntoResponse {
    match load_cluster(&state, &id, false).and_then(|cluster| find_node(&cluster, &node)) {
        Ok(node) => ApiResponse::ok(node).into_response(),
        Err(resp) => resp,
    }
}

/// GET /api/v1/clusters/{id}/nodes/{node}/logs/{log}
///
/// Connects to the one node and streams the log back as plain text.
pub async fn get_node_log(
    State(state): State<ApiState>,
    Path((id, node, log)): Path<(String, String, String)>,
) -> impl IntoResponse {
    let result = async {
        let cluster = load_cluster(&state, &id, true)?;
        let node = find_node(&cluster, &node)?;
        let info = ConnectionInfo::new(
            vec![node.host.clone()],
            cluster.user.as_str(),
            cluster.password.as_str(),
        )
        .with_ca_cert(cluster.ca_cert.clone())
        .with_timeout(state.cluster_timeout);

        let session = connect(&state, info).await?;
        session.fetch_log(&log).await.map_err(|e| match e {
            ClientError::NotFound(_) => error_response("log not found", StatusCode::NOT_FOUND),
            e => error_response(&format!("could not fetch log: {e}"), StatusCode::BAD_GATEWAY),
        })
    }
    .await;

    match result {
        Ok(body) => ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response(),
        Err(resp) => resp,
    }
}

// ── Aliases ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AliasRequest {
    pub cluster_uuid: ClusterId,
}

/// POST /api/v1/aliases/{alias}
pub async fn add_alias(
    State(state): State<ApiState>,
    Path(alias): Path<String>,
    Json(req): Json<AliasRequest>,
) -> impl IntoResponse {
    let alias = match ClusterAlias::new(alias, req.cluster_uuid) {
        Ok(alias) => alias,
        Err(e) => return store_error(&e),
    };
    match state.store.add_alias(&alias) {
        Ok(()) => (StatusCode::CREATED, ApiResponse::ok(alias)).into_response(),
        Err(e) => store_error(&e),
    }
}

/// DELETE /api/v1/aliases/{alias}
pub async fn delete_alias(
    State(state): State<ApiState>,
    Path(alias): Path<String>,
) -> impl IntoResponse {
    match state.store.delete_alias(&alias) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => store_error(&e),
    }
}

// ── Cloud credentials ──────────────────────────────────────────

/// GET /api/v1/cloud/credentials
pub async fn list_cloud_credentials(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.get_cloud_credentials(false) {
        Ok(creds) => ApiResponse::ok(creds).into_response(),
        Err(e) => store_error(&e),
    }
}

/// POST /api/v1/cloud/credentials
pub async fn add_cloud_credentials(
    State(state): State<ApiState>,
    Json(creds): Json<CloudCredential>,
) -> impl IntoResponse {
    if creds.name.is_empty() || creds.access_key.is_empty() || creds.secret_key.is_empty() {
        return error_response(
            "name, access_key and secret_key are required",
            StatusCode::BAD_REQUEST,
        );
    }
    match state.store.add_cloud_credentials(&creds) {
        Ok(()) => (
            StatusCode::CREATED,
            ApiResponse::ok(serde_json::json!({ "name": creds.name })),
        )
            .into_response(),
        Err(e) => store_error(&e),
    }
}
