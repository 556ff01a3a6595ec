//! Router tests driven through `tower::ServiceExt::oneshot` against an
//! in-memory store and scripted cluster connector.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use clustermon_api::{ApiState, RouteGroups, build_router};
use clustermon_client::ConnectError;
use clustermon_client::testing::{FakeCluster, Outcome, StaticConnector};
use clustermon_core::{KeyMaterial, MonitorStats, SweepReport};
use clustermon_state::{BucketSummary, NodeSummary, StateStore, Store};

const HOST: &str = "http://10.0.0.1:8091";
const OTHER_HOST: &str = "http://10.0.0.2:8091";

fn prod_cluster() -> FakeCluster {
    FakeCluster::new("uuid-prod", "prod")
        .with_node(NodeSummary {
            node_uuid: "n1".to_string(),
            host: HOST.to_string(),
            version: "7.2.0".to_string(),
            ..Default::default()
        })
        .with_bucket(BucketSummary {
            name: "beer-sample".to_string(),
            bucket_type: "couchbase".to_string(),
            ..Default::default()
        })
        .with_log("debug", "first line\nsecond line\n")
}

struct Harness {
    router: Router,
    store: StateStore,
    connector: Arc<StaticConnector>,
    stats: Arc<MonitorStats>,
}

fn harness_with(groups: RouteGroups) -> Harness {
    let store = StateStore::open_in_memory().unwrap();
    let connector = Arc::new(
        StaticConnector::new().with_host(HOST, Outcome::Connect(prod_cluster())),
    );
    let stats = Arc::new(MonitorStats::new());
    let state = ApiState {
        store: Arc::new(store.clone()),
        connector: connector.clone(),
        keys: Arc::new(KeyMaterial::generate(b"api-test-secret").unwrap()),
        cluster_timeout: Duration::from_secs(5),
        stats: stats.clone(),
    };
    Harness {
        router: build_router(state, groups),
        store,
        connector,
        stats,
    }
}

fn harness() -> Harness {
    harness_with(RouteGroups::default())
}

async fn send(
    router: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let resp = router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

/// Initialise with an admin user and return a session token.
async fn login(router: &Router) -> String {
    let creds = json!({ "user": "admin", "password": "hunter22" });
    let (status, _) = send(router, "POST", "/api/v1/self", None, Some(creds.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(router, "POST", "/api/v1/self/token", None, Some(creds)).await;
    assert_eq!(status, StatusCode::OK);
    body["data"]["token"].as_str().unwrap().to_string()
}

async fn add_prod(router: &Router, token: &str, alias: Option<&str>) -> (StatusCode, Value) {
    let mut req = json!({ "host": "10.0.0.1", "user": "Administrator", "password": "password" });
    if let Some(alias) = alias {
        req["alias"] = json!(alias);
    }
    send(router, "POST", "/api/v1/clusters", Some(token), Some(req)).await
}

// ── Initialisation & auth ──────────────────────────────────────

#[tokio::test]
async fn uninitialized_monitor_rejects_cluster_routes() {
    let h = harness();

    let (status, body) = send(&h.router, "GET", "/api/v1/self", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["initialized"], false);

    let (status, body) = send(&h.router, "GET", "/api/v1/clusters", None, None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn first_admin_can_only_be_created_once() {
    let h = harness();
    let _token = login(&h.router).await;

    let (status, body) = send(&h.router, "GET", "/api/v1/self", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["initialized"], true);

    let again = json!({ "user": "mallory", "password": "x" });
    let (status, _) = send(&h.router, "POST", "/api/v1/self", None, Some(again)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(h.store.get_user("mallory").is_err());
}

#[tokio::test]
async fn stored_password_is_hashed() {
    let h = harness();
    login(&h.router).await;

    let user = h.store.get_user("admin").unwrap();
    assert!(user.admin);
    assert_ne!(user.password, "hunter22");
}

#[tokio::test]
async fn token_requires_correct_password() {
    let h = harness();
    login(&h.router).await;

    let wrong = json!({ "user": "admin", "password": "nope" });
    let (status, _) = send(&h.router, "POST", "/api/v1/self/token", None, Some(wrong)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let unknown = json!({ "user": "ghost", "password": "hunter22" });
    let (status, _) = send(&h.router, "POST", "/api/v1/self/token", None, Some(unknown)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn cluster_routes_require_a_valid_token() {
    let h = harness();
    let token = login(&h.router).await;

    let (status, _) = send(&h.router, "GET", "/api/v1/clusters", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&h.router, "GET", "/api/v1/clusters", Some("admin.1.abcd"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&h.router, "GET", "/api/v1/clusters", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn tokens_do_not_survive_new_key_material() {
    let h = harness();
    let token = login(&h.router).await;

    // Same store, fresh keys: what a restart looks like.
    let restarted = build_router(
        ApiState {
            store: Arc::new(h.store.clone()),
            connector: h.connector.clone(),
            keys: Arc::new(KeyMaterial::generate(b"api-test-secret").unwrap()),
            cluster_timeout: Duration::from_secs(5),
            stats: h.stats.clone(),
        },
        RouteGroups::default(),
    );
    let (status, _) = send(&restarted, "GET", "/api/v1/clusters", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ── Clusters ───────────────────────────────────────────────────

#[tokio::test]
async fn add_cluster_validates_input() {
    let h = harness();
    let token = login(&h.router).await;

    let missing = json!({ "host": "10.0.0.1", "user": "Administrator" });
    let (status, _) = send(&h.router, "POST", "/api/v1/clusters", Some(&token), Some(missing)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = add_prod(&h.router, &token, Some("prod")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let bad_cert = json!({
        "host": "10.0.0.1", "user": "u", "password": "p", "ca_cert": "not a certificate"
    });
    let (status, _) = send(&h.router, "POST", "/api/v1/clusters", Some(&token), Some(bad_cert)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(h.connector.calls(), 0);
}

#[tokio::test]
async fn add_cluster_connects_and_stores_snapshot() {
    let h = harness();
    let token = login(&h.router).await;

    let (status, body) = add_prod(&h.router, &token, Some("grp_prod")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["uuid"], "uuid-prod");
    assert_eq!(body["data"]["alias"], "grp_prod");
    assert!(body["data"].get("password").is_none());

    let stored = h.store.get_cluster("uuid-prod", true).unwrap();
    assert_eq!(stored.name, "prod");
    assert_eq!(stored.hosts, vec![HOST.to_string()]);
    assert_eq!(stored.password, "password");
    assert_eq!(stored.buckets_summary[0].name, "beer-sample");

    let (status, body) = send(&h.router, "GET", "/api/v1/clusters/grp_prod", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["uuid"], "uuid-prod");
    assert!(body["data"].get("user").is_none());
}

#[tokio::test]
async fn add_cluster_twice_conflicts() {
    let h = harness();
    let token = login(&h.router).await;

    assert_eq!(add_prod(&h.router, &token, None).await.0, StatusCode::CREATED);
    assert_eq!(add_prod(&h.router, &token, None).await.0, StatusCode::CONFLICT);
}

#[tokio::test]
async fn add_cluster_reports_connection_failures() {
    let h = harness();
    let token = login(&h.router).await;

    let unreachable = json!({ "host": "10.9.9.9", "user": "u", "password": "p" });
    let (status, body) =
        send(&h.router, "POST", "/api/v1/clusters", Some(&token), Some(unreachable)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("could not establish connection"));

    h.connector.set_host(
        OTHER_HOST,
        Outcome::Fail(ConnectError::Authentication("401".to_string())),
    );
    let bad_auth = json!({ "host": "10.0.0.2", "user": "u", "password": "wrong" });
    let (status, _) = send(&h.router, "POST", "/api/v1/clusters", Some(&token), Some(bad_auth)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    assert!(h.store.get_clusters(false, false).unwrap().is_empty());
}

#[tokio::test]
async fn unknown_cluster_is_not_found() {
    let h = harness();
    let token = login(&h.router).await;

    for uri in [
        "/api/v1/clusters/nope",
        "/api/v1/clusters/grp_nope",
        "/api/v1/clusters/nope/status",
    ] {
        let (status, _) = send(&h.router, "GET", uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
    }
}

#[tokio::test]
async fn patch_requires_connection_details() {
    let h = harness();
    let token = login(&h.router).await;
    add_prod(&h.router, &token, None).await;

    let (status, _) = send(
        &h.router,
        "PATCH",
        "/api/v1/clusters/uuid-prod",
        Some(&token),
        Some(json!({ "alias": "grp_prod" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &h.router,
        "PATCH",
        "/api/v1/clusters/missing",
        Some(&token),
        Some(json!({ "password": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn patch_rejects_hosts_of_another_cluster() {
    let h = harness();
    let token = login(&h.router).await;
    add_prod(&h.router, &token, None).await;

    h.connector.set_host(
        OTHER_HOST,
        Outcome::Connect(FakeCluster::new("uuid-other", "other")),
    );
    let (status, body) = send(
        &h.router,
        "PATCH",
        "/api/v1/clusters/uuid-prod",
        Some(&token),
        Some(json!({ "host": "10.0.0.2" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("same cluster"));

    let stored = h.store.get_cluster("uuid-prod", true).unwrap();
    assert_eq!(stored.hosts, vec![HOST.to_string()]);
}

#[tokio::test]
async fn patch_merges_credentials_and_alias() {
    let h = harness();
    let token = login(&h.router).await;
    add_prod(&h.router, &token, None).await;

    let (status, body) = send(
        &h.router,
        "PATCH",
        "/api/v1/clusters/uuid-prod",
        Some(&token),
        Some(json!({ "password": "rotated", "alias": "grp_main" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["alias"], "grp_main");

    let stored = h.store.get_cluster("uuid-prod", true).unwrap();
    assert_eq!(stored.password, "rotated");
    assert_eq!(stored.user, "Administrator");
    assert_eq!(h.store.get_alias("grp_main").unwrap().cluster_uuid, "uuid-prod");
}

#[tokio::test]
async fn delete_cluster_by_alias() {
    let h = harness();
    let token = login(&h.router).await;
    add_prod(&h.router, &token, Some("grp_prod")).await;

    let (status, _) = send(&h.router, "DELETE", "/api/v1/clusters/grp_prod", Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&h.router, "GET", "/api/v1/clusters/uuid-prod", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(h.store.get_alias("grp_prod").is_err());
}

#[tokio::test]
async fn status_reports_stored_snapshot_without_probing() {
    let h = harness();
    let token = login(&h.router).await;
    add_prod(&h.router, &token, None).await;
    let calls = h.connector.calls();

    let (status, body) =
        send(&h.router, "GET", "/api/v1/clusters/uuid-prod/status", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "prod");
    assert_eq!(body["data"]["heart_beat_issue"], 0);
    assert_eq!(body["data"]["buckets_summary"][0]["name"], "beer-sample");
    assert_eq!(h.connector.calls(), calls);
}

#[tokio::test]
async fn node_details_and_logs() {
    let h = harness();
    let token = login(&h.router).await;
    add_prod(&h.router, &token, None).await;

    let (status, body) =
        send(&h.router, "GET", "/api/v1/clusters/uuid-prod/nodes/n1", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["version"], "7.2.0");

    let (status, _) =
        send(&h.router, "GET", "/api/v1/clusters/uuid-prod/nodes/n9", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &h.router,
        "GET",
        "/api/v1/clusters/uuid-prod/nodes/n1/logs/debug",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("first line\nsecond line\n".to_string()));

    let (status, _) = send(
        &h.router,
        "GET",
        "/api/v1/clusters/uuid-prod/nodes/n1/logs/missing",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ── Aliases ────────────────────────────────────────────────────

#[tokio::test]
async fn alias_lifecycle() {
    let h = harness();
    let token = login(&h.router).await;
    add_prod(&h.router, &token, None).await;

    let target = json!({ "cluster_uuid": "uuid-prod" });
    let (status, _) =
        send(&h.router, "POST", "/api/v1/aliases/grp_a", Some(&token), Some(target.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) =
        send(&h.router, "POST", "/api/v1/aliases/grp_b", Some(&token), Some(target.clone())).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) =
        send(&h.router, "POST", "/api/v1/aliases/plain", Some(&token), Some(target)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let unknown = json!({ "cluster_uuid": "nope" });
    let (status, _) =
        send(&h.router, "POST", "/api/v1/aliases/grp_c", Some(&token), Some(unknown)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&h.router, "DELETE", "/api/v1/aliases/grp_a", Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&h.router, "DELETE", "/api/v1/aliases/grp_a", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ── Cloud credentials ──────────────────────────────────────────

#[tokio::test]
async fn cloud_credentials_hide_secret() {
    let h = harness();
    let token = login(&h.router).await;

    let creds = json!({ "name": "ops", "access_key": "AK", "secret_key": "SK" });
    let (status, _) =
        send(&h.router, "POST", "/api/v1/cloud/credentials", Some(&token), Some(creds)).await;
    assert_eq!(status, StatusCode::CREATED);

    let incomplete = json!({ "name": "ops2", "access_key": "AK" });
    let (status, _) =
        send(&h.router, "POST", "/api/v1/cloud/credentials", Some(&token), Some(incomplete)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&h.router, "GET", "/api/v1/cloud/credentials", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["access_key"], "AK");
    assert!(body["data"][0].get("secret_key").is_none());
}

// ── Route groups ───────────────────────────────────────────────

#[tokio::test]
async fn disabled_groups_are_not_mounted() {
    let h = harness_with(RouteGroups {
        admin: true,
        cluster: true,
        extended: false,
    });
    let token = login(&h.router).await;

    let (status, _) = send(&h.router, "GET", "/api/v1/cloud/credentials", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&h.router, "GET", "/api/v1/clusters", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
}

// ── Metrics ────────────────────────────────────────────────────

#[tokio::test]
async fn metrics_are_served_without_a_token() {
    let h = harness();

    for uri in ["/api/v1/metrics", "/api/v1/_prometheus"] {
        let (status, body) = send(&h.router, "GET", uri, None, None).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        let text = body.as_str().unwrap();
        assert!(text.contains("# TYPE clustermon_tracked_clusters gauge"), "{uri}");
        assert!(text.contains("clustermon_heart_sweeps_total 0"), "{uri}");
    }
}

#[tokio::test]
async fn metrics_reflect_tracked_clusters_and_sweeps() {
    let h = harness();
    let token = login(&h.router).await;
    let new_cluster = json!({ "host": HOST, "user": "admin", "password": "password" });
    let (status, _) = send(&h.router, "POST", "/api/v1/clusters", Some(&token), Some(new_cluster)).await;
    assert_eq!(status, StatusCode::CREATED);

    h.stats.record_sweep(SweepReport {
        probed: 1,
        healthy: 1,
        ..Default::default()
    });
    h.stats.record_reconcile(false);

    let (status, body) = send(&h.router, "GET", "/api/v1/metrics", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let text = body.as_str().unwrap();
    assert!(text.contains("clustermon_tracked_clusters{heart_issue=\"none\"} 1"));
    assert!(text.contains("clustermon_heart_sweeps_total 1"));
    assert!(text.contains("clustermon_last_sweep_probes{heart_issue=\"none\"} 1"));
    assert!(text.contains("clustermon_discovery_reconciles_total{result=\"failure\"} 1"));
}

#[tokio::test]
async fn metrics_survive_disabled_groups() {
    let h = harness_with(RouteGroups {
        admin: false,
        cluster: false,
        extended: false,
    });
    let (status, _) = send(&h.router, "GET", "/api/v1/metrics", None, None).await;
    assert_eq!(status, StatusCode::OK);
}
