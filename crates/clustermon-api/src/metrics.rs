//! Prometheus text exposition of the monitor's view of the fleet.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use tracing::warn;

use clustermon_core::StatsSnapshot;
use clustermon_state::{HeartIssue, TrackedCluster};

use crate::ApiState;
use crate::handlers::error_response;

const ISSUES: [HeartIssue; 4] = [
    HeartIssue::None,
    HeartIssue::BadAuth,
    HeartIssue::NoConnection,
    HeartIssue::UuidMismatch,
];

fn issue_label(issue: HeartIssue) -> &'static str {
    match issue {
        HeartIssue::None => "none",
        HeartIssue::BadAuth => "bad_auth",
        HeartIssue::NoConnection => "no_connection",
        HeartIssue::UuidMismatch => "uuid_mismatch",
    }
}

/// Render tracked clusters and monitor counters in Prometheus text format.
pub fn render_prometheus(clusters: &[TrackedCluster], stats: &StatsSnapshot) -> String {
    let mut out = String::new();

    out.push_str("# HELP clustermon_tracked_clusters Tracked clusters by last heart issue.\n");
    out.push_str("# TYPE clustermon_tracked_clusters gauge\n");
    for issue in ISSUES {
        let count = clusters.iter().filter(|c| c.heart_issue == issue).count();
        out.push_str(&format!(
            "clustermon_tracked_clusters{{heart_issue=\"{}\"}} {count}\n",
            issue_label(issue)
        ));
    }

    out.push_str("# HELP clustermon_discovered_clusters Tracked clusters added by discovery.\n");
    out.push_str("# TYPE clustermon_discovered_clusters gauge\n");
    out.push_str(&format!(
        "clustermon_discovered_clusters {}\n",
        clusters.iter().filter(|c| c.discovered).count()
    ));

    out.push_str("# HELP clustermon_heart_sweeps_total Completed heart beat sweeps.\n");
    out.push_str("# TYPE clustermon_heart_sweeps_total counter\n");
    out.push_str(&format!("clustermon_heart_sweeps_total {}\n", stats.sweeps));

    let last = stats.last_sweep.unwrap_or_default();
    out.push_str("# HELP clustermon_last_sweep_probes Probe outcomes of the last sweep.\n");
    out.push_str("# TYPE clustermon_last_sweep_probes gauge\n");
    for (issue, count) in [
        (HeartIssue::None, last.healthy),
        (HeartIssue::BadAuth, last.bad_auth),
        (HeartIssue::NoConnection, last.no_connection),
        (HeartIssue::UuidMismatch, last.uuid_mismatch),
    ] {
        out.push_str(&format!(
            "clustermon_last_sweep_probes{{heart_issue=\"{}\"}} {count}\n",
            issue_label(issue)
        ));
    }

    out.push_str("# HELP clustermon_last_sweep_store_errors Probe results the last sweep could not store.\n");
    out.push_str("# TYPE clustermon_last_sweep_store_errors gauge\n");
    out.push_str(&format!(
        "clustermon_last_sweep_store_errors {}\n",
        last.store_errors
    ));

    out.push_str("# HELP clustermon_discovery_reconciles_total Finished discovery runs by result.\n");
    out.push_str("# TYPE clustermon_discovery_reconciles_total counter\n");
    out.push_str(&format!(
        "clustermon_discovery_reconciles_total{{result=\"success\"}} {}\n",
        stats.reconciles
    ));
    out.push_str(&format!(
        "clustermon_discovery_reconciles_total{{result=\"failure\"}} {}\n",
        stats.reconcile_failures
    ));

    out
}

/// `GET /api/v1/metrics` (also served as `/api/v1/_prometheus`).
pub async fn prometheus_metrics(State(state): State<ApiState>) -> Response {
    let clusters = match state.store.get_clusters(false, false) {
        Ok(clusters) => clusters,
        Err(e) => {
            warn!(error = %e, "could not list clusters for metrics");
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    let body = render_prometheus(&clusters, &state.stats.snapshot());

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}
