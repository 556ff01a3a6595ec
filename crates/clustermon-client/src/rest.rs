//! Production connector over the cluster management REST API.

use std::fmt;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

use clustermon_state::{BucketSummary, ClusterInfo, NodeSummary};

use crate::client::{ClusterConnector, ClusterSession, ConnectionInfo};
use crate::error::{ClientError, ConnectError};
use crate::wire::{self, Bucket, Pools, PoolsDefault};

const USER_AGENT: &str = concat!("clustermon/", env!("CARGO_PKG_VERSION"));

/// Connects with HTTP basic auth, trying each host in turn.
#[derive(Debug, Clone, Default)]
pub struct RestConnector;

impl RestConnector {
    pub fn new() -> Self {
        Self
    }
}

fn http_client(info: &ConnectionInfo) -> Result<reqwest::Client, ConnectError> {
    let builder = reqwest::Client::builder()
        .timeout(info.timeout)
        .user_agent(USER_AGENT);
    let builder = match &info.ca_cert {
        Some(pem) => {
            let cert = reqwest::Certificate::from_pem(pem.as_bytes())
                .map_err(|e| ConnectError::Tls(e.to_string()))?;
            builder.add_root_certificate(cert)
        }
        // Management endpoints ship with self-signed certificates.
        None => builder.danger_accept_invalid_certs(true),
    };
    builder.build().map_err(|e| ConnectError::Tls(e.to_string()))
}

async fn bootstrap_get<T: DeserializeOwned>(
    http: &reqwest::Client,
    info: &ConnectionInfo,
    url: String,
) -> Result<T, ConnectError> {
    let response = http
        .get(&url)
        .basic_auth(&info.user, Some(&info.password))
        .send()
        .await
        .map_err(|e| ConnectError::Connection(format!("{url}: {e}")))?;

    match response.status() {
        StatusCode::UNAUTHORIZED => Err(ConnectError::Authentication(url)),
        StatusCode::FORBIDDEN => Err(ConnectError::Authorization(url)),
        status if !status.is_success() => Err(ConnectError::UnexpectedResponse(format!(
            "{url} returned {status}"
        ))),
        _ => response
            .json()
            .await
            .map_err(|e| ConnectError::UnexpectedResponse(format!("{url}: {e}"))),
    }
}

async fn bootstrap(
    http: &reqwest::Client,
    info: &ConnectionInfo,
    base: &str,
) -> Result<RestSession, ConnectError> {
    let pools: Pools = bootstrap_get(http, info, format!("{base}/pools")).await?;
    let uuid = pools
        .cluster_uuid()
        .ok_or_else(|| ConnectError::UnexpectedResponse(format!("{base}: cluster not initialized")))?
        .to_string();

    let default: PoolsDefault = bootstrap_get(http, info, format!("{base}/pools/default")).await?;
    let tls = base.starts_with("https://");

    Ok(RestSession {
        http: http.clone(),
        base: base.to_string(),
        user: info.user.clone(),
        password: info.password.clone(),
        uuid,
        enterprise: pools.is_enterprise,
        info: default.cluster_info(),
        nodes: default.nodes_summary(tls),
        name: default.cluster_name,
    })
}

#[async_trait]
impl ClusterConnector for RestConnector {
    async fn connect(&self, info: &ConnectionInfo) -> Result<Box<dyn ClusterSession>, ConnectError> {
        let http = http_client(info)?;

        let mut auth_error = None;
        let mut last_error = None;
        for base in &info.hosts {
            let attempt = tokio::time::timeout(info.host_timeout, bootstrap(&http, info, base))
                .await
                .unwrap_or_else(|_| {
                    Err(ConnectError::Connection(format!(
                        "{base}: no response within {:?}",
                        info.host_timeout
                    )))
                });
            match attempt {
                Ok(session) => {
                    debug!(host = %base, cluster = %session.uuid, "bootstrapped");
                    return Ok(Box::new(session));
                }
                Err(e) => {
                    debug!(host = %base, error = %e, "bootstrap failed");
                    if e.is_auth() {
                        auth_error.get_or_insert(e);
                    } else {
                        last_error = Some(e);
                    }
                }
            }
        }

        Err(auth_error.or(last_error).unwrap_or_else(|| {
            ConnectError::InvalidConnectionString("no hosts to connect to".to_string())
        }))
    }
}

pub struct RestSession {
    http: reqwest::Client,
    base: String,
    user: String,
    password: String,
    uuid: String,
    name: String,
    enterprise: bool,
    info: ClusterInfo,
    nodes: Vec<NodeSummary>,
}

impl fmt::Debug for RestSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestSession")
            .field("base", &self.base)
            .field("uuid", &self.uuid)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl RestSession {
    async fn get(&self, path: &str) -> Result<reqwest::Response, ClientError> {
        let url = format!("{}{path}", self.base);
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(ClientError::NotFound(url)),
            status if !status.is_success() => Err(ClientError::Status {
                status: status.as_u16(),
                url,
            }),
            _ => Ok(response),
        }
    }
}

fn valid_log_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

#[async_trait]
impl ClusterSession for RestSession {
    fn cluster_uuid(&self) -> &str {
        &self.uuid
    }

    fn cluster_name(&self) -> &str {
        &self.name
    }

    fn is_enterprise(&self) -> bool {
        self.enterprise
    }

    fn cluster_info(&self) -> &ClusterInfo {
        &self.info
    }

    fn nodes_summary(&self) -> &[NodeSummary] {
        &self.nodes
    }

    async fn buckets_summary(&self) -> Result<Vec<BucketSummary>, ClientError> {
        let buckets: Vec<Bucket> = self.get("/pools/default/buckets").await?.json().await?;
        Ok(wire::buckets_summary(buckets))
    }

    async fn fetch_log(&self, name: &str) -> Result<String, ClientError> {
        if !valid_log_name(name) {
            return Err(ClientError::NotFound(format!("log {name:?}")));
        }
        Ok(self.get(&format!("/sasl_logs/{name}")).await?.text().await?)
    }
}
