//! Process lifecycle: key material, listeners, heart monitor and discovery.
//!
//! ```text
//!  Uninitialized ──start──▶ Starting ──▶ Running ──stop──▶ Stopping ──▶ Uninitialized
//! ```
//!
//! [`Manager::start`] is the process run loop: it brings everything up and
//! then blocks until [`Manager::stop`] has torn it all down again.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use clustermon_api::{ApiState, RouteGroups, build_router};
use clustermon_client::{ClusterConnector, RestConnector};
use clustermon_core::password::hash_password;
use clustermon_core::{FrequencyConfiguration, KeyMaterial, MonitorStats};
use clustermon_discovery::{DiscoveryManager, PrometheusSource};
use clustermon_heart::HeartMonitor;
use clustermon_state::{StateStore, Store, User};

use crate::config::Config;
use crate::listener::{self, Listener};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Starting,
    Running,
    Stopping,
}

/// Listener settings. A `None` address skips that listener.
#[derive(Debug, Clone, Default)]
pub struct ListenerConfig {
    pub http: Option<SocketAddr>,
    pub https: Option<(SocketAddr, Arc<rustls::ServerConfig>)>,
    pub routes: RouteGroups,
}

/// Everything a running process owns beyond its components.
struct Active {
    lifetime: CancellationToken,
    listeners: Vec<Listener>,
}

pub struct Manager {
    secret: Vec<u8>,
    listeners: ListenerConfig,
    store: Arc<dyn Store>,
    connector: Arc<dyn ClusterConnector>,
    heart: HeartMonitor,
    discovery: Option<DiscoveryManager>,
    cluster_timeout: Duration,
    stats: Arc<MonitorStats>,
    state: Mutex<LifecycleState>,
    keys: Mutex<Option<Arc<KeyMaterial>>>,
    active: Mutex<Option<Active>>,
}

impl Manager {
    /// Assemble a manager from already-built components.
    pub fn new(
        secret: impl Into<Vec<u8>>,
        listeners: ListenerConfig,
        store: Arc<dyn Store>,
        connector: Arc<dyn ClusterConnector>,
        heart: HeartMonitor,
        discovery: Option<DiscoveryManager>,
    ) -> Self {
        Self {
            secret: secret.into(),
            listeners,
            store,
            connector,
            heart,
            discovery,
            cluster_timeout: clustermon_client::DEFAULT_REQUEST_TIMEOUT,
            stats: Arc::new(MonitorStats::new()),
            state: Mutex::new(LifecycleState::Uninitialized),
            keys: Mutex::new(None),
            active: Mutex::new(None),
        }
    }

    /// Request timeout for API calls that reach out to a cluster.
    pub fn with_cluster_timeout(mut self, timeout: Duration) -> Self {
        self.cluster_timeout = timeout;
        self
    }

    /// Counters served on the metrics routes. Pass the same handle to the
    /// heart monitor and discovery manager.
    pub fn with_stats(mut self, stats: Arc<MonitorStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Production wiring: redb store, REST connector and, when configured,
    /// Prometheus discovery. Provisions the admin user if requested.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        config.validate()?;

        if let Some(parent) = config.store_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
        }
        let store: Arc<dyn Store> = Arc::new(StateStore::open(&config.store_path)?);
        info!(path = ?config.store_path, "state store opened");

        if let Some((user, password)) = config.admin() {
            provision_admin(store.as_ref(), user, password)?;
        }

        let stats = Arc::new(MonitorStats::new());
        let connector: Arc<dyn ClusterConnector> = Arc::new(RestConnector::new());
        let heart = HeartMonitor::new(store.clone(), connector.clone(), config.max_workers())
            .with_probe_timeout(config.probe_timeout)
            .with_stats(stats.clone());

        let discovery = match config.discovery()? {
            Some(d) => {
                let source = PrometheusSource::new(
                    &d.url,
                    d.selector,
                    store.clone(),
                    connector.clone(),
                    d.user,
                    d.password,
                )
                .context("could not create Prometheus discovery")?
                .with_timeout(config.probe_timeout);
                info!(url = %d.url, "Prometheus discovery configured");
                Some(DiscoveryManager::new(Arc::new(source)).with_stats(stats.clone()))
            }
            None => None,
        };

        let https = match config.tls_paths() {
            Some((cert, key)) => Some((
                SocketAddr::from(([0, 0, 0, 0], config.https_port)),
                listener::load_tls_config(cert, key)?,
            )),
            None => None,
        };
        let listeners = ListenerConfig {
            http: (!config.disable_http).then(|| SocketAddr::from(([0, 0, 0, 0], config.http_port))),
            https,
            routes: config.route_groups(),
        };

        Ok(Self::new(
            config.store_key.as_bytes(),
            listeners,
            store,
            connector,
            heart,
            discovery,
        )
        .with_cluster_timeout(config.probe_timeout)
        .with_stats(stats))
    }

    pub fn state(&self) -> LifecycleState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(LifecycleState::Uninitialized)
    }

    fn set_state(&self, state: LifecycleState) {
        if let Ok(mut current) = self.state.lock() {
            *current = state;
        }
    }

    /// Move `from` → `to`; `false` if the manager was in another state.
    fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        match self.state.lock() {
            Ok(mut current) if *current == from => {
                *current = to;
                true
            }
            Ok(_) => false,
            Err(_) => {
                error!("manager state poisoned");
                false
            }
        }
    }

    /// Key material of the current run, if started.
    pub fn keys(&self) -> Option<Arc<KeyMaterial>> {
        self.keys.lock().ok().and_then(|k| k.clone())
    }

    /// Addresses the listeners are bound to.
    pub fn listener_addrs(&self) -> Vec<(&'static str, SocketAddr)> {
        self.active
            .lock()
            .ok()
            .and_then(|a| {
                a.as_ref()
                    .map(|a| a.listeners.iter().map(|l| (l.name(), l.local_addr())).collect())
            })
            .unwrap_or_default()
    }

    /// Bring everything up, then block until [`stop`](Self::stop) completes.
    /// Returns immediately if already starting or running.
    pub async fn start(&self, frequencies: FrequencyConfiguration) -> anyhow::Result<()> {
        if !self.transition(LifecycleState::Uninitialized, LifecycleState::Starting) {
            info!(state = ?self.state(), "manager already started");
            return Ok(());
        }
        info!(?frequencies, "manager starting");

        let secret = self.secret.clone();
        let derived = tokio::task::spawn_blocking(move || KeyMaterial::generate(&secret)).await;
        let keys = match derived {
            Ok(Ok(keys)) => Arc::new(keys),
            Ok(Err(e)) => {
                self.set_state(LifecycleState::Uninitialized);
                return Err(e).context("could not derive key material");
            }
            Err(e) => {
                self.set_state(LifecycleState::Uninitialized);
                return Err(e).context("key derivation task failed");
            }
        };
        info!(instance = %keys.instance_id, "key material derived");
        if let Ok(mut slot) = self.keys.lock() {
            *slot = Some(keys.clone());
        }

        let lifetime = CancellationToken::new();
        let listeners = self.start_listeners(keys).await;
        if let Ok(mut active) = self.active.lock() {
            *active = Some(Active {
                lifetime: lifetime.clone(),
                listeners,
            });
        }

        self.heart.start(frequencies.heartbeat);
        if let Some(discovery) = &self.discovery {
            discovery.start(frequencies.discovery);
        }

        self.set_state(LifecycleState::Running);
        info!("manager started");
        lifetime.cancelled().await;
        info!("manager stopped");
        Ok(())
    }

    async fn start_listeners(&self, keys: Arc<KeyMaterial>) -> Vec<Listener> {
        let router = build_router(
            ApiState {
                store: self.store.clone(),
                connector: self.connector.clone(),
                keys,
                cluster_timeout: self.cluster_timeout,
                stats: self.stats.clone(),
            },
            self.listeners.routes,
        );

        let http = async {
            match self.listeners.http {
                Some(addr) => listener::serve_http(addr, router.clone()).await.map(Some),
                None => Ok(None),
            }
        };
        let https = async {
            match &self.listeners.https {
                Some((addr, tls)) => listener::serve_https(*addr, router.clone(), tls.clone())
                    .await
                    .map(Some),
                None => Ok(None),
            }
        };
        let (http, https) = tokio::join!(http, https);

        let mut listeners = Vec::new();
        for result in [http, https] {
            match result {
                Ok(Some(listener)) => listeners.push(listener),
                Ok(None) => {}
                Err(e) => error!(error = ?e, "listener failed to start"),
            }
        }
        listeners
    }

    /// Tear everything down in reverse order and release [`start`](Self::start).
    /// Does nothing unless running.
    pub async fn stop(&self) -> bool {
        if !self.transition(LifecycleState::Running, LifecycleState::Stopping) {
            return false;
        }
        info!("manager stopping");

        self.heart.stop().await;
        if let Some(discovery) = &self.discovery {
            discovery.stop().await;
        }

        let active = self.active.lock().ok().and_then(|mut a| a.take());
        if let Some(active) = active {
            for listener in active.listeners {
                listener.shutdown().await;
            }
            active.lifetime.cancel();
        } else {
            warn!("manager had no active listeners to stop");
        }

        if let Ok(mut keys) = self.keys.lock() {
            *keys = None;
        }
        self.set_state(LifecycleState::Uninitialized);
        true
    }
}

/// Create the admin user unless a user of that name already exists.
pub fn provision_admin(store: &dyn Store, user: &str, password: &str) -> anyhow::Result<()> {
    match store.get_user(user) {
        Ok(_) => {
            info!(%user, "admin user already exists");
            return Ok(());
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e).context("could not look up admin user"),
    }
    store
        .add_user(&User {
            user: user.to_string(),
            password: hash_password(password),
            admin: true,
        })
        .context("could not create admin user")?;
    info!(%user, "admin user provisioned");
    Ok(())
}
