//! HTTP and HTTPS listeners serving the API router.
//!
//! Each listener runs in its own task and stops on its own shutdown token.
//! [`Listener::shutdown`] lets in-flight requests finish for at most
//! [`DRAIN_TIMEOUT`] before aborting the task.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow, ensure};
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// A running listener.
pub struct Listener {
    name: &'static str,
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl Listener {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The bound address (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting, drain in-flight requests, then abort stragglers.
    pub async fn shutdown(self) {
        let Listener {
            name,
            addr,
            shutdown,
            mut handle,
        } = self;
        shutdown.cancel();

        match tokio::time::timeout(DRAIN_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => info!(listener = name, %addr, "listener stopped"),
            Ok(Err(e)) => warn!(listener = name, error = %e, "listener task ended abnormally"),
            Err(_) => {
                warn!(listener = name, timeout = ?DRAIN_TIMEOUT, "drain timed out, aborting");
                handle.abort();
            }
        }
    }
}

/// Bind `addr` and serve `router` over plain HTTP.
pub async fn serve_http(addr: SocketAddr, router: Router) -> anyhow::Result<Listener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {addr}"))?;
    let addr = listener.local_addr()?;
    let shutdown = CancellationToken::new();

    let token = shutdown.clone();
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(token.cancelled_owned())
            .await
        {
            warn!(error = %e, "HTTP server stopped");
        }
    });

    info!(%addr, "HTTP listener started");
    Ok(Listener {
        name: "http",
        addr,
        shutdown,
        handle,
    })
}

/// Load a PEM certificate chain and private key into a server config.
pub fn load_tls_config(cert_path: &Path, key_path: &Path) -> anyhow::Result<Arc<rustls::ServerConfig>> {
    let mut cert_reader = BufReader::new(
        File::open(cert_path).with_context(|| format!("open {}", cert_path.display()))?,
    );
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("parse certificates in {}", cert_path.display()))?;
    ensure!(!certs.is_empty(), "no certificates in {}", cert_path.display());

    let mut key_reader = BufReader::new(
        File::open(key_path).with_context(|| format!("open {}", key_path.display()))?,
    );
    let key = rustls_pemfile::private_key(&mut key_reader)
        .with_context(|| format!("parse private key in {}", key_path.display()))?
        .ok_or_else(|| anyhow!("no private key in {}", key_path.display()))?;

    let mut config =
        rustls::ServerConfig::builder_with_provider(rustls::crypto::ring::default_provider().into())
            .with_safe_default_protocol_versions()
            .map_err(|e| anyhow!("tls protocol version error: {e}"))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .context("certificate and key do not match")?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// Bind `addr` and serve `router` over TLS.
pub async fn serve_https(
    addr: SocketAddr,
    router: Router,
    tls: Arc<rustls::ServerConfig>,
) -> anyhow::Result<Listener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind HTTPS listener on {addr}"))?;
    let addr = listener.local_addr()?;
    let shutdown = CancellationToken::new();

    let handle = tokio::spawn(accept_tls(
        listener,
        TlsAcceptor::from(tls),
        router,
        shutdown.clone(),
    ));

    info!(%addr, "HTTPS listener started");
    Ok(Listener {
        name: "https",
        addr,
        shutdown,
        handle,
    })
}

async fn accept_tls(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    router: Router,
    shutdown: CancellationToken,
) {
    let mut connections = JoinSet::new();

    loop {
        let (stream, peer) = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "HTTPS accept failed");
                    continue;
                }
            },
        };
        while connections.try_join_next().is_some() {}

        let acceptor = acceptor.clone();
        let service = TowerToHyperService::new(router.clone());
        let shutdown = shutdown.clone();
        connections.spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    debug!(%peer, error = %e, "TLS handshake failed");
                    return;
                }
            };

            let builder = auto::Builder::new(TokioExecutor::new());
            let conn = builder.serve_connection(TokioIo::new(stream), service);
            tokio::pin!(conn);

            let result = tokio::select! {
                result = conn.as_mut() => result,
                _ = shutdown.cancelled() => {
                    conn.as_mut().graceful_shutdown();
                    conn.await
                }
            };
            if let Err(e) = result {
                debug!(%peer, error = %e, "HTTPS connection error");
            }
        });
    }

    drop(listener);
    while connections.join_next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;

    fn ping_router() -> Router {
        Router::new().route("/ping", get(|| async { "pong" }))
    }

    fn local() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    fn write_self_signed(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_path = dir.join("cert.pem");
        let key_path = dir.join("key.pem");
        std::fs::write(&cert_path, certified.cert.pem()).unwrap();
        std::fs::write(&key_path, certified.key_pair.serialize_pem()).unwrap();
        (cert_path, key_path)
    }

    #[tokio::test]
    async fn http_serves_until_shutdown() {
        let listener = serve_http(local(), ping_router()).await.unwrap();
        let url = format!("http://{}/ping", listener.local_addr());

        let body = reqwest::get(&url).await.unwrap().text().await.unwrap();
        assert_eq!(body, "pong");

        listener.shutdown().await;
        assert!(reqwest::get(&url).await.is_err());
    }

    #[tokio::test]
    async fn https_serves_with_loaded_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = write_self_signed(dir.path());
        let tls = load_tls_config(&cert, &key).unwrap();

        let listener = serve_https(local(), ping_router(), tls).await.unwrap();
        let url = format!("https://{}/ping", listener.local_addr());

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .unwrap();
        let body = client.get(&url).send().await.unwrap().text().await.unwrap();
        assert_eq!(body, "pong");

        listener.shutdown().await;
        assert!(client.get(&url).send().await.is_err());
    }

    #[test]
    fn tls_config_requires_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = write_self_signed(dir.path());

        assert!(load_tls_config(&cert, &dir.path().join("missing.pem")).is_err());
        // A certificate file holds no private key.
        assert!(load_tls_config(&cert, &cert).is_err());
        // A key file holds no certificate.
        assert!(load_tls_config(&key, &key).is_err());
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let first = serve_http(local(), ping_router()).await.unwrap();
        assert!(serve_http(first.local_addr(), ping_router()).await.is_err());
        first.shutdown().await;
    }
}
