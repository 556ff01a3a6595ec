//! Failure taxonomy for talking to a cluster.

use thiserror::Error;

/// Why a session could not be established.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    /// The cluster rejected the credentials (401).
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The credentials are valid but lack the required permissions (403).
    #[error("insufficient permissions: {0}")]
    Authorization(String),

    /// DNS, refused, reset, TLS handshake or timeout.
    #[error("could not connect: {0}")]
    Connection(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("invalid TLS configuration: {0}")]
    Tls(String),
}

impl ConnectError {
    /// Authentication or authorization failure.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            ConnectError::Authentication(_) | ConnectError::Authorization(_)
        )
    }
}

/// Failure of a request made on an established session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("could not decode response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClientError::Decode(e.to_string())
        } else {
            ClientError::Request(e.to_string())
        }
    }
}
