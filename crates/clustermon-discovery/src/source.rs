use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::DiscoveryError;

/// An external catalog of clusters that should be tracked.
///
/// `reconcile` is self-contained: it reads the catalog and adds or removes
/// tracked clusters in the store directly. Implementations should return
/// promptly once `cancel` fires.
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    async fn reconcile(&self, cancel: &CancellationToken) -> Result<(), DiscoveryError>;
}
