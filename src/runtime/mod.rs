use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::{Error, Operation, Result};
use crate::types::{InstanceDescriptor, InstanceSummary, NetworkAttachment, PullProgress};

pub mod docker;
pub use docker::DockerGateway;

#[cfg(test)]
pub(crate) mod mock;

/// Stream of pull progress lines. Dropping it closes the pull.
pub type PullStream = BoxStream<'static, Result<PullProgress>>;

/// The daemon operations the recreate core relies on.
///
/// Every call may fail or be slow. Errors are tagged with the
/// [`Operation`] that produced them; a missing instance or image is
/// [`Error::NotFound`].
#[async_trait]
pub trait DaemonGateway: Send + Sync {
    async fn ping(&self) -> Result<()>;

    async fn list_instances(&self, include_stopped: bool) -> Result<Vec<InstanceSummary>>;

    async fn inspect(&self, id: &str) -> Result<InstanceDescriptor>;

    async fn stop(&self, id: &str) -> Result<()>;

    async fn remove(&self, id: &str) -> Result<()>;

    /// Creates a stopped instance from `descriptor` and returns its identity.
    async fn create(&self, name: &str, descriptor: &InstanceDescriptor) -> Result<String>;

    async fn start(&self, id: &str) -> Result<()>;

    async fn kill(&self, id: &str) -> Result<()>;

    fn pull_image(&self, image: &str) -> PullStream;

    /// Identity of the local copy of `image`.
    async fn inspect_image(&self, image: &str) -> Result<String>;

    /// Connects `id` to the attachment's network with its aliases and static
    /// addresses.
    async fn connect_network(&self, attachment: &NetworkAttachment, id: &str) -> Result<()>;
}

/// Resolves an instance name, with or without the leading `/`, to its identity.
pub async fn find_instance_id(gateway: &dyn DaemonGateway, name: &str) -> Result<String> {
    let wanted = name.trim_start_matches('/');
    gateway
        .list_instances(true)
        .await?
        .into_iter()
        .find(|i| i.name.trim_start_matches('/') == wanted)
        .map(|i| i.id)
        .ok_or_else(|| Error::NotFound(format!("instance {name}")))
}

/// Pings the daemon, turning any failure into [`Error::Connection`].
pub async fn ensure_connected(gateway: &dyn DaemonGateway) -> Result<()> {
    gateway.ping().await.map_err(|e| match e {
        Error::Connection(_) => e,
        other => Error::Connection(other.to_string()),
    })
}
