//! Recreate-with-rollback protocol for a single instance.
//!
//! A recreate stops and removes the live instance, waits for the daemon to
//! confirm it is gone, creates a replacement under the same name, reconnects
//! it to the networks its predecessor had and starts it.  If create or start
//! fails the broken leftovers are discarded and the pre-edit descriptor is
//! run through the same protocol again to restore the previous instance.
//!
//! Top-level edits are serialized by the [`EditLock`].  Restores and
//! dependent recreates never take it: they only run inside an edit that
//! already holds it.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::StreamExt;
use log::{debug, error, info, warn};
use tokio::time::{sleep, Instant};

use crate::error::{Error, Result};
use crate::lock::EditLock;
use crate::policy;
use crate::runtime::{ensure_connected, DaemonGateway};
use crate::types::InstanceDescriptor;

mod cascade;
mod state;

pub use cascade::is_dependent;
pub use state::RecreateState;
use state::Progress;

/// How long to wait for the daemon to confirm an instance is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestroyWait {
    /// First delay between polls. Doubles after every poll.
    pub interval: Duration,
    pub max_interval: Duration,
    /// `None` polls forever.
    pub timeout: Option<Duration>,
}

impl Default for DestroyWait {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(8),
            timeout: Some(Duration::from_secs(300)),
        }
    }
}

impl DestroyWait {
    /// Fixed interval, no timeout.
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_interval: interval,
            timeout: None,
        }
    }
}

pub struct Orchestrator {
    gateway: Arc<dyn DaemonGateway>,
    lock: EditLock,
    destroy_wait: DestroyWait,
}

impl Orchestrator {
    pub fn new(gateway: Arc<dyn DaemonGateway>, lock: EditLock) -> Self {
        Self {
            gateway,
            lock,
            destroy_wait: DestroyWait::default(),
        }
    }

    pub fn with_destroy_wait(mut self, destroy_wait: DestroyWait) -> Self {
        self.destroy_wait = destroy_wait;
        self
    }

    pub fn gateway(&self) -> &Arc<dyn DaemonGateway> {
        &self.gateway
    }

    pub fn lock(&self) -> &EditLock {
        &self.lock
    }

    /// Replaces `old_id` with a new instance built from `desired` and returns
    /// the new identity.
    ///
    /// Without an `old_id` the descriptor is created as-is; this is how a
    /// previous state gets restored. The edit lock is taken only when there
    /// is an `old_id` and `skip_lock` is false.
    ///
    /// A failed create or start that was rolled back returns
    /// [`Error::RolledBack`]; if the restore failed too it returns
    /// [`Error::Revert`].
    pub async fn recreate(
        &self,
        old_id: Option<&str>,
        desired: InstanceDescriptor,
        skip_lock: bool,
    ) -> Result<String> {
        let old_id = old_id.filter(|id| !id.is_empty());

        let _guard = match old_id {
            Some(_) if !skip_lock => {
                let guard = self.lock.acquire().await;
                ensure_connected(self.gateway.as_ref()).await?;
                Some(guard)
            }
            _ => None,
        };

        self.run(old_id, desired).await
    }

    fn run<'a>(
        &'a self,
        old_id: Option<&'a str>,
        mut desired: InstanceDescriptor,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let mut progress = Progress::new(old_id.unwrap_or(desired.name.as_str()));

            if desired.image().is_empty() {
                return Err(progress.fail(Error::InvalidDescriptor(
                    "missing image reference".into(),
                )));
            }

            policy::resolve_network_mode(&mut desired);

            let observed_old = match old_id {
                Some(old_id) => {
                    info!("Recreate - updating {old_id}, retrieving current state");
                    let observed = self
                        .gateway
                        .inspect(old_id)
                        .await
                        .map_err(|e| progress.fail(e))?;
                    self.ensure_image(desired.image())
                        .await
                        .map_err(|e| progress.fail(e))?;

                    progress.advance(RecreateState::Destroying);
                    self.gateway
                        .stop(old_id)
                        .await
                        .map_err(|e| progress.fail(e))?;
                    self.gateway
                        .remove(old_id)
                        .await
                        .map_err(|e| progress.fail(e))?;

                    progress.advance(RecreateState::AwaitingDestruction);
                    self.await_destruction(old_id)
                        .await
                        .map_err(|e| progress.fail(e))?;
                    info!("Recreate - {old_id} stopped and removed");
                    observed
                }
                None => {
                    info!("Recreate - revert started for {}", desired.name);
                    desired.clone()
                }
            };

            // Reuse the daemon's name so the hostname it derives stays the same.
            let name = observed_old.name.clone();
            policy::apply_hostname_policy(&mut desired, &name);

            progress.advance(RecreateState::Creating);
            let created = self.gateway.create(&name, &desired).await;
            let started = match &created {
                Ok(new_id) => {
                    info!("Recreate - {name} recreated as {new_id}, reconnecting networks");
                    progress.advance(RecreateState::Reattaching);
                    self.reattach(new_id, &observed_old, &desired).await;

                    info!("Recreate - networks connected, starting {new_id}");
                    progress.advance(RecreateState::Starting);
                    let started = self.gateway.start(new_id).await;
                    if let Err(e) = &started {
                        error!("Recreate - failed to start {new_id}: {e}");
                    }
                    started
                }
                Err(e) => {
                    error!("Recreate - failed to create {name}: {e}");
                    warn!("Recreate - nothing was created, skipping network reattachment and start");
                    Ok(())
                }
            };

            let (new_id, cause) = match (created, started) {
                (Ok(new_id), Ok(())) => (new_id, None),
                (Ok(new_id), Err(e)) => (new_id, Some(e)),
                (Err(e), _) => (String::new(), Some(e)),
            };

            let Some(cause) = cause else {
                progress.advance(RecreateState::Committed);
                if let Some(old_id) = old_id {
                    self.recreate_dependents(old_id).await;
                }
                info!("Recreate - {name} started, all done: {new_id}");
                return Ok(new_id);
            };

            let Some(old_id) = old_id else {
                if new_id.is_empty() {
                    error!("Recreate - failed to revert {name}, giving up: {cause}");
                } else {
                    error!("Recreate - revert recreated {name} as {new_id} but it is broken: {cause}");
                }
                return Err(progress.fail(cause));
            };

            info!("Recreate - failed to edit {name}, attempting to revert changes");
            progress.advance(RecreateState::RollingBack);
            let new_id = (!new_id.is_empty()).then_some(new_id);
            self.discard(old_id, new_id.as_deref()).await;

            let result = match self.run(None, observed_old).await {
                Ok(restored_id) => {
                    info!("Recreate - {name} restored as {restored_id}");
                    Err(Error::RolledBack {
                        restored_id,
                        cause: Box::new(cause),
                    })
                }
                Err(revert) => {
                    error!("Recreate - failed to restore {name}: {revert}");
                    Err(Error::Revert {
                        cause: Box::new(cause),
                        revert: Box::new(revert),
                    })
                }
            };
            progress.advance(RecreateState::Failed);
            result
        })
    }

    /// Pulls `image` if there is no local copy. A failed pull ends the edit.
    async fn ensure_image(&self, image: &str) -> Result<()> {
        match self.gateway.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!("Recreate - inspecting image {image} failed: {e}"),
        }

        info!("Recreate - image {image} not found, pulling");
        let mut stream = self.gateway.pull_image(image);
        while let Some(item) = stream.next().await {
            match item {
                Ok(progress) => match (&progress.id, &progress.progress) {
                    (Some(layer), Some(bar)) => info!("{}: {} {}", layer, progress.status, bar),
                    (Some(layer), None) => info!("{}: {}", layer, progress.status),
                    _ => info!("{}", progress.status),
                },
                Err(e) => {
                    error!("Recreate - image {image} could not be pulled: {e}");
                    return Err(match e {
                        Error::ImagePull { .. } => e,
                        other => Error::ImagePull {
                            image: image.to_string(),
                            message: other.to_string(),
                        },
                    });
                }
            }
        }
        Ok(())
    }

    /// Polls until inspect reports the instance gone, backing off between
    /// polls.
    async fn await_destruction(&self, id: &str) -> Result<()> {
        let started = Instant::now();
        let mut delay = self.destroy_wait.interval;
        loop {
            match self.gateway.inspect(id).await {
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => warn!("Recreate - inspecting {id} while waiting for removal: {e}"),
                Ok(_) => info!("Recreate - waiting for {id} to be destroyed"),
            }

            if let Some(timeout) = self.destroy_wait.timeout {
                let waited = started.elapsed();
                if waited >= timeout {
                    error!("Recreate - {id} still present after {waited:?}");
                    return Err(Error::Timeout {
                        id: id.to_string(),
                        waited,
                    });
                }
                delay = delay.min(timeout - waited);
            }

            sleep(delay).await;
            delay = (delay * 2).min(self.destroy_wait.max_interval);
        }
    }

    /// Connects `new_id` to every network `observed_old` was on, with the
    /// same aliases and addresses. Failures are logged, never fatal.
    async fn reattach(
        &self,
        new_id: &str,
        observed_old: &InstanceDescriptor,
        desired: &InstanceDescriptor,
    ) {
        let mut failed = Vec::new();
        for attachment in observed_old.networks.iter() {
            let network = attachment.name.as_str();
            if policy::should_skip_reattach(network, desired) {
                info!("Recreate - skipping network {network} (force-network-secured is set)");
                continue;
            }
            info!("Recreate - connecting to network {network}");
            match self.gateway.connect_network(attachment, new_id).await {
                Ok(()) => debug!("Recreate - {new_id} connected to network {network}"),
                Err(e) => {
                    error!("Recreate - failed to connect to network {network}: {e}");
                    failed.push(network);
                }
            }
        }
        if !failed.is_empty() {
            warn!("Recreate - {new_id} is running without networks {failed:?}");
        }
    }

    /// Best-effort kill and remove of the old and new identities. Errors are
    /// expected (the old one is usually gone already) and ignored.
    async fn discard(&self, old_id: &str, new_id: Option<&str>) {
        info!("Recreate - killing broken instances");
        let ids: Vec<&str> = std::iter::once(old_id).chain(new_id).collect();
        for id in &ids {
            if let Err(e) = self.gateway.kill(id).await {
                debug!("Recreate - kill {id} ignored: {e}");
            }
        }
        for id in &ids {
            if let Err(e) = self.gateway.remove(id).await {
                debug!("Recreate - remove {id} ignored: {e}");
            }
        }
    }
}
