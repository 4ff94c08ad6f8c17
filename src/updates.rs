//! Image update detection for running instances.
//!
//! Each running instance's image is pulled and the progress stream is read
//! just far enough to tell whether new layers are coming.  When the stream
//! says nothing useful the local image identity is compared with the one the
//! instance is bound to.  Instances labelled `cosmos-auto-update=true` are
//! recreated on the new image straight away.

use std::sync::Arc;

use futures_util::stream::StreamExt;
use log::{debug, error, info};

use crate::labels::PolicyLabels;
use crate::recreate::Orchestrator;
use crate::runtime::ensure_connected;
use crate::types::{InstanceDescriptor, InstanceState, InstanceSummary, UpdateResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullSignal {
    /// A layer download began, so the registry has something newer.
    LayerDownload,
    /// The registry tag matches the local one.
    UpToDate,
    Other,
}

pub fn classify_progress(status: &str) -> PullSignal {
    if status.contains("Pulling fs layer") {
        PullSignal::LayerDownload
    } else if status.contains("Status: Image is up to date") {
        PullSignal::UpToDate
    } else {
        PullSignal::Other
    }
}

pub struct UpdateDetector {
    orchestrator: Arc<Orchestrator>,
}

impl UpdateDetector {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Checks every running instance. `true` means an update is available
    /// and was not applied.
    pub async fn check_updates(&self) -> UpdateResult {
        let mut result = UpdateResult::new();
        let gateway = self.orchestrator.gateway();

        if let Err(e) = ensure_connected(gateway.as_ref()).await {
            error!("CheckUpdates - {e}");
            return result;
        }

        let instances = match gateway.list_instances(true).await {
            Ok(instances) => instances,
            Err(e) => {
                error!("CheckUpdates - listing instances failed: {e}");
                return result;
            }
        };

        for instance in instances {
            let name = instance.name.trim_start_matches('/').to_string();
            if instance.state != InstanceState::Running {
                info!("Instance {name} is not running, skipping");
                continue;
            }

            info!("Checking for updates for {} ({name})", instance.image);
            let full = match gateway.inspect(&instance.id).await {
                Ok(full) => full,
                Err(e) => {
                    error!("CheckUpdates - inspecting {name} failed: {e}");
                    continue;
                }
            };

            if let Some(pending) = self.check_instance(&instance, full).await {
                result.insert(name, pending);
            }
        }

        result
    }

    /// `None` when the instance could not be checked.
    async fn check_instance(
        &self,
        instance: &InstanceSummary,
        full: InstanceDescriptor,
    ) -> Option<bool> {
        let gateway = self.orchestrator.gateway();
        let auto_update = PolicyLabels::of(&full).auto_update;
        let mut available = false;
        let mut needs_update = false;

        let mut stream = gateway.pull_image(&instance.image);
        while let Some(item) = stream.next().await {
            let progress = match item {
                Ok(progress) => progress,
                Err(e) => {
                    error!("CheckUpdates - pulling {} failed: {e}", instance.image);
                    // New layers already seen are still pending, but the pull
                    // did not finish so nothing gets installed.
                    return available.then_some(true);
                }
            };

            match classify_progress(&progress.status) {
                PullSignal::LayerDownload => {
                    info!("Updates available for {}", instance.image);
                    available = true;
                    if !auto_update {
                        break;
                    }
                    needs_update = true;
                }
                PullSignal::UpToDate => {
                    info!("No updates available for {}", instance.image);
                    if !auto_update {
                        break;
                    }
                }
                PullSignal::Other => debug!("{}", progress.status),
            }
        }
        // Closes the pull if we stopped reading early.
        drop(stream);

        // The registry may report nothing new while the local image has still
        // moved on from the one the instance runs.
        if !available && !needs_update {
            info!(
                "CheckUpdates - checking local image for change for {}",
                instance.image
            );
            match gateway.inspect_image(&instance.image).await {
                Ok(local_id) if local_id != instance.image_id => {
                    info!("CheckUpdates - local updates available for {}", instance.image);
                    available = true;
                    needs_update = true;
                }
                Ok(_) => info!("CheckUpdates - no local updates for {}", instance.image),
                Err(e) => {
                    error!("CheckUpdates - inspecting local {} failed: {e}", instance.image);
                    return None;
                }
            }
        }

        if needs_update && auto_update {
            info!(
                "Downloaded new update for {}, ready to install",
                instance.image
            );
            match self
                .orchestrator
                .recreate(Some(&instance.id), full, false)
                .await
            {
                Ok(new_id) => {
                    info!("CheckUpdates - {} updated as {new_id}", instance.name);
                    return Some(false);
                }
                Err(e) => error!("CheckUpdates - failed to update {}: {e}", instance.name),
            }
        }

        Some(available)
    }
}
