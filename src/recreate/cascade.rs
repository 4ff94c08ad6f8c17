//! Recreation of instances that share a replaced instance's network namespace.

use log::{error, info};

use super::Orchestrator;
use crate::types::{EditOutcome, InstanceDescriptor};

/// An instance depends on `replaced_id` when its network mode mentions it,
/// as in `container:<id>`.
///
/// This is a plain substring match, so an identity that is a prefix of
/// another one can match too.
pub fn is_dependent(descriptor: &InstanceDescriptor, replaced_id: &str) -> bool {
    !replaced_id.is_empty() && descriptor.network_mode().contains(replaced_id)
}

impl Orchestrator {
    /// Recreates every instance attached to `replaced_id`'s network
    /// namespace. Runs without taking the edit lock; failures are logged and
    /// the remaining dependents are still processed.
    pub async fn recreate_dependents(&self, replaced_id: &str) -> Vec<(String, EditOutcome)> {
        let mut outcomes = Vec::new();

        let instances = match self.gateway.list_instances(true).await {
            Ok(instances) => instances,
            Err(e) => {
                error!("Cascade - listing instances failed: {e}");
                return outcomes;
            }
        };

        for instance in instances {
            if instance.id == replaced_id {
                continue;
            }

            let full = match self.gateway.inspect(&instance.id).await {
                Ok(full) => full,
                Err(e) => {
                    error!("Cascade - inspecting {} failed: {e}", instance.name);
                    continue;
                }
            };

            if !is_dependent(&full, replaced_id) {
                continue;
            }

            info!("Cascade - recreating {}", instance.name);
            let result = self.recreate(Some(&instance.id), full, true).await;
            if let Err(e) = &result {
                error!("Cascade - failed to update {}: {e}", instance.name);
            }
            outcomes.push((instance.name, EditOutcome::from(result)));
        }

        outcomes
    }
}
