//! Data structures used throughout the recreate core.
//!
//! Runtime and host configuration are kept as the daemon's own models, so a
//! recreate hands every setting back to the daemon, including the ones this
//! crate never reads.  The orchestrator, policy and detector work through the
//! accessors below.  Everything here is serialisable so the binary can print
//! it as JSON.

use std::collections::{BTreeMap, HashMap};

use bollard::models::{ContainerConfig, HostConfig};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Full configuration of an instance: identity, runtime and host
/// configuration, labels and the networks it is attached to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    pub id: String,
    /// Daemon name, usually with a leading `/`.
    pub name: String,
    /// Identity of the image the instance is bound to.
    pub image_id: String,
    pub config: ContainerConfig,
    pub host: HostConfig,
    pub networks: NetworkAttachmentSet,
}

impl InstanceDescriptor {
    pub fn image(&self) -> &str {
        self.config.image.as_deref().unwrap_or_default()
    }

    pub fn network_mode(&self) -> &str {
        self.host.network_mode.as_deref().unwrap_or_default()
    }

    pub fn set_network_mode(&mut self, mode: impl Into<String>) {
        self.host.network_mode = Some(mode.into());
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.config
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }

    pub fn labels_mut(&mut self) -> &mut HashMap<String, String> {
        self.config.labels.get_or_insert_with(HashMap::new)
    }
}

/// One network an instance is connected to, with the endpoint settings that
/// must be replayed when it is reconnected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAttachment {
    pub name: String,
    pub aliases: Vec<String>,
    pub ipv4_address: Option<String>,
    pub ipv6_address: Option<String>,
}

impl NetworkAttachment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

impl From<&str> for NetworkAttachment {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for NetworkAttachment {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// Networks an instance was connected to when it was inspected.
///
/// Always read from the live instance before teardown, never from the
/// desired descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAttachmentSet(Vec<NetworkAttachment>);

impl NetworkAttachmentSet {
    pub fn new<I, A>(attachments: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<NetworkAttachment>,
    {
        let mut set = Self::default();
        for attachment in attachments {
            set.insert(attachment);
        }
        set
    }

    /// Adds `attachment` unless a network of the same name is present.
    pub fn insert(&mut self, attachment: impl Into<NetworkAttachment>) {
        let attachment = attachment.into();
        if !self.contains(&attachment.name) {
            self.0.push(attachment);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&NetworkAttachment> {
        self.0.iter().find(|a| a.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetworkAttachment> {
        self.0.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Running,
    Other,
}

impl InstanceState {
    pub fn from_status(status: &str) -> Self {
        if status.eq_ignore_ascii_case("running") {
            InstanceState::Running
        } else {
            InstanceState::Other
        }
    }
}

/// Listing entry for an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub id: String,
    pub name: String,
    /// Image reference the instance was created from, e.g. `app:v1`.
    pub image: String,
    /// Identity of the image the instance is currently bound to.
    pub image_id: String,
    pub state: InstanceState,
}

/// One line of an image pull progress stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullProgress {
    pub status: String,
    pub id: Option<String>,
    pub progress: Option<String>,
}

impl PullProgress {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ..Default::default()
        }
    }
}

/// Instance name to "update available and not applied".
pub type UpdateResult = BTreeMap<String, bool>;

/// How a single edit ended, for reporting layers.
#[derive(Debug)]
pub enum EditOutcome {
    /// The new instance is live.
    Applied { id: String },
    /// The edit failed and the previous configuration was restored.
    RolledBack { restored_id: String, cause: Error },
    /// The edit failed and nothing could be restored, or the edit failed
    /// before anything was destroyed. Inspect [`Error::Revert`] to tell the
    /// two apart.
    Failed { error: Error },
}

impl EditOutcome {
    /// False only when a revert failed and the instance may be gone.
    pub fn is_consistent(&self) -> bool {
        !matches!(
            self,
            EditOutcome::Failed {
                error: Error::Revert { .. }
            }
        )
    }
}

impl From<crate::Result<String>> for EditOutcome {
    fn from(result: crate::Result<String>) -> Self {
        match result {
            Ok(id) => EditOutcome::Applied { id },
            Err(Error::RolledBack { restored_id, cause }) => EditOutcome::RolledBack {
                restored_id,
                cause: *cause,
            },
            Err(error) => EditOutcome::Failed { error },
        }
    }
}

impl std::fmt::Display for EditOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditOutcome::Applied { id } => write!(f, "applied, new instance {id}"),
            EditOutcome::RolledBack { restored_id, cause } => {
                write!(f, "rolled back to {restored_id}: {cause}")
            }
            EditOutcome::Failed { error } => write!(f, "failed: {error}"),
        }
    }
}
