//! Policy flags stored in an instance's own label set.
//!
//! Labels round-trip through the daemon with the instance, so these are the
//! only durable settings the core reads or writes.

use log::warn;

use crate::types::InstanceDescriptor;

/// Network mode pinned by policy across edits.
pub const FORCE_NETWORK_MODE: &str = "cosmos-force-network-mode";
/// Skip reattaching to the default bridge network.
pub const FORCE_NETWORK_SECURED: &str = "cosmos-force-network-secured";
/// Let the update detector recreate the instance on a new image.
pub const AUTO_UPDATE: &str = "cosmos-auto-update";

/// Label is present with a non-empty value.
pub fn has_label(descriptor: &InstanceDescriptor, key: &str) -> bool {
    descriptor.label(key).is_some_and(|v| !v.is_empty())
}

/// Label holds the literal `"true"`.
pub fn is_label(descriptor: &InstanceDescriptor, key: &str) -> bool {
    descriptor.label(key) == Some("true")
}

pub fn get_label<'a>(descriptor: &'a InstanceDescriptor, key: &str) -> Option<&'a str> {
    descriptor.label(key)
}

pub fn add_labels<I, K, V>(descriptor: &mut InstanceDescriptor, labels: I)
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let existing = descriptor.labels_mut();
    for (key, value) in labels {
        existing.insert(key.into(), value.into());
    }
}

/// The recognized policy labels, parsed once at the boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyLabels {
    pub force_network_mode: Option<String>,
    pub force_network_secured: bool,
    pub auto_update: bool,
}

impl PolicyLabels {
    /// Boolean flags accept `"true"` and `"false"`; anything else is logged
    /// and read as false.
    pub fn of(descriptor: &InstanceDescriptor) -> Self {
        for key in [FORCE_NETWORK_SECURED, AUTO_UPDATE] {
            if let Some(other) = get_label(descriptor, key).filter(|v| !is_flag_value(v)) {
                warn!("Label {key} has unrecognized value {other:?}, treating as false");
            }
        }

        let force_network_mode = if has_label(descriptor, FORCE_NETWORK_MODE) {
            get_label(descriptor, FORCE_NETWORK_MODE).map(str::to_string)
        } else {
            None
        };

        Self {
            force_network_mode,
            force_network_secured: is_label(descriptor, FORCE_NETWORK_SECURED),
            auto_update: is_label(descriptor, AUTO_UPDATE),
        }
    }
}

fn is_flag_value(value: &str) -> bool {
    matches!(value, "" | "true" | "false")
}
