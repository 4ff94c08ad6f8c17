//! Network decisions made while recreating an instance.
//!
//! Everything here is pure: it only reads and edits descriptors.

use crate::labels::{self, PolicyLabels, FORCE_NETWORK_MODE};
use crate::types::InstanceDescriptor;

/// The daemon's default network.
pub const DEFAULT_BRIDGE: &str = "bridge";

const BUILTIN_MODES: [&str; 4] = ["bridge", "default", "host", "none"];

pub fn is_builtin_mode(mode: &str) -> bool {
    BUILTIN_MODES.contains(&mode)
}

/// Pins a non-builtin network mode (another instance's namespace or a named
/// network) in the `cosmos-force-network-mode` label.
///
/// The first time the mode is recorded; on later edits the mode is restored
/// from the label, so applying this twice is the same as applying it once.
pub fn resolve_network_mode(desired: &mut InstanceDescriptor) {
    if is_builtin_mode(desired.network_mode()) {
        return;
    }

    match PolicyLabels::of(desired).force_network_mode {
        Some(forced) => desired.set_network_mode(forced),
        None => {
            let mode = desired.network_mode().to_string();
            labels::add_labels(desired, [(FORCE_NETWORK_MODE, mode)]);
        }
    }
}

/// True only for the default bridge on an instance marked as secured.
pub fn should_skip_reattach(network: &str, descriptor: &InstanceDescriptor) -> bool {
    network == DEFAULT_BRIDGE && PolicyLabels::of(descriptor).force_network_secured
}

/// Bridge and default modes get the preserved name as hostname. Any other
/// mode must have both hostname and exposed ports cleared or the daemon
/// rejects or mishandles the create.
pub fn apply_hostname_policy(desired: &mut InstanceDescriptor, name: &str) {
    match desired.network_mode() {
        "bridge" | "default" => {
            desired.config.hostname = Some(name.trim_start_matches('/').to_string());
        }
        _ => {
            desired.config.hostname = None;
            desired.config.exposed_ports = None;
        }
    }
}
