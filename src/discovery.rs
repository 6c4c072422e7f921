//! Capability discovery.
use tracing::{info, warn};

use crate::backend::Backend;
use crate::model::{CapabilitySet, PowerMethod};
use crate::transport::Transport;

/// Probes `backend` once for its power method and named commands.
///
/// Never fails: an unreachable or unrecognized backend yields
/// [`CapabilitySet::none`]. Power commands are dropped whenever no power
/// method was found.
pub async fn discover<T: Transport>(backend: &Backend<T>) -> CapabilitySet {
    let mut capabilities = backend.discover_capabilities().await;

    if capabilities.power == PowerMethod::None {
        let before = capabilities.commands.len();
        capabilities.commands.retain(|command| !command.tag.is_power());
        if capabilities.commands.len() != before {
            warn!(host = backend.host(), "dropped power commands without a power method");
        }
    }

    info!(
        host = backend.host(),
        power = ?capabilities.power,
        commands = capabilities.commands.len(),
        "capabilities discovered"
    );
    capabilities
}
