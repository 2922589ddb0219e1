//! Signaling relay: forwards envelopes the registry does not interpret.
//!
//! Delivery is at-most-once. Unknown targets and full outboxes drop the
//! envelope without telling the sender.

use duet_common::RelayKind;
use tracing::debug;

use crate::presence::PresenceRegistry;

/// Forward `text` unchanged to the control connection registered as `target`.
/// Returns whether the envelope was queued.
pub async fn relay(registry: &PresenceRegistry, kind: RelayKind, target: &str, text: String) -> bool {
    let Some(signaler) = registry.signaler_for(target).await else {
        debug!("dropping {} for unregistered target {}", kind.as_str(), target);
        return false;
    };

    if !signaler.try_send_text(text) {
        debug!("outbox full, dropping {} for {}", kind.as_str(), target);
        return false;
    }
    true
}
