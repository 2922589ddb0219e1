//! Common helper functions for Duet.

use std::time::{SystemTime, UNIX_EPOCH};

pub const MAX_USERNAME_CHARS: usize = 64;
pub const MAX_TRANSPORT_ID_LEN: usize = 128;

/// Milliseconds since the Unix epoch, as stamped on chat messages.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Display names are free-form but must be non-blank and printable.
pub fn is_valid_username(username: &str) -> bool {
    let count = username.trim().chars().count();
    (1..=MAX_USERNAME_CHARS).contains(&count) && username.chars().all(|c| !c.is_control())
}

/// Transport ids are opaque broker-issued keys; only the length and control
/// characters are checked.
pub fn is_valid_transport_id(id: &str) -> bool {
    (1..=MAX_TRANSPORT_ID_LEN).contains(&id.len()) && id.chars().all(|c| !c.is_control())
}
