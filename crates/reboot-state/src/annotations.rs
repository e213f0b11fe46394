//! Reboot annotation keys
//!
//! Presence of a key means the marker is set. The value is informational only:
//! writers store the RFC 3339 time at which the marker was set.

use chrono::Utc;
use std::collections::BTreeMap;

/// Set by an operator or health signal to ask for a reboot.
pub const REBOOT_REQUESTED: &str = "reboot-requested";

/// Set by the controller once the reboot has been admitted.
pub const REBOOT_NOW: &str = "reboot-now";

/// Set by the agent right before it reboots the machine.
pub const REBOOT_IN_PROGRESS: &str = "reboot-in-progress";

/// All reboot markers, in lifecycle order.
pub const REBOOT_MARKERS: [&str; 3] = [REBOOT_REQUESTED, REBOOT_NOW, REBOOT_IN_PROGRESS];

/// Annotation map as carried on a machine record.
pub type Annotations = BTreeMap<String, String>;

/// Value written alongside a marker.
#[must_use]
pub fn marker_value() -> String {
    Utc::now().to_rfc3339()
}

/// Returns true if `key` is present in `annotations`, whatever its value.
#[must_use]
pub fn has_marker(annotations: &Annotations, key: &str) -> bool {
    annotations.contains_key(key)
}
