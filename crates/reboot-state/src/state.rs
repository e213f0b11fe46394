//! Derived reboot state
//!
//! The state is never stored. It is computed from the annotation set each time a
//! record is read, so controller and agent always agree on the encoding.

use crate::annotations::{Annotations, REBOOT_IN_PROGRESS, REBOOT_NOW, REBOOT_REQUESTED};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reboot lifecycle state of a single machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RebootState {
    /// No reboot markers present
    #[default]
    Idle,

    /// `reboot-requested` present, waiting for admission
    Requested,

    /// `reboot-now` present, admitted by the controller
    Now,

    /// `reboot-in-progress` present, the agent has started the reboot
    InProgress,
}

impl RebootState {
    /// Machines in this state count against the unavailability bound.
    #[must_use]
    pub fn is_unavailable(self) -> bool {
        matches!(self, Self::Now | Self::InProgress)
    }

    /// Short name used in logs and metrics labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Requested => "requested",
            Self::Now => "now",
            Self::InProgress => "in-progress",
        }
    }
}

impl fmt::Display for RebootState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derives the reboot state from an annotation set.
///
/// When several markers coexist the most advanced one wins:
/// `InProgress` > `Now` > `Requested`. A stray `reboot-requested` left next to a
/// later marker therefore never pulls the machine back into admission.
#[must_use]
pub fn derive_state(annotations: &Annotations) -> RebootState {
    if annotations.contains_key(REBOOT_IN_PROGRESS) {
        RebootState::InProgress
    } else if annotations.contains_key(REBOOT_NOW) {
        RebootState::Now
    } else if annotations.contains_key(REBOOT_REQUESTED) {
        RebootState::Requested
    } else {
        RebootState::Idle
    }
}
