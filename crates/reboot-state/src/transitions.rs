//! Reboot lifecycle transition table
//!
//! ```text
//! Idle --(external request)--> Requested --(controller admits)--> Now
//!      --(agent starts reboot)--> InProgress --(agent back up)--> Idle
//! ```
//!
//! Every transition is applied to a cloned record and written back with a
//! conditional update, so a transition that loses a race can be retried from
//! the same source state.

use crate::annotations::{
    marker_value, Annotations, REBOOT_IN_PROGRESS, REBOOT_NOW, REBOOT_REQUESTED,
};
use crate::state::{derive_state, RebootState};
use serde::Serialize;

/// Who is allowed to perform a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Actor {
    /// Operator or health signal outside this system
    External,
    /// The cluster-wide reboot controller
    Controller,
    /// The per-machine reboot agent
    Agent,
}

/// One edge of the reboot state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State the machine must be in
    pub from: RebootState,
    /// State the machine ends up in
    pub to: RebootState,
    /// Component that performs the transition
    pub actor: Actor,
    /// Marker added by the transition, if any
    pub sets: Option<&'static str>,
    /// Markers removed by the transition
    pub clears: &'static [&'static str],
}

/// The complete reboot lifecycle.
pub const TRANSITIONS: &[Transition] = &[
    Transition {
        from: RebootState::Idle,
        to: RebootState::Requested,
        actor: Actor::External,
        sets: Some(REBOOT_REQUESTED),
        clears: &[],
    },
    Transition {
        from: RebootState::Requested,
        to: RebootState::Now,
        actor: Actor::Controller,
        sets: Some(REBOOT_NOW),
        clears: &[REBOOT_REQUESTED],
    },
    Transition {
        from: RebootState::Now,
        to: RebootState::InProgress,
        actor: Actor::Agent,
        sets: Some(REBOOT_IN_PROGRESS),
        clears: &[REBOOT_NOW, REBOOT_REQUESTED],
    },
    Transition {
        from: RebootState::InProgress,
        to: RebootState::Idle,
        actor: Actor::Agent,
        sets: None,
        clears: &[REBOOT_IN_PROGRESS],
    },
];

/// Looks up the transition `actor` may perform from `from`.
#[must_use]
pub fn transition_for(from: RebootState, actor: Actor) -> Option<&'static Transition> {
    TRANSITIONS
        .iter()
        .find(|t| t.from == from && t.actor == actor)
}

impl Transition {
    /// Applies the transition to an annotation set in place.
    ///
    /// The caller owns `annotations`; it must be a clone of the cached record.
    pub fn apply(&self, annotations: &mut Annotations) {
        for key in self.clears {
            annotations.remove(*key);
        }
        if let Some(key) = self.sets {
            annotations.insert(key.to_string(), marker_value());
        }
    }

    /// Returns true if applying this transition to `annotations` lands in `to`.
    #[must_use]
    pub fn lands_in_target(&self, annotations: &Annotations) -> bool {
        let mut next = annotations.clone();
        self.apply(&mut next);
        derive_state(&next) == self.to
    }
}
