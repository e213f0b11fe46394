//! Reboot Lifecycle Definitions
//!
//! Annotation keys, the derived `RebootState` and the transition table shared by
//! the reboot controller and the reboot agent.
//!
//! The annotation keys are the wire contract between the two processes. Everything
//! else in this crate is an in-process view over those keys.

pub mod annotations;
pub mod state;
pub mod transitions;

pub use annotations::*;
pub use state::*;
pub use transitions::*;
