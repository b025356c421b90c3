//! Belay engine: ephemeral namespace tracking, the condition-wait state
//! machine, and the permission probe.

#![forbid(unsafe_code)]

pub mod access;
pub mod namespace;
pub mod wait;

pub use access::{probe, AccessOutcome};
pub use namespace::{generate_id, NamespaceTracker};
pub use wait::{condition_matches, wait_for_condition, WaitOutcome, WaitSpec};
