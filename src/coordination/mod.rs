//! Coordination layer.
//!
//! Process-wide controls shared by every concurrently evaluating job: the
//! safety guard with its circuit breaker and audit trail.

pub mod safety_guard;

pub use safety_guard::{SafetyContext, SafetyDecision, SafetyGuard};
