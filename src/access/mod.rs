//! Access decisions: the classification and role registries plus the pure
//! permission evaluator built on them.

pub mod classification;
pub mod policy;
pub mod role;

pub use classification::SecurityLevel;
pub use policy::{evaluate, evaluate_creation, Decision, DecisionOutcome, DecisionReason};
pub use role::Role;
