//! Uplink reaction engine: the per-uplink pipeline, the ordered rules and
//! the two downlink protocols they drive.

pub mod almanac;
pub mod assistance;
pub mod coordinator;
pub mod rules;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{UplinkCoordinator, UplinkOutcome};
pub use rules::{Rule, RuleContext, RuleEngine};
