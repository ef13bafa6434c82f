//! Application layer: the per-job scan orchestrator and the rule engine.

pub mod orchestrator;
pub mod rules;
