//! axscan — sandboxed accessibility scan pipeline.
//!
//! The crate is organised in three layers:
//!
//! - [`domain`]: jobs, results, issues, page snapshots, sandbox specs and
//!   audit records. Plain serde-derived data with validation at the edges.
//! - [`application`]: the per-job scan orchestrator and the WCAG rule engine.
//! - [`infrastructure`]: the priority scheduler and worker pool, the sandbox
//!   manager over a pluggable container runtime, the browser driver seam, and
//!   the result-store / audit-log collaborator traits.
//!
//! Entry point for producers is [`ScanScheduler::enqueue`]; everything else
//! happens on the worker pool.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod logging;

pub use application::orchestrator::ScanOrchestrator;
pub use application::rules::RuleEngine;
pub use config::Config;
pub use infrastructure::sandbox::SandboxManager;
pub use infrastructure::scheduler::ScanScheduler;
pub use logging::init_tracing;
