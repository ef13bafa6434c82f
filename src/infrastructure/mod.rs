//! Infrastructure: scheduler, sandbox manager, browser driver and the
//! external collaborator seams.

pub mod audit;
pub mod browser;
pub mod sandbox;
pub mod scheduler;
pub mod store;
