//! Domain entities and value objects.

pub mod issue;
pub mod job;
pub mod page;
pub mod result;
pub mod sandbox;
