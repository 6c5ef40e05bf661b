//! Core domain types for the consolidation engine.

mod audit;
mod candidate;
mod entity;
mod pattern;
mod relationship;

pub use audit::*;
pub use candidate::*;
pub use entity::*;
pub use pattern::*;
pub use relationship::*;
