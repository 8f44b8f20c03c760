//! Domain models for the warranty core
//!
//! Documents, entity kinds, counter holders and role templates.

mod document;
mod entity;
mod holder;
mod role;
mod types;

pub use document::*;
pub use entity::*;
pub use holder::*;
pub use role::*;
pub use types::*;
