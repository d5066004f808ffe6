//! Domain layer types and invariants.

pub mod encoded;
pub mod entities;
pub mod error;
pub mod model;
pub mod types;
