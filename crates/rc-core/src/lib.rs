//! rc-core: shared types, IDs, errors, and configuration.
//!
//! This crate is the foundational dependency for the other rc-* crates,
//! providing type-safe identifiers, the unified error type used by the
//! transcoding pipeline, the read-only media model consumed from the
//! catalog, and application configuration.

pub mod config;
pub mod error;
pub mod ids;
pub mod media;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::*;
pub use media::*;
