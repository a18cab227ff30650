//! Domain types and DTOs
//!
//! These types define the data structures flowing through the intake pipeline.

pub mod documents;
pub mod extraction;
pub mod jobs;
pub mod mapping;

// Re-export commonly used types
pub use documents::*;
pub use jobs::*;
pub use mapping::*;

// Extraction schema types are accessed via crate::domain::extraction:: to avoid namespace pollution
