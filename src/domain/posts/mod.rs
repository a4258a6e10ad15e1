//! Scheduled post domain - models and queries

pub mod models;
pub mod queries;

// Re-export models for convenience
pub use models::*;
