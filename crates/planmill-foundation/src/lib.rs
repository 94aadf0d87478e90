//! Foundation Layer - Core types shared by every planmill crate
//!
//! This crate provides the building blocks for the planning engine:
//! - Intent classification results and request context
//! - Plan graph nodes, edges and validation reports
//! - Tool execution results
//! - File patches, patch sets and rollback plans
//! - The error taxonomy and content checksums

pub mod checksum;
pub mod error;
pub mod model;

// Re-export commonly used types for convenience
pub use checksum::calculate_checksum;
pub use error::{PlanError, PlanResult};
pub use model::*;
