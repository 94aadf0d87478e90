//! Plan generation and validation

pub mod builder;
pub mod validator;

pub use builder::{BuildOptions, PlanGraphBuilder, DECISION_NODE_ID, VERIFICATION_NODE_ID};
pub use validator::PlanValidator;
