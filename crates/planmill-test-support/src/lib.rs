//! Test support utilities and fixtures for planmill integration tests

pub mod helpers;
pub mod mocks;

// Re-export commonly used helpers
pub use helpers::{create_test_config, create_test_intent, rename_context, TestProject};
pub use mocks::{mock_tool, MockPatchCheck, MockToolExecutor};
