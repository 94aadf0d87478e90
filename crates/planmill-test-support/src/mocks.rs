//! Mock implementations for testing

use async_trait::async_trait;
use mockall::mock;
use planmill_foundation::model::{FilePatch, PlanNode, ToolResult};
use planmill_services::services::tools::{ExecutionContext, ToolExecutor};
use planmill_services::services::PatchCheck;
use std::path::Path;

mock! {
    pub ToolExecutor {}

    #[async_trait]
    impl ToolExecutor for ToolExecutor {
        fn name(&self) -> &str;
        async fn execute(&self, node: &PlanNode, ctx: &ExecutionContext) -> ToolResult;
        fn can_retry(&self, result: &ToolResult) -> bool;
    }
}

mock! {
    pub PatchCheck {}

    #[async_trait]
    impl PatchCheck for PatchCheck {
        async fn check(&self, project_root: &Path, patch: &FilePatch) -> Result<(), String>;
    }
}

/// Mock executor registered under `name`
///
/// `can_retry` defers to the result's own flag unless overridden.
pub fn mock_tool(name: &str) -> MockToolExecutor {
    let mut tool = MockToolExecutor::new();
    tool.expect_name().return_const(name.to_string());
    tool.expect_can_retry().returning(|result| result.retryable);
    tool
}
