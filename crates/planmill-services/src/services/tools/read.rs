//! Reads target files inside the project root

use super::{parameter_mismatch, ExecutionContext, ToolExecutor};
use async_trait::async_trait;
use planmill_foundation::calculate_checksum;
use planmill_foundation::model::{
    tool_names, FileContent, PlanNode, ToolData, ToolParams, ToolResult,
};
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Default)]
pub struct ReadExecutor;

impl ReadExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolExecutor for ReadExecutor {
    fn name(&self) -> &str {
        tool_names::READ
    }

    async fn execute(&self, node: &PlanNode, ctx: &ExecutionContext) -> ToolResult {
        let paths = match &node.parameters {
            Some(ToolParams::Read(params)) => &params.paths,
            _ => return parameter_mismatch(node, tool_names::READ),
        };

        let start = Instant::now();
        let mut files = Vec::with_capacity(paths.len());

        for path in paths {
            let absolute = match ctx.resolve(path) {
                Ok(absolute) => absolute,
                Err(e) => return ToolResult::failure(e, false),
            };
            match tokio::fs::read_to_string(&absolute).await {
                Ok(content) => files.push(FileContent {
                    file_path: path.clone(),
                    checksum: calculate_checksum(&content),
                    content,
                }),
                Err(e) => {
                    // A missing file will not appear on retry
                    let retryable = e.kind() != std::io::ErrorKind::NotFound;
                    return ToolResult::failure(
                        format!("Failed to read {}: {}", path, e),
                        retryable,
                    );
                }
            }
        }

        debug!(node_id = %node.id, files = files.len(), "Read target files");
        ToolResult::success(ToolData::Files { files })
            .with_execution_time(start.elapsed().as_millis() as u64)
    }
}
