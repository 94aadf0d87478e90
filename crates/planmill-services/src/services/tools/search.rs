//! Literal text search across the project tree

use super::{parameter_mismatch, ExecutionContext, ToolExecutor};
use async_trait::async_trait;
use ignore::WalkBuilder;
use planmill_foundation::model::{
    tool_names, PlanNode, SearchMatch, SearchParams, ToolData, ToolParams, ToolResult,
};
use std::path::Path;
use std::time::Instant;
use tracing::debug;

/// Case-insensitive literal search honouring `.gitignore`
#[derive(Debug, Default)]
pub struct SearchExecutor;

impl SearchExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolExecutor for SearchExecutor {
    fn name(&self) -> &str {
        tool_names::SEARCH
    }

    async fn execute(&self, node: &PlanNode, ctx: &ExecutionContext) -> ToolResult {
        let params = match &node.parameters {
            Some(ToolParams::Search(params)) => params.clone(),
            _ => return parameter_mismatch(node, tool_names::SEARCH),
        };

        if params.query.trim().is_empty() {
            return ToolResult::failure("Search query is empty", false);
        }

        let start_dir = match params.path.as_deref() {
            Some(sub) => match ctx.resolve(sub) {
                Ok(path) => path,
                Err(e) => return ToolResult::failure(e, false),
            },
            None => ctx.project_root.clone(),
        };
        if !start_dir.exists() {
            return ToolResult::failure(
                format!("Search path '{}' does not exist", start_dir.display()),
                false,
            );
        }

        let start = Instant::now();
        let root = ctx.project_root.clone();
        let walk = tokio::task::spawn_blocking(move || search_tree(&root, &start_dir, &params));

        match walk.await {
            Ok((matches, truncated)) => {
                debug!(
                    node_id = %node.id,
                    matches = matches.len(),
                    truncated,
                    "Search completed"
                );
                ToolResult::success(ToolData::Search { matches, truncated })
                    .with_execution_time(start.elapsed().as_millis() as u64)
            }
            Err(e) => ToolResult::failure(format!("Search task failed: {}", e), true),
        }
    }
}

fn search_tree(root: &Path, start_dir: &Path, params: &SearchParams) -> (Vec<SearchMatch>, bool) {
    let needle = params.query.to_lowercase();
    let mut matches = Vec::new();

    let walker = WalkBuilder::new(start_dir)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    for entry in walker.flatten() {
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        // Binary and non-UTF-8 files are skipped
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");

        for (index, line) in content.lines().enumerate() {
            if !line.to_lowercase().contains(&needle) {
                continue;
            }
            if matches.len() == params.max_results {
                return (matches, true);
            }
            matches.push(SearchMatch {
                file_path: relative.clone(),
                line: index + 1,
                text: line.trim().to_string(),
            });
        }
    }

    (matches, false)
}
