//! Pre-flight safety checks and restore-point handling

use super::edit::{restore_points, restore_snapshots};
use super::{parameter_mismatch, ExecutionContext, ToolExecutor};
use crate::services::planning::builder::conditions::{
    BACKUP_ENABLED, PROJECT_ROOT_EXISTS, TARGETS_EXIST,
};
use async_trait::async_trait;
use planmill_foundation::model::{tool_names, PlanNode, ToolData, ToolParams, ToolResult};
use serde_json::json;
use tracing::{info, warn};

/// Target files that are missing or outside the project root
pub(crate) async fn missing_targets(ctx: &ExecutionContext, files: &[String]) -> Vec<String> {
    let mut missing = Vec::new();
    for file in files {
        let exists = match ctx.resolve(file) {
            Ok(path) => tokio::fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        };
        if !exists {
            missing.push(file.clone());
        }
    }
    missing
}

/// Verifies the environment before anything is modified
#[derive(Debug, Default)]
pub struct SafetyCheckExecutor;

impl SafetyCheckExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolExecutor for SafetyCheckExecutor {
    fn name(&self) -> &str {
        tool_names::SAFETY_CHECK
    }

    async fn execute(&self, node: &PlanNode, ctx: &ExecutionContext) -> ToolResult {
        let params = match &node.parameters {
            Some(ToolParams::SafetyCheck(params)) => params,
            _ => return parameter_mismatch(node, tool_names::SAFETY_CHECK),
        };

        let mut outcomes = Vec::with_capacity(params.checks.len());
        let mut failed = Vec::new();

        for check in &params.checks {
            let (passed, detail) = match check.as_str() {
                PROJECT_ROOT_EXISTS => (
                    ctx.project_root.is_dir(),
                    ctx.project_root.display().to_string(),
                ),
                TARGETS_EXIST => {
                    let missing = missing_targets(ctx, &params.target_files).await;
                    (missing.is_empty(), missing.join(", "))
                }
                BACKUP_ENABLED => (ctx.backup, String::new()),
                other => (false, format!("unknown check '{}'", other)),
            };
            if !passed {
                failed.push(check.clone());
            }
            outcomes.push(json!({ "name": check, "passed": passed, "detail": detail }));
        }

        let data = ToolData::json(json!({ "checks": outcomes }));
        if failed.is_empty() {
            ToolResult::success(data)
        } else {
            warn!(node_id = %node.id, failed = ?failed, "Safety checks failed");
            ToolResult::failure(format!("Safety checks failed: {}", failed.join(", ")), false)
                .with_data(data)
        }
    }
}

/// Verifies, and optionally restores, the restore points of earlier edits
#[derive(Debug, Default)]
pub struct RollbackExecutor;

impl RollbackExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolExecutor for RollbackExecutor {
    fn name(&self) -> &str {
        tool_names::ROLLBACK
    }

    async fn execute(&self, node: &PlanNode, ctx: &ExecutionContext) -> ToolResult {
        let restore = match &node.parameters {
            Some(ToolParams::Rollback(params)) => params.restore,
            _ => return parameter_mismatch(node, tool_names::ROLLBACK),
        };

        let edits: Vec<(&str, &ToolResult)> = ctx
            .completed_results()
            .filter(|(_, r)| r.success && r.data.patches().is_some_and(|p| !p.is_empty()))
            .collect();

        // Dry-run edits wrote nothing, so they need no restore point
        let unprotected: Vec<&str> = edits
            .iter()
            .filter(|(_, r)| r.rollback_data.is_none() && !ctx.dry_run)
            .map(|(id, _)| *id)
            .collect();
        if !unprotected.is_empty() {
            return ToolResult::failure(
                format!("No restore point for: {}", unprotected.join(", ")),
                false,
            );
        }

        let mut restored_files = Vec::new();
        if restore && !ctx.dry_run {
            // Undo the latest edit first
            for (id, result) in edits.iter().rev() {
                let snapshots = restore_points(result);
                let failures = restore_snapshots(ctx, &snapshots).await;
                if !failures.is_empty() {
                    let files: Vec<String> = failures
                        .into_iter()
                        .map(|(file, e)| format!("{} ({})", file, e))
                        .collect();
                    return ToolResult::failure(
                        format!("Failed to restore {} from '{}'", files.join(", "), id),
                        true,
                    );
                }
                restored_files.extend(snapshots.into_iter().map(|s| s.file_path));
            }
            info!(node_id = %node.id, files = restored_files.len(), "Restored edits");
        }

        ToolResult::success(ToolData::json(json!({
            "restorePoints": edits.len(),
            "restored": restore && !ctx.dry_run,
            "files": restored_files,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use planmill_foundation::model::{
        FilePatch, FileSnapshot, NodeKind, RollbackData, RollbackParams, SafetyCheckParams,
    };
    use std::sync::Arc;
    use tempfile::TempDir;

    fn safety_node(checks: &[&str], targets: &[&str]) -> PlanNode {
        let mut node = PlanNode::new("tool-5-safety-check", NodeKind::Tool, "safety-check");
        node.tool = Some("safety-check".into());
        node.parameters = Some(ToolParams::SafetyCheck(SafetyCheckParams {
            checks: checks.iter().map(|c| c.to_string()).collect(),
            target_files: targets.iter().map(|t| t.to_string()).collect(),
        }));
        node
    }

    fn rollback_node(restore: bool) -> PlanNode {
        let mut node = PlanNode::new("tool-6-rollback", NodeKind::Tool, "rollback");
        node.tool = Some("rollback".into());
        node.parameters = Some(ToolParams::Rollback(RollbackParams { restore }));
        node
    }

    fn with_prior(ctx: ExecutionContext, results: Vec<(&str, ToolResult)>) -> ExecutionContext {
        let map: IndexMap<String, ToolResult> =
            results.into_iter().map(|(id, r)| (id.to_string(), r)).collect();
        ExecutionContext {
            prior_results: Arc::new(map),
            ..ctx
        }
    }

    fn edit_result(file: &str, before: &str, after: &str, backup: bool) -> ToolResult {
        let patch = FilePatch::from_contents(file, before, after, "test", "edit");
        let result = ToolResult::success(ToolData::Patches {
            patches: vec![patch],
        });
        if backup {
            result.with_rollback_data(RollbackData {
                snapshots: vec![FileSnapshot::new(file, before)],
            })
        } else {
            result
        }
    }

    #[tokio::test]
    async fn test_safety_checks_pass() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.rs"), "").unwrap();
        let ctx = ExecutionContext::new(dir.path());

        let result = SafetyCheckExecutor::new()
            .execute(
                &safety_node(&[PROJECT_ROOT_EXISTS, TARGETS_EXIST, BACKUP_ENABLED], &["a.rs"]),
                &ctx,
            )
            .await;
        assert!(result.success, "{:?}", result.error);
    }

    #[tokio::test]
    async fn test_safety_checks_report_failures() {
        let dir = TempDir::new().unwrap();
        let ctx = ExecutionContext::new(dir.path()).with_backup(false);

        let result = SafetyCheckExecutor::new()
            .execute(
                &safety_node(&[TARGETS_EXIST, BACKUP_ENABLED, "bogus"], &["missing.rs"]),
                &ctx,
            )
            .await;
        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.contains(TARGETS_EXIST));
        assert!(error.contains(BACKUP_ENABLED));
        assert!(error.contains("bogus"));
    }

    #[tokio::test]
    async fn test_rollback_verifies_restore_points() {
        let dir = TempDir::new().unwrap();
        let ctx = with_prior(
            ExecutionContext::new(dir.path()),
            vec![("tool-2-edit", edit_result("a.rs", "old", "new", false))],
        );
        let result = RollbackExecutor::new().execute(&rollback_node(false), &ctx).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("tool-2-edit"));
    }

    #[tokio::test]
    async fn test_rollback_restores_in_reverse_order() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.rs"), "third").unwrap();
        let ctx = with_prior(
            ExecutionContext::new(dir.path()),
            vec![
                ("tool-2-edit", edit_result("a.rs", "first", "second", true)),
                ("tool-3-edit", edit_result("a.rs", "second", "third", true)),
            ],
        );

        let result = RollbackExecutor::new().execute(&rollback_node(true), &ctx).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(std::fs::read_to_string(dir.path().join("a.rs")).unwrap(), "first");
    }

    #[tokio::test]
    async fn test_rollback_without_restore_leaves_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.rs"), "new").unwrap();
        let ctx = with_prior(
            ExecutionContext::new(dir.path()),
            vec![("tool-2-edit", edit_result("a.rs", "old", "new", true))],
        );

        let result = RollbackExecutor::new().execute(&rollback_node(false), &ctx).await;
        assert!(result.success);
        assert_eq!(std::fs::read_to_string(dir.path().join("a.rs")).unwrap(), "new");
    }
}
