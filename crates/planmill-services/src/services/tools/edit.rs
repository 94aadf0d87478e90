//! Find/replace edits producing file patches

use super::{parameter_mismatch, ExecutionContext, ToolExecutor};
use async_trait::async_trait;
use planmill_foundation::model::{
    tool_names, EditInstruction, FilePatch, FileSnapshot, PlanNode, RollbackData, ToolData,
    ToolParams, ToolResult,
};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};

const AUTHOR: &str = "planmill";

/// Applies find/replace instructions and reports them as [`FilePatch`]es
#[derive(Debug, Default)]
pub struct EditExecutor;

impl EditExecutor {
    pub fn new() -> Self {
        Self
    }
}

/// Pending change to one file
struct FileEdit {
    relative: String,
    absolute: PathBuf,
    original: String,
    updated: String,
}

#[async_trait]
impl ToolExecutor for EditExecutor {
    fn name(&self) -> &str {
        tool_names::EDIT
    }

    async fn execute(&self, node: &PlanNode, ctx: &ExecutionContext) -> ToolResult {
        let params = match &node.parameters {
            Some(ToolParams::Edit(params)) => params,
            _ => return parameter_mismatch(node, tool_names::EDIT),
        };
        let start = Instant::now();

        // Group instructions by file, preserving first-seen order
        let mut grouped: Vec<(&str, Vec<&EditInstruction>)> = Vec::new();
        for edit in &params.edits {
            match grouped.iter().position(|(path, _)| *path == edit.file_path) {
                Some(index) => grouped[index].1.push(edit),
                None => grouped.push((edit.file_path.as_str(), vec![edit])),
            }
        }

        let mut pending = Vec::with_capacity(grouped.len());
        for (path, edits) in grouped {
            let absolute = match ctx.resolve(path) {
                Ok(absolute) => absolute,
                Err(e) => return ToolResult::failure(e, false),
            };
            let original = match tokio::fs::read_to_string(&absolute).await {
                Ok(content) => content,
                Err(e) => {
                    return ToolResult::failure(format!("Failed to read {}: {}", path, e), false)
                }
            };
            let updated = match apply_instructions(&original, &edits) {
                Ok(updated) => updated,
                Err(e) => return ToolResult::failure(format!("{}: {}", path, e), false),
            };
            pending.push(FileEdit {
                relative: path.to_string(),
                absolute,
                original,
                updated,
            });
        }

        let patches: Vec<FilePatch> = pending
            .iter()
            .map(|edit| {
                FilePatch::from_contents(
                    edit.relative.clone(),
                    edit.original.clone(),
                    edit.updated.clone(),
                    AUTHOR,
                    params.description.clone(),
                )
            })
            .collect();

        if ctx.dry_run {
            debug!(node_id = %node.id, files = patches.len(), "Dry run, edits not written");
            return ToolResult::success(ToolData::Patches { patches })
                .with_execution_time(start.elapsed().as_millis() as u64);
        }

        // Write everything or restore what was already written
        for (index, edit) in pending.iter().enumerate() {
            if let Err(e) = tokio::fs::write(&edit.absolute, &edit.updated).await {
                error!(
                    node_id = %node.id,
                    file_path = %edit.relative,
                    error = %e,
                    "Failed to write edit, restoring earlier files"
                );
                for written in &pending[..index] {
                    let restored = tokio::fs::write(&written.absolute, &written.original).await;
                    if let Err(restore_err) = restored {
                        warn!(
                            file_path = %written.relative,
                            error = %restore_err,
                            "Failed to restore file after aborted edit"
                        );
                    }
                }
                return ToolResult::failure(
                    format!("Failed to write {}: {}", edit.relative, e),
                    true,
                );
            }
        }

        info!(node_id = %node.id, files = patches.len(), "Applied edits");

        let mut result = ToolResult::success(ToolData::Patches { patches })
            .with_execution_time(start.elapsed().as_millis() as u64);
        if params.backup && ctx.backup {
            result = result.with_rollback_data(RollbackData {
                snapshots: pending
                    .into_iter()
                    .map(|edit| FileSnapshot::new(edit.relative, edit.original))
                    .collect(),
            });
        }
        result
    }

    async fn rollback(&self, result: &ToolResult, ctx: &ExecutionContext) -> bool {
        let snapshots = restore_points(result);
        if snapshots.is_empty() {
            return true;
        }
        let failures = restore_snapshots(ctx, &snapshots).await;
        failures.is_empty()
    }
}

/// Snapshots recorded in a result, falling back to the patches' pre-images
pub(crate) fn restore_points(result: &ToolResult) -> Vec<FileSnapshot> {
    if let Some(rollback) = &result.rollback_data {
        return rollback.snapshots.clone();
    }
    result
        .data
        .patches()
        .map(|patches| {
            patches
                .iter()
                .map(|p| FileSnapshot::new(p.file_path.clone(), p.original_content.clone()))
                .collect()
        })
        .unwrap_or_default()
}

/// Restore snapshots in reverse order; returns `(file, error)` for each failure
pub(crate) async fn restore_snapshots(
    ctx: &ExecutionContext,
    snapshots: &[FileSnapshot],
) -> Vec<(String, String)> {
    let mut failures = Vec::new();
    for snapshot in snapshots.iter().rev() {
        let absolute = match ctx.resolve(&snapshot.file_path) {
            Ok(absolute) => absolute,
            Err(e) => {
                failures.push((snapshot.file_path.clone(), e));
                continue;
            }
        };
        let outcome = if snapshot.missing {
            match tokio::fs::remove_file(&absolute).await {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            }
        } else {
            tokio::fs::write(&absolute, &snapshot.content).await
        };
        match outcome {
            Ok(()) => debug!(file_path = %snapshot.file_path, "Restored snapshot"),
            Err(e) => failures.push((snapshot.file_path.clone(), e.to_string())),
        }
    }
    failures
}

fn apply_instructions(original: &str, edits: &[&EditInstruction]) -> Result<String, String> {
    let mut content = original.to_string();
    for edit in edits {
        if edit.find.is_empty() {
            return Err("edit has an empty search text".to_string());
        }
        if !content.contains(&edit.find) {
            return Err(format!("text to replace not found: {:?}", edit.find));
        }
        content = if edit.replace_all {
            content.replace(&edit.find, &edit.replace)
        } else {
            content.replacen(&edit.find, &edit.replace, 1)
        };
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use planmill_foundation::calculate_checksum;
    use planmill_foundation::model::{EditParams, NodeKind};
    use tempfile::TempDir;

    fn instruction(file: &str, find: &str, replace: &str) -> EditInstruction {
        EditInstruction {
            file_path: file.into(),
            find: find.into(),
            replace: replace.into(),
            replace_all: false,
        }
    }

    fn edit_node(edits: Vec<EditInstruction>, backup: bool) -> PlanNode {
        let mut node = PlanNode::new("tool-2-edit", NodeKind::Tool, "edit");
        node.tool = Some("edit".into());
        node.parameters = Some(ToolParams::Edit(EditParams {
            edits,
            backup,
            description: "rename".into(),
        }));
        node
    }

    #[tokio::test]
    async fn test_edit_writes_and_snapshots() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn old() {}\nfn keep() {}\n").unwrap();

        let ctx = ExecutionContext::new(dir.path());
        let node = edit_node(vec![instruction("a.rs", "old", "new")], true);
        let result = EditExecutor::new().execute(&node, &ctx).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.rs")).unwrap(),
            "fn new() {}\nfn keep() {}\n"
        );

        let patches = result.data.patches().unwrap();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].changes.len(), 1);
        assert_eq!(patches[0].changes[0].start_line, 1);
        assert_eq!(
            patches[0].metadata.checksum,
            calculate_checksum("fn new() {}\nfn keep() {}\n")
        );

        let snapshots = &result.rollback_data.as_ref().unwrap().snapshots;
        assert_eq!(snapshots[0].content, "fn old() {}\nfn keep() {}\n");

        assert!(EditExecutor::new().rollback(&result, &ctx).await);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.rs")).unwrap(),
            "fn old() {}\nfn keep() {}\n"
        );
    }

    #[tokio::test]
    async fn test_dry_run_leaves_files_untouched() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn old() {}\n").unwrap();

        let ctx = ExecutionContext::new(dir.path()).with_dry_run(true);
        let node = edit_node(vec![instruction("a.rs", "old", "new")], true);
        let result = EditExecutor::new().execute(&node, &ctx).await;

        assert!(result.success);
        assert!(result.rollback_data.is_none());
        assert_eq!(result.data.patches().unwrap()[0].new_content, "fn new() {}\n");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.rs")).unwrap(),
            "fn old() {}\n"
        );
    }

    #[tokio::test]
    async fn test_missing_text_fails_without_writing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}\n").unwrap();
        std::fs::write(dir.path().join("b.rs"), "fn b() {}\n").unwrap();

        let ctx = ExecutionContext::new(dir.path());
        let node = edit_node(
            vec![
                instruction("a.rs", "fn a", "fn aa"),
                instruction("b.rs", "does not exist", "x"),
            ],
            true,
        );
        let result = EditExecutor::new().execute(&node, &ctx).await;

        assert!(!result.success);
        assert!(!EditExecutor::new().can_retry(&result));
        assert_eq!(std::fs::read_to_string(dir.path().join("a.rs")).unwrap(), "fn a() {}\n");
    }

    #[tokio::test]
    async fn test_multiple_edits_to_one_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.rs"), "x x y").unwrap();

        let ctx = ExecutionContext::new(dir.path()).with_backup(false);
        let mut all = instruction("a.rs", "x", "z");
        all.replace_all = true;
        let node = edit_node(vec![all, instruction("a.rs", "y", "w")], true);
        let result = EditExecutor::new().execute(&node, &ctx).await;

        assert!(result.success);
        assert!(result.rollback_data.is_none());
        assert_eq!(std::fs::read_to_string(dir.path().join("a.rs")).unwrap(), "z z w");
    }

    #[tokio::test]
    async fn test_restore_snapshots_removes_created_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("new.rs"), "created").unwrap();

        let ctx = ExecutionContext::new(dir.path());
        let failures = restore_snapshots(&ctx, &[FileSnapshot::missing("new.rs")]).await;
        assert!(failures.is_empty());
        assert!(!dir.path().join("new.rs").exists());
    }
}
