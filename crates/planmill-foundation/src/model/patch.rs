//! File patch and patch-set types.

use crate::checksum::calculate_checksum;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Kind of change within a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Delete,
    Replace,
    Move,
}

impl ChangeKind {
    fn inverse(self) -> Self {
        match self {
            ChangeKind::Insert => ChangeKind::Delete,
            ChangeKind::Delete => ChangeKind::Insert,
            other => other,
        }
    }
}

/// A single change within a file. Lines are 1-based and inclusive.
///
/// `original_text` and `new_text` hold the changed lines exactly, line
/// terminators included, so a change in the final newline is visible.
/// The context lines are shown without their terminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub kind: ChangeKind,
    pub start_line: usize,
    pub end_line: usize,
    pub original_text: String,
    pub new_text: String,
    #[serde(default)]
    pub context_before: String,
    #[serde(default)]
    pub context_after: String,
}

impl Change {
    /// The same change seen from the other side
    pub fn inverse(&self) -> Self {
        Self {
            kind: self.kind.inverse(),
            start_line: self.start_line,
            end_line: self.end_line,
            original_text: self.new_text.clone(),
            new_text: self.original_text.clone(),
            context_before: self.context_before.clone(),
            context_after: self.context_after.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchMetadata {
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub description: String,
    /// Checksum of `new_content`
    pub checksum: String,
}

/// Full before/after image of one file plus the individual changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePatch {
    pub file_path: String,
    pub original_content: String,
    pub new_content: String,
    pub changes: Vec<Change>,
    pub metadata: PatchMetadata,
}

impl FilePatch {
    pub fn new(
        file_path: impl Into<String>,
        original_content: impl Into<String>,
        new_content: impl Into<String>,
        changes: Vec<Change>,
        author: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let new_content = new_content.into();
        Self {
            file_path: file_path.into(),
            original_content: original_content.into(),
            metadata: PatchMetadata {
                timestamp: Utc::now(),
                author: author.into(),
                description: description.into(),
                checksum: calculate_checksum(&new_content),
            },
            new_content,
            changes,
        }
    }

    /// Build a patch whose single change is the differing line range
    ///
    /// Common leading and trailing lines are trimmed; identical contents
    /// produce a patch with no changes.
    pub fn from_contents(
        file_path: impl Into<String>,
        original_content: impl Into<String>,
        new_content: impl Into<String>,
        author: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let original_content = original_content.into();
        let new_content = new_content.into();
        let changes = diff_hunk(&original_content, &new_content)
            .into_iter()
            .collect();
        Self::new(
            file_path,
            original_content,
            new_content,
            changes,
            author,
            description,
        )
    }

    /// The patch that undoes this one
    pub fn inverse(&self) -> Self {
        Self {
            file_path: self.file_path.clone(),
            original_content: self.new_content.clone(),
            new_content: self.original_content.clone(),
            changes: self.changes.iter().map(Change::inverse).collect(),
            metadata: PatchMetadata {
                timestamp: Utc::now(),
                author: self.metadata.author.clone(),
                description: format!("Rollback: {}", self.metadata.description),
                checksum: calculate_checksum(&self.original_content),
            },
        }
    }
}

fn diff_hunk(original: &str, new: &str) -> Option<Change> {
    if original == new {
        return None;
    }
    let old_lines: Vec<&str> = original.split_inclusive('\n').collect();
    let new_lines: Vec<&str> = new.split_inclusive('\n').collect();

    let prefix = old_lines
        .iter()
        .zip(new_lines.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let max_suffix = old_lines.len().min(new_lines.len()) - prefix;
    let suffix = old_lines
        .iter()
        .rev()
        .zip(new_lines.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    let old_mid = &old_lines[prefix..old_lines.len() - suffix];
    let new_mid = &new_lines[prefix..new_lines.len() - suffix];
    let kind = match (old_mid.is_empty(), new_mid.is_empty()) {
        (true, _) => ChangeKind::Insert,
        (false, true) => ChangeKind::Delete,
        (false, false) => ChangeKind::Replace,
    };
    let context_line = |line: &str| line.trim_end_matches(['\n', '\r']).to_string();

    Some(Change {
        kind,
        start_line: prefix + 1,
        end_line: prefix + old_mid.len().max(1),
        original_text: old_mid.concat(),
        new_text: new_mid.concat(),
        context_before: prefix
            .checked_sub(1)
            .and_then(|i| old_lines.get(i))
            .map(|line| context_line(line))
            .unwrap_or_default(),
        context_after: old_lines
            .get(old_lines.len() - suffix)
            .map(|line| context_line(line))
            .unwrap_or_default(),
    })
}

/// Expected blast radius of a patch set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    #[default]
    Low,
    Medium,
    High,
}

impl fmt::Display for Impact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Impact::Low => "low",
            Impact::Medium => "medium",
            Impact::High => "high",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchSetMetadata {
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub total_changes: usize,
    pub files_affected: usize,
    pub estimated_impact: Impact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackVerification {
    /// Combined checksum of every file's pre-change content
    pub checksum: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<String>,
}

/// Inverse patches plus the data needed to verify a restore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackPlan {
    pub patches: Vec<FilePatch>,
    pub verification: RollbackVerification,
    pub instructions: Vec<String>,
}

/// An atomic, named bundle of file changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchSet {
    pub id: String,
    pub name: String,
    pub description: String,
    pub patches: Vec<FilePatch>,
    pub metadata: PatchSetMetadata,
    /// Other patch-set ids; reserved, not interpreted yet
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_plan: Option<RollbackPlan>,
}

impl PatchSet {
    pub fn files(&self) -> BTreeSet<&str> {
        self.patches.iter().map(|p| p.file_path.as_str()).collect()
    }
}

/// Content of a file captured at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSnapshot {
    pub file_path: String,
    pub content: String,
    pub checksum: String,
    /// The file did not exist when the snapshot was taken
    #[serde(default)]
    pub missing: bool,
}

impl FileSnapshot {
    pub fn new(file_path: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            file_path: file_path.into(),
            checksum: calculate_checksum(&content),
            content,
            missing: false,
        }
    }

    pub fn missing(file_path: impl Into<String>) -> Self {
        Self {
            missing: true,
            ..Self::new(file_path, "")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOptions {
    /// Run the patch check against the live filesystem
    pub validate: bool,
    /// Snapshot every patch's original content
    pub backup: bool,
    pub generate_rollback: bool,
    pub created_by: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            validate: false,
            backup: true,
            generate_rollback: true,
            created_by: "planmill".to_string(),
            dependencies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOptions {
    pub dry_run: bool,
    pub backup: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchFailure {
    pub file_path: String,
    pub error: String,
}

/// Per-file outcome of applying a patch set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    pub success: bool,
    pub applied_patches: Vec<String>,
    pub failed_patches: Vec<PatchFailure>,
    pub rollback_data: Vec<FileSnapshot>,
}

impl ApplyReport {
    pub fn failed_paths(&self) -> Vec<&str> {
        self.failed_patches
            .iter()
            .map(|f| f.file_path.as_str())
            .collect()
    }
}

/// Per-file outcome of rolling back a patch set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackReport {
    pub success: bool,
    pub rolled_back_patches: Vec<String>,
    pub failed_patches: Vec<PatchFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_inverse_swaps_content_and_change_text() {
        let patch = FilePatch::from_contents(
            "src/lib.rs",
            "fn a() {}\nfn b() {}\n",
            "fn a() {}\nfn renamed() {}\n",
            "tester",
            "rename b",
        );
        assert_eq!(patch.changes.len(), 1);
        assert_eq!(patch.changes[0].kind, ChangeKind::Replace);
        assert_eq!(patch.changes[0].start_line, 2);

        let inverse = patch.inverse();
        assert_eq!(inverse.original_content, patch.new_content);
        assert_eq!(inverse.new_content, patch.original_content);
        assert_eq!(inverse.changes[0].original_text, "fn renamed() {}\n");
        assert_eq!(inverse.changes[0].new_text, "fn b() {}\n");
        assert_eq!(
            inverse.metadata.checksum,
            calculate_checksum(&patch.original_content)
        );
        assert_eq!(inverse.inverse().new_content, patch.new_content);
    }

    #[test]
    fn test_from_contents_insert_and_delete() {
        let insert = FilePatch::from_contents("f", "a\nc", "a\nb\nc", "t", "insert");
        assert_eq!(insert.changes[0].kind, ChangeKind::Insert);
        assert_eq!(insert.changes[0].new_text, "b\n");
        assert_eq!(insert.changes[0].context_before, "a");
        assert_eq!(insert.changes[0].context_after, "c");

        let delete = FilePatch::from_contents("f", "a\nb\nc", "a\nc", "t", "delete");
        assert_eq!(delete.changes[0].kind, ChangeKind::Delete);
        assert_eq!(delete.changes[0].original_text, "b\n");
        assert_eq!(delete.inverse().changes[0].kind, ChangeKind::Insert);
    }

    #[test]
    fn test_trailing_newline_change_is_a_replace() {
        let patch = FilePatch::from_contents("f", "a\n", "a", "t", "strip newline");
        assert_eq!(patch.changes.len(), 1);
        let change = &patch.changes[0];
        assert_eq!(change.kind, ChangeKind::Replace);
        assert_eq!((change.start_line, change.end_line), (1, 1));
        assert_eq!(change.original_text, "a\n");
        assert_eq!(change.new_text, "a");

        let appended = FilePatch::from_contents("f", "a\nb", "a\nb\n", "t", "add newline");
        assert_eq!(appended.changes[0].start_line, 2);
        assert_eq!(appended.changes[0].context_before, "a");
        assert_eq!(appended.changes[0].new_text, "b\n");
    }

    #[test]
    fn test_identical_contents_have_no_changes() {
        let patch = FilePatch::from_contents("f", "same", "same", "t", "noop");
        assert!(patch.changes.is_empty());
    }

    #[test]
    fn test_missing_snapshot() {
        let snapshot = FileSnapshot::missing("new.rs");
        assert!(snapshot.missing);
        assert!(snapshot.content.is_empty());
    }
}
