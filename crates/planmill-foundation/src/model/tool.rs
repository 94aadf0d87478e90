//! Tool execution results.

use super::patch::{FilePatch, FileSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMatch {
    pub file_path: String,
    /// 1-based
    pub line: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileContent {
    pub file_path: String,
    pub content: String,
    pub checksum: String,
}

/// Captured outcome of an external command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// No command was configured, nothing ran
    #[serde(default)]
    pub skipped: bool,
}

/// Typed payload produced by a tool.
///
/// `Patches` is the only edit-shaped variant; the orchestrator builds patch
/// sets from it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ToolData {
    #[default]
    None,
    Search {
        matches: Vec<SearchMatch>,
        truncated: bool,
    },
    Files {
        files: Vec<FileContent>,
    },
    Patches {
        patches: Vec<FilePatch>,
    },
    Command(CommandOutput),
    Json {
        value: Value,
    },
}

impl ToolData {
    pub fn json(value: Value) -> Self {
        ToolData::Json { value }
    }

    pub fn patches(&self) -> Option<&[FilePatch]> {
        match self {
            ToolData::Patches { patches } => Some(patches),
            _ => None,
        }
    }
}

/// Pre-image snapshot taken before a tool changed files
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackData {
    pub snapshots: Vec<FileSnapshot>,
}

/// Structured outcome of executing one plan node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub success: bool,
    #[serde(default)]
    pub data: ToolData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_data: Option<RollbackData>,
    /// Number of dispatch attempts that produced this result
    #[serde(default)]
    pub attempts: u32,
}

impl ToolResult {
    pub fn success(data: ToolData) -> Self {
        Self {
            success: true,
            data,
            error: None,
            execution_time_ms: 0,
            retryable: false,
            rollback_data: None,
            attempts: 1,
        }
    }

    pub fn failure(error: impl Into<String>, retryable: bool) -> Self {
        Self {
            success: false,
            data: ToolData::None,
            error: Some(error.into()),
            execution_time_ms: 0,
            retryable,
            rollback_data: None,
            attempts: 1,
        }
    }

    /// Result recorded for a node that was never dispatched
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            attempts: 0,
            ..Self::failure(format!("skipped: {}", reason.into()), false)
        }
    }

    pub fn with_data(mut self, data: ToolData) -> Self {
        self.data = data;
        self
    }

    pub fn with_rollback_data(mut self, rollback_data: RollbackData) -> Self {
        self.rollback_data = Some(rollback_data);
        self
    }

    pub fn with_execution_time(mut self, ms: u64) -> Self {
        self.execution_time_ms = ms;
        self
    }

    pub fn is_skipped(&self) -> bool {
        self.attempts == 0 && !self.success
    }
}
