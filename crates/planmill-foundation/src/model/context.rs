//! Request context shared by classification, planning and execution.

use serde::{Deserialize, Serialize};

/// A single find/replace instruction an edit tool should apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditInstruction {
    /// File path relative to the project root
    pub file_path: String,
    /// Exact text to find
    pub find: String,
    /// Replacement text
    pub replace: String,
    /// Replace every occurrence instead of the first one
    #[serde(default)]
    pub replace_all: bool,
}

/// Caller-supplied context accompanying a free-text request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    /// File the user is currently looking at
    #[serde(default)]
    pub current_file: Option<String>,
    /// Selected text, if any
    #[serde(default)]
    pub selection: Option<String>,
    /// Files the request targets (relative to the project root)
    #[serde(default)]
    pub target_files: Vec<String>,
    /// Symbol the request is about, used as the search query when present
    #[serde(default)]
    pub symbol: Option<String>,
    /// Concrete edits produced upstream (e.g. by a model call)
    #[serde(default)]
    pub edits: Vec<EditInstruction>,
    /// Optional filter passed to the test runner
    #[serde(default)]
    pub test_filter: Option<String>,
    /// Caller explicitly accepts high-risk changes
    #[serde(default)]
    pub risk_acknowledged: bool,
}

impl RequestContext {
    /// All files this request touches, in first-seen order
    pub fn touched_files(&self) -> Vec<String> {
        let mut files: Vec<String> = Vec::new();
        let candidates = self
            .current_file
            .iter()
            .chain(self.target_files.iter())
            .chain(self.edits.iter().map(|e| &e.file_path));
        for file in candidates {
            if !files.contains(file) {
                files.push(file.clone());
            }
        }
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touched_files_dedupes_in_order() {
        let ctx = RequestContext {
            current_file: Some("src/a.rs".into()),
            target_files: vec!["src/b.rs".into(), "src/a.rs".into()],
            edits: vec![EditInstruction {
                file_path: "src/c.rs".into(),
                find: "x".into(),
                replace: "y".into(),
                replace_all: false,
            }],
            ..Default::default()
        };
        assert_eq!(ctx.touched_files(), vec!["src/a.rs", "src/b.rs", "src/c.rs"]);
    }
}
