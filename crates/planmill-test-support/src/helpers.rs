//! Test helper functions and utilities

use planmill_config::AppConfig;
use planmill_foundation::model::{
    Complexity, EditInstruction, Intent, IntentClassification, RequestContext, RiskLevel,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Configuration that never shells out and retries quickly
pub fn create_test_config() -> AppConfig {
    let mut config = AppConfig::default();

    config.project.typecheck_command = None;
    config.project.format_command = None;
    config.project.test_command = None;
    config.project.command_timeout_seconds = 5;

    config.engine.retry_backoff_ms = 1;
    config.engine.node_timeout_ms = Some(5_000);
    config.logging.level = "debug".to_string();

    config
}

/// Temporary project directory, removed on drop
pub struct TestProject {
    dir: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("failed to create temp project"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn absolute(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    /// Write a project-relative file, creating parent directories
    pub fn write(&self, relative: &str, content: &str) -> &Self {
        let path = self.absolute(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create parent dirs");
        }
        std::fs::write(&path, content).expect("failed to write test file");
        self
    }

    pub fn read(&self, relative: &str) -> String {
        std::fs::read_to_string(self.absolute(relative)).expect("failed to read test file")
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// A classification as the classifier would produce it, without running it
pub fn create_test_intent(
    intent: Intent,
    complexity: Complexity,
    risk_level: RiskLevel,
    tools: &[&str],
) -> IntentClassification {
    IntentClassification {
        intent,
        confidence: 1.0,
        reasoning: format!("test intent '{}'", intent),
        sub_intents: None,
        complexity,
        estimated_time: 10.0,
        required_tools: tools.iter().map(|t| t.to_string()).collect(),
        risk_level,
    }
}

/// Request context renaming `from` to `to` in one file
pub fn rename_context(file: &str, from: &str, to: &str) -> RequestContext {
    RequestContext {
        target_files: vec![file.to_string()],
        symbol: Some(from.to_string()),
        edits: vec![EditInstruction {
            file_path: file.to_string(),
            find: from.to_string(),
            replace: to.to_string(),
            replace_all: true,
        }],
        ..Default::default()
    }
}
