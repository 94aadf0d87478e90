//! Tool executors and the registry the engine dispatches through.
//!
//! Every executor honours one contract: whatever happens inside `execute`,
//! the caller gets a [`ToolResult`] back. Failures never escape as panics or
//! errors.

pub mod command;
pub mod edit;
pub mod read;
pub mod safety;
pub mod search;

pub use command::{CommandExecutor, CommandRunner};
pub use edit::EditExecutor;
pub use read::ReadExecutor;
pub use safety::{RollbackExecutor, SafetyCheckExecutor};
pub use search::SearchExecutor;

use async_trait::async_trait;
use dashmap::DashMap;
use indexmap::IndexMap;
use planmill_config::ProjectConfig;
use planmill_foundation::model::{tool_names, PlanNode, RequestContext, ToolResult};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Everything an executor may consult while running one node
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub request_id: String,
    pub project_root: PathBuf,
    /// Compute results without touching the filesystem
    pub dry_run: bool,
    /// Mutating tools snapshot pre-images when set
    pub backup: bool,
    pub request: Arc<RequestContext>,
    /// Results recorded by earlier batches, in the order they were recorded
    pub prior_results: Arc<IndexMap<String, ToolResult>>,
    pub cancellation: CancellationToken,
}

impl ExecutionContext {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            project_root: project_root.into(),
            dry_run: false,
            backup: true,
            request: Arc::new(RequestContext::default()),
            prior_results: Arc::new(IndexMap::new()),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_request(mut self, request: RequestContext) -> Self {
        self.request = Arc::new(request);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Prior results in the order they were recorded
    pub fn completed_results(&self) -> impl Iterator<Item = (&str, &ToolResult)> {
        self.prior_results.iter().map(|(id, r)| (id.as_str(), r))
    }

    /// Resolve a project-relative path, refusing anything outside the root
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, String> {
        resolve_within(&self.project_root, relative)
    }
}

/// Lexically resolve `relative` against `root` without leaving it.
///
/// Absolute paths are accepted only when they already point inside `root`.
pub fn resolve_within(root: &Path, relative: &str) -> Result<PathBuf, String> {
    let candidate = Path::new(relative);
    let candidate = if candidate.is_absolute() {
        candidate
            .strip_prefix(root)
            .map_err(|_| format!("Path '{}' is outside the project root", relative))?
    } else {
        candidate
    };

    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;
    for component in candidate.components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(format!("Path '{}' escapes the project root", relative));
                }
                resolved.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!("Path '{}' is outside the project root", relative));
            }
        }
    }

    if depth == 0 {
        return Err(format!("Path '{}' does not name a file", relative));
    }
    Ok(resolved)
}

/// A pluggable unit of work bound to one tool name
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Registry name, e.g. `search`
    fn name(&self) -> &str;

    /// Run one node; failures are reported through the result
    async fn execute(&self, node: &PlanNode, ctx: &ExecutionContext) -> ToolResult;

    /// Whether a failed result is worth another attempt
    fn can_retry(&self, result: &ToolResult) -> bool {
        result.retryable
    }

    /// Undo the effects recorded in `result`; `true` when nothing is left to undo
    async fn rollback(&self, _result: &ToolResult, _ctx: &ExecutionContext) -> bool {
        true
    }
}

/// Failed result for a node whose parameters belong to another tool
pub(crate) fn parameter_mismatch(node: &PlanNode, expected: &str) -> ToolResult {
    let found = node
        .parameters
        .as_ref()
        .map(|p| p.tool_name().to_string())
        .unwrap_or_else(|| "none".to_string());
    ToolResult::failure(
        format!(
            "Node '{}' expected {} parameters, found {}",
            node.id, expected, found
        ),
        false,
    )
}

/// Owned registry of executors keyed by tool name
#[derive(Default)]
pub struct ToolRegistry {
    executors: DashMap<String, Arc<dyn ToolExecutor>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with every built-in tool
    pub fn with_builtins(project: &ProjectConfig) -> Self {
        let registry = Self::new();
        let runner = Arc::new(CommandRunner::new(project.command_timeout_seconds));

        registry.register(Arc::new(SearchExecutor::new()));
        registry.register(Arc::new(ReadExecutor::new()));
        registry.register(Arc::new(EditExecutor::new()));
        registry.register(Arc::new(CommandExecutor::new(
            tool_names::TYPECHECK,
            project.typecheck_command.clone(),
            runner.clone(),
        )));
        registry.register(Arc::new(CommandExecutor::new(
            tool_names::FORMAT,
            project.format_command.clone(),
            runner.clone(),
        )));
        registry.register(Arc::new(CommandExecutor::new(
            tool_names::TEST_RUNNER,
            project.test_command.clone(),
            runner,
        )));
        registry.register(Arc::new(SafetyCheckExecutor::new()));
        registry.register(Arc::new(RollbackExecutor::new()));
        registry
    }

    /// Register an executor under its own name, replacing any previous one
    pub fn register(&self, executor: Arc<dyn ToolExecutor>) {
        let name = executor.name().to_string();
        if self.executors.insert(name.clone(), executor).is_some() {
            warn!(tool = %name, "Replaced previously registered tool executor");
        } else {
            debug!(tool = %name, "Registered tool executor");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolExecutor>> {
        self.executors.get(name).map(|entry| entry.value().clone())
    }

    /// Registered tool names, sorted
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.executors.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<dyn ToolExecutor>> {
        self.executors.remove(name).map(|(_, executor)| executor)
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.list())
            .finish()
    }
}
