//! Shell-command backed tools: typecheck, format and test-runner
//!
//! Commands come from the project configuration and run through the platform
//! shell in the project root with a timeout.

use super::{parameter_mismatch, ExecutionContext, ToolExecutor};
use async_trait::async_trait;
use planmill_foundation::model::{
    is_mutating_tool, tool_names, CommandOutput, CommandParams, PlanNode, ToolData, ToolParams,
    ToolResult,
};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Runs shell commands with a timeout and captured output
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout_seconds: u64,
}

impl CommandRunner {
    pub fn new(timeout_seconds: u64) -> Self {
        Self { timeout_seconds }
    }

    /// Run `command` with `args` appended, in `working_dir`
    ///
    /// # Errors
    ///
    /// Returns an error message if:
    /// - The command times out
    /// - The command cannot be spawned
    /// - The run is cancelled
    ///
    /// A non-zero exit status is not an error; callers inspect `exit_code`.
    pub async fn run(
        &self,
        command: &str,
        args: &[String],
        working_dir: &Path,
        cancellation: &CancellationToken,
    ) -> Result<CommandOutput, String> {
        let start = Instant::now();
        let full_command = join_command(command, args);

        debug!(
            command = %full_command,
            working_dir = %working_dir.display(),
            timeout_seconds = self.timeout_seconds,
            "Running project command"
        );

        #[cfg(unix)]
        let mut cmd = Command::new("sh");
        #[cfg(unix)]
        cmd.arg("-c");

        #[cfg(windows)]
        let mut cmd = Command::new("cmd.exe");
        #[cfg(windows)]
        cmd.arg("/C");

        cmd.arg(&full_command)
            .current_dir(working_dir)
            .kill_on_drop(true);

        let run = tokio::time::timeout(Duration::from_secs(self.timeout_seconds), cmd.output());

        let output = tokio::select! {
            _ = cancellation.cancelled() => {
                return Err(format!("Command '{}' was cancelled", full_command));
            }
            output = run => output
                .map_err(|_| format!(
                    "Command '{}' timed out after {} seconds",
                    full_command, self.timeout_seconds
                ))?
                .map_err(|e| format!("Failed to execute command '{}': {}", full_command, e))?,
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);

        debug!(exit_code, duration_ms, "Project command completed");

        Ok(CommandOutput {
            command: full_command,
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
            skipped: false,
        })
    }
}

fn join_command(command: &str, args: &[String]) -> String {
    let mut full = command.to_string();
    for arg in args {
        full.push(' ');
        full.push_str(&shell_quote(arg));
    }
    full
}

fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', "'\\''"))
}

/// Executor running one configured project command
#[derive(Debug)]
pub struct CommandExecutor {
    name: &'static str,
    default_command: Option<String>,
    runner: Arc<CommandRunner>,
}

impl CommandExecutor {
    pub fn new(
        name: &'static str,
        default_command: Option<String>,
        runner: Arc<CommandRunner>,
    ) -> Self {
        Self {
            name,
            default_command,
            runner,
        }
    }

    fn params<'a>(&self, node: &'a PlanNode) -> Option<&'a CommandParams> {
        match (&node.parameters, self.name) {
            (Some(ToolParams::Typecheck(p)), tool_names::TYPECHECK)
            | (Some(ToolParams::Format(p)), tool_names::FORMAT)
            | (Some(ToolParams::TestRunner(p)), tool_names::TEST_RUNNER) => Some(p),
            _ => None,
        }
    }

    fn skipped(&self, reason: &str) -> ToolResult {
        debug!(tool = self.name, reason, "Project command not run");
        ToolResult::success(ToolData::Command(CommandOutput {
            command: String::new(),
            exit_code: 0,
            stdout: String::new(),
            stderr: reason.to_string(),
            duration_ms: 0,
            skipped: true,
        }))
    }
}

#[async_trait]
impl ToolExecutor for CommandExecutor {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(&self, node: &PlanNode, ctx: &ExecutionContext) -> ToolResult {
        let Some(params) = self.params(node) else {
            return parameter_mismatch(node, self.name);
        };

        let Some(command) = params.command.as_ref().or(self.default_command.as_ref()) else {
            return self.skipped("no command configured");
        };
        if ctx.dry_run && is_mutating_tool(self.name) {
            return self.skipped("dry run");
        }

        match self
            .runner
            .run(command, &params.args, &ctx.project_root, &ctx.cancellation)
            .await
        {
            Ok(output) if output.exit_code == 0 => {
                let elapsed = output.duration_ms;
                ToolResult::success(ToolData::Command(output)).with_execution_time(elapsed)
            }
            Ok(output) => {
                let elapsed = output.duration_ms;
                ToolResult::failure(
                    format!("'{}' exited with code {}", output.command, output.exit_code),
                    false,
                )
                .with_data(ToolData::Command(output))
                .with_execution_time(elapsed)
            }
            // Timeouts and spawn failures may succeed on another attempt
            Err(e) => ToolResult::failure(e, true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planmill_foundation::model::NodeKind;
    use tempfile::TempDir;

    fn command_node(tool: &str, params: CommandParams) -> PlanNode {
        let mut node = PlanNode::new(format!("tool-0-{}", tool), NodeKind::Tool, tool);
        node.tool = Some(tool.to_string());
        node.parameters = Some(match tool {
            tool_names::TYPECHECK => ToolParams::Typecheck(params),
            tool_names::FORMAT => ToolParams::Format(params),
            _ => ToolParams::TestRunner(params),
        });
        node
    }

    #[tokio::test]
    async fn test_runner_captures_output() {
        let dir = TempDir::new().unwrap();
        let output = CommandRunner::new(5)
            .run("echo", &["it's ok".to_string()], dir.path(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.exit_code, 0);
        assert!(output.stdout.contains("it's ok"));
    }

    #[tokio::test]
    async fn test_runner_timeout() {
        let dir = TempDir::new().unwrap();
        let result = CommandRunner::new(1)
            .run("sleep 10", &[], dir.path(), &CancellationToken::new())
            .await;

        assert!(result.unwrap_err().contains("timed out"));
    }

    #[tokio::test]
    async fn test_runner_cancelled() {
        let dir = TempDir::new().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let result = CommandRunner::new(5)
            .run("sleep 10", &[], dir.path(), &token)
            .await;

        assert!(result.unwrap_err().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_failed_command_is_a_failed_result() {
        let dir = TempDir::new().unwrap();
        let executor = CommandExecutor::new(
            tool_names::TYPECHECK,
            Some("exit 3".to_string()),
            Arc::new(CommandRunner::new(5)),
        );
        let ctx = ExecutionContext::new(dir.path());
        let result = executor
            .execute(&command_node(tool_names::TYPECHECK, CommandParams::default()), &ctx)
            .await;

        assert!(!result.success);
        assert!(!result.retryable);
        match result.data {
            ToolData::Command(output) => assert_eq!(output.exit_code, 3),
            other => panic!("unexpected data: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_node_command_overrides_default() {
        let dir = TempDir::new().unwrap();
        let executor = CommandExecutor::new(
            tool_names::TEST_RUNNER,
            Some("exit 1".to_string()),
            Arc::new(CommandRunner::new(5)),
        );
        let ctx = ExecutionContext::new(dir.path());
        let params = CommandParams {
            command: Some("echo".to_string()),
            args: vec!["filter".to_string()],
        };
        let result = executor
            .execute(&command_node(tool_names::TEST_RUNNER, params), &ctx)
            .await;

        assert!(result.success, "{:?}", result.error);
    }

    #[tokio::test]
    async fn test_unconfigured_and_dry_run_commands_are_skipped() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(CommandRunner::new(5));

        let unconfigured = CommandExecutor::new(tool_names::TYPECHECK, None, runner.clone());
        let ctx = ExecutionContext::new(dir.path());
        let result = unconfigured
            .execute(&command_node(tool_names::TYPECHECK, CommandParams::default()), &ctx)
            .await;
        assert!(result.success);
        assert!(matches!(result.data, ToolData::Command(ref out) if out.skipped));

        let format = CommandExecutor::new(tool_names::FORMAT, Some("exit 1".into()), runner);
        let ctx = ExecutionContext::new(dir.path()).with_dry_run(true);
        let result = format
            .execute(&command_node(tool_names::FORMAT, CommandParams::default()), &ctx)
            .await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_mismatched_parameters() {
        let dir = TempDir::new().unwrap();
        let executor = CommandExecutor::new(
            tool_names::FORMAT,
            Some("true".to_string()),
            Arc::new(CommandRunner::new(5)),
        );
        let ctx = ExecutionContext::new(dir.path());
        let result = executor
            .execute(&command_node(tool_names::TYPECHECK, CommandParams::default()), &ctx)
            .await;
        assert!(!result.success);
    }
}
