//! Dependency-ordered execution of plan graphs
//!
//! Nodes run in barrier-separated batches: every node whose dependencies are
//! recorded is dispatched concurrently (bounded by a semaphore), the batch is
//! joined, and its results are merged by a single writer before the next ready
//! set is computed.

use crate::services::conditions::ConditionEvaluator;
use crate::services::tools::{ExecutionContext, ToolRegistry};
use futures::future::join_all;
use indexmap::IndexMap;
use planmill_config::{EngineConfig, FailurePolicy};
use planmill_foundation::model::{NodeKind, PlanGraph, PlanNode, ToolData, ToolResult};
use planmill_foundation::PlanError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Outcome of running one plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineReport {
    /// Results keyed by node id, in the order they were recorded
    pub results: IndexMap<String, ToolResult>,
    /// Placeholder nodes that were never dispatched
    pub not_executable: Vec<String>,
    /// Nodes whose dependencies could never be satisfied
    pub unexecutable: Vec<String>,
    /// Extra attempts made across all nodes
    pub retry_count: u32,
    /// The run stopped early because its token was cancelled
    #[serde(default)]
    pub cancelled: bool,
}

impl EngineReport {
    pub fn all_succeeded(&self) -> bool {
        !self.cancelled && self.results.values().all(|r| r.success)
    }

    pub fn errors(&self) -> Vec<String> {
        let mut errors: Vec<String> = self
            .results
            .iter()
            .filter_map(|(id, r)| r.error.as_ref().map(|e| format!("{}: {}", id, e)))
            .collect();
        if self.cancelled {
            errors.push(PlanError::cancelled("plan execution").to_string());
        }
        errors
    }
}

/// Executes plan graphs against a tool registry
pub struct ExecutionEngine {
    registry: Arc<ToolRegistry>,
    evaluator: ConditionEvaluator,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(registry: Arc<ToolRegistry>, config: EngineConfig) -> Self {
        Self {
            registry,
            evaluator: ConditionEvaluator::new(),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn execute(&self, plan: &PlanGraph, ctx: ExecutionContext) -> EngineReport {
        self.execute_with(plan, ctx, &self.config).await
    }

    /// Run `plan` with per-call engine settings
    ///
    /// Node failures are recorded in the report. When the context's token is
    /// cancelled no further batch is dispatched, and the report keeps the
    /// results recorded so far with `cancelled` set, so the caller can still
    /// undo what already ran.
    pub async fn execute_with(
        &self,
        plan: &PlanGraph,
        ctx: ExecutionContext,
        config: &EngineConfig,
    ) -> EngineReport {
        let start = Instant::now();
        let permits = plan
            .max_parallelism
            .min(config.max_parallelism_cap)
            .max(1);
        let semaphore = Arc::new(Semaphore::new(permits));

        info!(
            request_id = %ctx.request_id,
            plan_nodes = plan.nodes.len(),
            max_parallelism = permits,
            dry_run = ctx.dry_run,
            "Starting plan execution"
        );

        let mut report = EngineReport::default();
        let mut executed: HashSet<String> = HashSet::new();
        let mut pending: Vec<&PlanNode> = Vec::new();

        for node in plan.nodes.values() {
            if node.executable {
                pending.push(node);
            } else {
                debug!(node_id = %node.id, "Node is not executable, leaving it out");
                report.not_executable.push(node.id.clone());
            }
        }

        let mut batch_number = 0usize;
        while !pending.is_empty() {
            if ctx.cancellation.is_cancelled() {
                warn!(
                    request_id = %ctx.request_id,
                    recorded = report.results.len(),
                    remaining = pending.len(),
                    "Plan execution cancelled"
                );
                report.cancelled = true;
                break;
            }

            let (ready, waiting): (Vec<&PlanNode>, Vec<&PlanNode>) = pending
                .into_iter()
                .partition(|n| n.dependencies.iter().all(|d| executed.contains(d)));
            pending = waiting;

            if ready.is_empty() {
                report.unexecutable = pending.iter().map(|n| n.id.clone()).collect();
                error!(
                    unexecutable = ?report.unexecutable,
                    "No node is ready; remaining nodes have unresolved dependencies"
                );
                break;
            }

            batch_number += 1;
            debug!(batch = batch_number, nodes = ready.len(), "Dispatching batch");

            let batch_ctx = ExecutionContext {
                prior_results: Arc::new(report.results.clone()),
                ..ctx.clone()
            };

            let mut outcomes: Vec<(String, Option<ToolResult>)> =
                Vec::with_capacity(ready.len());
            let mut handles = Vec::new();
            for node in &ready {
                if let Some(reason) = skip_reason(plan, node, &report.results, config) {
                    info!(node_id = %node.id, reason = %reason, "Skipping node");
                    outcomes.push((node.id.clone(), Some(ToolResult::skipped(reason))));
                    continue;
                }

                let node = (*node).clone();
                let registry = self.registry.clone();
                let evaluator = self.evaluator.clone();
                let semaphore = semaphore.clone();
                let node_ctx = batch_ctx.clone();
                let node_config = config.clone();
                outcomes.push((node.id.clone(), None));
                handles.push(tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    dispatch(&node, &registry, &evaluator, &node_ctx, &node_config).await
                }));
            }

            // Single-writer merge, in ready-set order
            let mut joined = join_all(handles).await.into_iter();
            for (id, skipped) in outcomes {
                let result = match skipped {
                    Some(result) => result,
                    None => match joined.next() {
                        Some(Ok((result, retries))) => {
                            report.retry_count += retries;
                            result
                        }
                        Some(Err(join_error)) => {
                            error!(node_id = %id, error = %join_error, "Node task failed");
                            ToolResult::failure(format!("Node task failed: {}", join_error), true)
                        }
                        None => ToolResult::failure("Node task result missing", false),
                    },
                };
                if result.success {
                    info!(node_id = %id, outcome = "success", "Node completed");
                } else if !result.is_skipped() {
                    warn!(node_id = %id, error = ?result.error, "Node failed");
                }
                executed.insert(id.clone());
                report.results.insert(id, result);
            }
        }

        info!(
            request_id = %ctx.request_id,
            executed = report.results.len(),
            unexecutable = report.unexecutable.len(),
            retries = report.retry_count,
            cancelled = report.cancelled,
            duration_ms = start.elapsed().as_millis() as u64,
            "Plan execution finished"
        );

        report
    }
}

/// Why `node` must not run, given the results recorded so far
fn skip_reason(
    plan: &PlanGraph,
    node: &PlanNode,
    results: &IndexMap<String, ToolResult>,
    config: &EngineConfig,
) -> Option<String> {
    node.dependencies.iter().find_map(|dep| {
        let failed = results.get(dep).is_some_and(|r| !r.success);
        if !failed {
            return None;
        }
        // A failed decision gates its dependents under every policy
        let gating = config.failure_policy == FailurePolicy::SkipDependents
            || plan.node(dep).is_some_and(|d| d.kind == NodeKind::Decision);
        gating.then(|| format!("dependency {} failed", dep))
    })
}

/// Run one node to completion, retrying where allowed
async fn dispatch(
    node: &PlanNode,
    registry: &ToolRegistry,
    evaluator: &ConditionEvaluator,
    ctx: &ExecutionContext,
    config: &EngineConfig,
) -> (ToolResult, u32) {
    match node.kind {
        NodeKind::Tool => run_tool(node, registry, ctx, config).await,
        NodeKind::Decision => (evaluator.decide(node, ctx).await, 0),
        NodeKind::Verification => (verify(node, ctx), 0),
        NodeKind::Parallel | NodeKind::Sequential | NodeKind::Condition => {
            (ToolResult::success(ToolData::None), 0)
        }
    }
}

fn verify(node: &PlanNode, ctx: &ExecutionContext) -> ToolResult {
    let failed: Vec<&str> = node
        .dependencies
        .iter()
        .filter(|dep| !ctx.prior_results.get(*dep).is_some_and(|r| r.success))
        .map(String::as_str)
        .collect();
    if failed.is_empty() {
        ToolResult::success(ToolData::None)
    } else {
        ToolResult::failure(
            format!("Verification failed: {} did not succeed", failed.join(", ")),
            false,
        )
    }
}

async fn run_tool(
    node: &PlanNode,
    registry: &ToolRegistry,
    ctx: &ExecutionContext,
    config: &EngineConfig,
) -> (ToolResult, u32) {
    let Some(tool) = node.tool.as_deref() else {
        return (
            ToolResult::failure(format!("Tool node '{}' names no tool", node.id), false),
            0,
        );
    };
    let Some(executor) = registry.get(tool) else {
        let err = PlanError::unknown_tool(tool, &node.id);
        error!(node_id = %node.id, tool = %tool, "Unknown tool");
        return (ToolResult::failure(err.to_string(), false), 0);
    };

    let mut attempt: u32 = 1;
    loop {
        let started = Instant::now();
        let execution = executor.execute(node, ctx);
        let mut result = match config.node_timeout_ms {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), execution).await {
                Ok(result) => result,
                Err(_) => ToolResult::failure(
                    format!("Node '{}' timed out after {} ms", node.id, ms),
                    true,
                ),
            },
            None => execution.await,
        };
        result.attempts = attempt;
        if result.execution_time_ms == 0 {
            result.execution_time_ms = started.elapsed().as_millis() as u64;
        }

        let retry = !result.success
            && node.retryable
            && result.retryable
            && executor.can_retry(&result)
            && attempt <= config.max_retries
            && !ctx.cancellation.is_cancelled();
        if !retry {
            return (result, attempt - 1);
        }

        let backoff = Duration::from_millis(config.retry_backoff_ms * u64::from(attempt));
        warn!(
            node_id = %node.id,
            attempt,
            backoff_ms = backoff.as_millis() as u64,
            error = ?result.error,
            "Retrying node"
        );
        tokio::select! {
            _ = ctx.cancellation.cancelled() => return (result, attempt - 1),
            _ = tokio::time::sleep(backoff) => {}
        }
        attempt += 1;
    }
}
