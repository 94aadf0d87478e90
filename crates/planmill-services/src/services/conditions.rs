//! Runtime evaluation of decision-node conditions

use crate::services::planning::builder::conditions::{
    BACKUP_ENABLED, DEPENDENCIES_SUCCEEDED, RISK_ACKNOWLEDGED, TARGETS_EXIST,
};
use crate::services::tools::safety::missing_targets;
use crate::services::tools::ExecutionContext;
use planmill_foundation::model::{PlanNode, ToolData, ToolResult};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionOutcome {
    pub label: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

/// Evaluates the labels a decision node declares.
///
/// Unknown labels evaluate to false.
#[derive(Debug, Clone, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub async fn evaluate(&self, node: &PlanNode, ctx: &ExecutionContext) -> Vec<ConditionOutcome> {
        let labels = node.conditions.as_deref().unwrap_or_default();
        let mut outcomes = Vec::with_capacity(labels.len());

        for label in labels {
            let (passed, detail) = match label.as_str() {
                DEPENDENCIES_SUCCEEDED => {
                    let failed: Vec<&str> = node
                        .dependencies
                        .iter()
                        .filter(|dep| !ctx.prior_results.get(*dep).is_some_and(|r| r.success))
                        .map(String::as_str)
                        .collect();
                    (failed.is_empty(), failed.join(", "))
                }
                BACKUP_ENABLED => (ctx.backup, String::new()),
                TARGETS_EXIST => {
                    let missing = missing_targets(ctx, &ctx.request.touched_files()).await;
                    (missing.is_empty(), missing.join(", "))
                }
                RISK_ACKNOWLEDGED => (ctx.request.risk_acknowledged, String::new()),
                other => (false, format!("unknown condition '{}'", other)),
            };
            debug!(node_id = %node.id, label = %label, passed, "Evaluated condition");
            outcomes.push(ConditionOutcome {
                label: label.clone(),
                passed,
                detail,
            });
        }

        outcomes
    }

    /// Evaluate and fold the outcomes into the decision node's result
    pub async fn decide(&self, node: &PlanNode, ctx: &ExecutionContext) -> ToolResult {
        let outcomes = self.evaluate(node, ctx).await;
        let failed: Vec<&str> = outcomes
            .iter()
            .filter(|o| !o.passed)
            .map(|o| o.label.as_str())
            .collect();
        let data = ToolData::json(json!({ "conditions": outcomes }));

        if failed.is_empty() {
            ToolResult::success(data)
        } else {
            ToolResult::failure(format!("Conditions not met: {}", failed.join(", ")), false)
                .with_data(data)
        }
    }
}
