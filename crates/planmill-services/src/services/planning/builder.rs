//! Builds a plan graph from a classified intent.

use planmill_foundation::model::{
    is_mutating_tool, tool_names, CommandParams, Complexity, CustomParams, EdgeKind, EditParams,
    Intent, IntentClassification, NodeKind, PlanEdge, PlanGraph, PlanNode, ReadParams,
    RequestContext, RiskAssessment, RiskLevel, RollbackParams, SafetyCheckParams, SearchParams,
    ToolParams,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

pub const VERIFICATION_NODE_ID: &str = "verification";
pub const DECISION_NODE_ID: &str = "decision-safety";

/// Labels of the safety gate, shared by the decision node and the safety-check tool
pub mod conditions {
    pub const PROJECT_ROOT_EXISTS: &str = "project-root-exists";
    pub const DEPENDENCIES_SUCCEEDED: &str = "dependencies-succeeded";
    pub const BACKUP_ENABLED: &str = "backup-enabled";
    pub const TARGETS_EXIST: &str = "targets-exist";
    pub const RISK_ACKNOWLEDGED: &str = "risk-acknowledged";
}

/// Most placeholder parallel nodes ever emitted
const MAX_PARALLEL_PLACEHOLDERS: usize = 3;
/// Upper bound of the "optimize"/"performance" parallelism boost
const PARALLELISM_BOOST_CAP: usize = 4;

/// Options controlling plan generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOptions {
    pub include_verification: bool,
    pub max_parallelism: usize,
    /// Mutating nodes carry a rollback plan and edits snapshot their pre-image
    pub enable_rollback: bool,
    pub search_max_results: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            include_verification: true,
            max_parallelism: 1,
            enable_rollback: true,
            search_max_results: 50,
        }
    }
}

/// Per-tool estimate in minutes and baseline risk
fn tool_profile(tool: &str) -> (f64, RiskLevel) {
    match tool {
        tool_names::SEARCH | tool_names::READ => (1.0, RiskLevel::Low),
        tool_names::EDIT => (5.0, RiskLevel::Medium),
        tool_names::TYPECHECK => (3.0, RiskLevel::Low),
        tool_names::FORMAT => (1.0, RiskLevel::Low),
        tool_names::TEST_RUNNER => (5.0, RiskLevel::Low),
        tool_names::SAFETY_CHECK => (1.0, RiskLevel::Low),
        tool_names::ROLLBACK => (1.0, RiskLevel::Medium),
        _ => (2.0, RiskLevel::Low),
    }
}

/// Service turning an intent into a plan graph
#[derive(Debug, Clone, Default)]
pub struct PlanGraphBuilder;

impl PlanGraphBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(
        &self,
        intent: &IntentClassification,
        context: &RequestContext,
        options: &BuildOptions,
    ) -> PlanGraph {
        debug!(
            intent = %intent.intent,
            tools = ?intent.required_tools,
            "Building plan graph"
        );

        let mut ordered = self.tool_chain(intent, context, options);

        if intent.complexity == Complexity::High || intent.risk_level == RiskLevel::High {
            self.insert_decision_node(&mut ordered, intent);
        }

        if options.include_verification {
            let mut node = PlanNode::new(
                VERIFICATION_NODE_ID,
                NodeKind::Verification,
                format!("verify ({})", intent.intent),
            );
            node.description = "Verify that every tool step succeeded".to_string();
            node.dependencies = ordered
                .iter()
                .filter(|n| n.kind == NodeKind::Tool)
                .map(|n| n.id.clone())
                .collect();
            node.estimated_time = 1.0;
            ordered.push(node);
        }

        if options.max_parallelism > 1 {
            for i in 0..options.max_parallelism.min(MAX_PARALLEL_PLACEHOLDERS) {
                let mut node = PlanNode::new(
                    format!("parallel-{}", i),
                    NodeKind::Parallel,
                    format!("parallel lane {}", i),
                );
                node.description =
                    "Placeholder for future fan-out; not dispatched by the engine".to_string();
                node.executable = false;
                ordered.push(node);
            }
        }

        let mut plan = PlanGraph::default();
        for node in ordered {
            plan.nodes.insert(node.id.clone(), node);
        }

        self.generate_edges(&mut plan);
        self.finalize(&mut plan, intent);

        info!(
            nodes = plan.nodes.len(),
            edges = plan.edges.len(),
            max_parallelism = plan.max_parallelism,
            estimated_total_time = plan.estimated_total_time,
            overall_risk = %plan.risk_assessment.overall,
            "Built plan graph"
        );

        plan
    }

    /// One tool node per required tool, each depending on the previous one
    fn tool_chain(
        &self,
        intent: &IntentClassification,
        context: &RequestContext,
        options: &BuildOptions,
    ) -> Vec<PlanNode> {
        let mut nodes: Vec<PlanNode> = Vec::with_capacity(intent.required_tools.len());

        for (index, tool) in intent.required_tools.iter().enumerate() {
            let (estimated_time, base_risk) = tool_profile(tool);
            let mutating = is_mutating_tool(tool);

            let mut node = PlanNode::new(
                format!("tool-{}-{}", index, tool),
                NodeKind::Tool,
                format!("{} ({})", tool, intent.intent),
            );
            node.description = format!("Run '{}' for {} request", tool, intent.intent);
            node.tool = Some(tool.clone());
            node.parameters = Some(self.tool_parameters(tool, intent, context, options));
            node.estimated_time = estimated_time;
            node.risk_level = if mutating {
                base_risk.max(intent.risk_level)
            } else {
                base_risk
            };
            node.retryable = !mutating;
            if mutating && options.enable_rollback && tool != tool_names::ROLLBACK {
                node.rollback_plan = Some(format!("rollback:{}", node.id));
            }
            if let Some(previous) = nodes.last() {
                node.dependencies.insert(previous.id.clone());
            }
            nodes.push(node);
        }

        nodes
    }

    /// Per-tool parameter template seeded with intent metadata
    fn tool_parameters(
        &self,
        tool: &str,
        intent: &IntentClassification,
        context: &RequestContext,
        options: &BuildOptions,
    ) -> ToolParams {
        match tool {
            tool_names::SEARCH => ToolParams::Search(SearchParams {
                query: search_query(intent, context),
                path: None,
                max_results: options.search_max_results,
            }),
            tool_names::READ => ToolParams::Read(ReadParams {
                paths: context.touched_files(),
            }),
            tool_names::EDIT => ToolParams::Edit(EditParams {
                edits: context.edits.clone(),
                backup: options.enable_rollback,
                description: format!("{} edit: {}", intent.intent, intent.reasoning),
            }),
            tool_names::TYPECHECK => ToolParams::Typecheck(CommandParams::default()),
            tool_names::FORMAT => ToolParams::Format(CommandParams::default()),
            tool_names::TEST_RUNNER => ToolParams::TestRunner(CommandParams {
                command: None,
                args: context.test_filter.iter().cloned().collect(),
            }),
            tool_names::SAFETY_CHECK => ToolParams::SafetyCheck(SafetyCheckParams {
                checks: vec![
                    conditions::PROJECT_ROOT_EXISTS.to_string(),
                    conditions::TARGETS_EXIST.to_string(),
                    conditions::BACKUP_ENABLED.to_string(),
                ],
                target_files: context.touched_files(),
            }),
            tool_names::ROLLBACK => ToolParams::Rollback(RollbackParams { restore: false }),
            other => ToolParams::Custom(CustomParams {
                name: other.to_string(),
                args: json!({
                    "intent": intent.intent,
                    "reasoning": intent.reasoning,
                    "targetFiles": context.touched_files(),
                }),
            }),
        }
    }

    /// Place the safety gate directly before the first mutating tool
    fn insert_decision_node(&self, nodes: &mut Vec<PlanNode>, intent: &IntentClassification) {
        let mut labels = vec![
            conditions::DEPENDENCIES_SUCCEEDED.to_string(),
            conditions::BACKUP_ENABLED.to_string(),
            conditions::TARGETS_EXIST.to_string(),
        ];
        if intent.risk_level == RiskLevel::High || intent.intent == Intent::Migration {
            labels.push(conditions::RISK_ACKNOWLEDGED.to_string());
        }

        let mut decision = PlanNode::new(
            DECISION_NODE_ID,
            NodeKind::Decision,
            format!("safety gate ({})", intent.intent),
        );
        decision.description =
            "Evaluate safety conditions before any file is modified".to_string();
        decision.conditions = Some(labels);
        decision.estimated_time = 0.5;

        match nodes.iter().position(PlanNode::is_mutating) {
            Some(position) => {
                if let Some(previous) = position.checked_sub(1).map(|i| nodes[i].id.clone()) {
                    decision.dependencies.insert(previous);
                }
                nodes[position]
                    .dependencies
                    .insert(DECISION_NODE_ID.to_string());
                nodes.insert(position, decision);
            }
            None => {
                if let Some(last) = nodes.last() {
                    decision.dependencies.insert(last.id.clone());
                }
                nodes.push(decision);
            }
        }
    }

    fn generate_edges(&self, plan: &mut PlanGraph) {
        let ids: Vec<String> = plan.nodes.keys().cloned().collect();

        // Every dependency is mirrored by a success edge
        let mut edges = Vec::new();
        for node in plan.nodes.values() {
            for dep in &node.dependencies {
                edges.push(PlanEdge::new(dep.clone(), node.id.clone(), EdgeKind::Success));
            }
        }

        // Decision nodes point at the next node in list order
        for (index, id) in ids.iter().enumerate() {
            let node = &plan.nodes[id];
            if node.kind != NodeKind::Decision {
                continue;
            }
            let labels = node.conditions.clone().unwrap_or_default();
            if let Some(next) = ids.get(index + 1) {
                if !labels.is_empty() {
                    let mut edge = PlanEdge::new(id.clone(), next.clone(), EdgeKind::Condition);
                    edge.condition = Some(labels.join(" && "));
                    edges.push(edge);
                }
            }
        }

        for edge in edges {
            plan.insert_edge(edge);
        }
    }

    fn finalize(&self, plan: &mut PlanGraph, intent: &IntentClassification) {
        plan.entry_point = plan
            .nodes
            .values()
            .find(|n| n.executable && n.dependencies.is_empty())
            .or_else(|| plan.nodes.values().next())
            .map(|n| n.id.clone());

        plan.exit_points = plan
            .nodes
            .values()
            .filter(|n| n.executable && plan.outgoing(&n.id).next().is_none())
            .map(|n| n.id.clone())
            .collect();

        plan.estimated_total_time = plan.nodes.values().map(|n| n.estimated_time).sum();
        plan.max_parallelism = estimate_parallelism(plan);
        plan.risk_assessment = assess_risk(plan, intent);
    }
}

/// Search query: the symbol if known, then the selection, then the reasoning
fn search_query(intent: &IntentClassification, context: &RequestContext) -> String {
    context
        .symbol
        .clone()
        .or_else(|| {
            context
                .selection
                .as_deref()
                .and_then(|s| s.lines().map(str::trim).find(|l| !l.is_empty()))
                .map(str::to_string)
        })
        .unwrap_or_else(|| intent.reasoning.clone())
}

fn estimate_parallelism(plan: &PlanGraph) -> usize {
    let parallel = plan
        .nodes
        .values()
        .filter(|n| n.kind == NodeKind::Parallel)
        .count()
        .max(1);

    let wants_boost = plan.nodes.values().any(|n| {
        let name = n.name.to_lowercase();
        name.contains("optimize") || name.contains("performance")
    });

    if wants_boost {
        parallel.max(PARALLELISM_BOOST_CAP.min(plan.nodes.len()))
    } else {
        parallel
    }
}

fn assess_risk(plan: &PlanGraph, intent: &IntentClassification) -> RiskAssessment {
    let critical_paths: Vec<String> = plan
        .nodes
        .values()
        .filter(|n| n.risk_level == RiskLevel::High)
        .map(|n| n.id.clone())
        .collect();

    let overall = if intent.intent == Intent::Migration || critical_paths.len() > 2 {
        RiskLevel::High
    } else if !critical_paths.is_empty() {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    RiskAssessment {
        overall,
        critical_paths,
        rollback_points: plan
            .nodes
            .values()
            .filter(|n| n.rollback_plan.is_some())
            .map(|n| n.id.clone())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::planning::validator::PlanValidator;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn intent_with_tools(tools: &[&str]) -> IntentClassification {
        IntentClassification {
            intent: Intent::Refactor,
            confidence: 1.0,
            reasoning: "Matched phrase 'refactor'".to_string(),
            sub_intents: None,
            complexity: Complexity::Low,
            estimated_time: 15.0,
            required_tools: tools.iter().map(|t| t.to_string()).collect(),
            risk_level: RiskLevel::Low,
        }
    }

    #[test]
    fn test_search_read_edit_with_verification() {
        let intent = intent_with_tools(&["search", "read", "edit"]);
        let plan = PlanGraphBuilder::new().build(
            &intent,
            &RequestContext::default(),
            &BuildOptions::default(),
        );

        assert_eq!(plan.nodes.len(), 4);
        let verification = plan.node(VERIFICATION_NODE_ID).unwrap();
        let expected: BTreeSet<String> = ["tool-0-search", "tool-1-read", "tool-2-edit"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(verification.dependencies, expected);
        assert_eq!(plan.exit_points, vec![VERIFICATION_NODE_ID.to_string()]);
        assert_eq!(plan.entry_point.as_deref(), Some("tool-0-search"));
    }

    #[test]
    fn test_linear_chain_and_success_edges() {
        let intent = intent_with_tools(&["search", "read", "edit"]);
        let plan = PlanGraphBuilder::new().build(
            &intent,
            &RequestContext::default(),
            &BuildOptions {
                include_verification: false,
                ..Default::default()
            },
        );

        let read = plan.node("tool-1-read").unwrap();
        assert!(read.dependencies.contains("tool-0-search"));
        assert_eq!(
            plan.edge("tool-0-search", "tool-1-read").unwrap().kind,
            EdgeKind::Success
        );
        assert_eq!(plan.edge("tool-1-read", "tool-2-edit").unwrap().kind, EdgeKind::Success);
        assert_eq!(plan.exit_points, vec!["tool-2-edit".to_string()]);
        assert_eq!(plan.estimated_total_time, 7.0);
    }

    #[test]
    fn test_search_query_prefers_symbol() {
        let intent = intent_with_tools(&["search"]);
        let ctx = RequestContext {
            symbol: Some("parse_config".into()),
            ..Default::default()
        };
        let plan = PlanGraphBuilder::new().build(&intent, &ctx, &BuildOptions::default());
        match &plan.node("tool-0-search").unwrap().parameters {
            Some(ToolParams::Search(params)) => assert_eq!(params.query, "parse_config"),
            other => panic!("unexpected parameters: {:?}", other),
        }

        let plan = PlanGraphBuilder::new().build(
            &intent,
            &RequestContext::default(),
            &BuildOptions::default(),
        );
        match &plan.node("tool-0-search").unwrap().parameters {
            Some(ToolParams::Search(params)) => assert_eq!(params.query, intent.reasoning),
            other => panic!("unexpected parameters: {:?}", other),
        }
    }

    #[test]
    fn test_decision_node_gates_first_mutating_tool() {
        let mut intent = intent_with_tools(&["search", "read", "edit", "typecheck"]);
        intent.complexity = Complexity::High;
        intent.risk_level = RiskLevel::High;

        let plan = PlanGraphBuilder::new().build(
            &intent,
            &RequestContext::default(),
            &BuildOptions::default(),
        );

        let decision = plan.node(DECISION_NODE_ID).unwrap();
        assert!(decision.dependencies.contains("tool-1-read"));
        assert!(decision
            .conditions
            .as_ref()
            .unwrap()
            .contains(&conditions::RISK_ACKNOWLEDGED.to_string()));

        let edit = plan.node("tool-2-edit").unwrap();
        assert!(edit.dependencies.contains(DECISION_NODE_ID));
        assert!(edit.dependencies.contains("tool-1-read"));

        let edge = plan.edge(DECISION_NODE_ID, "tool-2-edit").unwrap();
        assert_eq!(edge.kind, EdgeKind::Condition);
        assert!(edge.condition.as_ref().unwrap().contains(" && "));

        // The decision node sits before the edit in list order
        let ids: Vec<&String> = plan.nodes.keys().collect();
        let decision_pos = ids.iter().position(|id| *id == DECISION_NODE_ID).unwrap();
        assert_eq!(ids[decision_pos + 1], "tool-2-edit");

        assert!(PlanValidator::new().validate(&plan).valid);
    }

    #[test]
    fn test_decision_node_without_mutating_tool_is_appended() {
        let mut intent = intent_with_tools(&["search", "read"]);
        intent.risk_level = RiskLevel::High;

        let plan = PlanGraphBuilder::new().build(
            &intent,
            &RequestContext::default(),
            &BuildOptions::default(),
        );

        let ids: Vec<&str> = plan.nodes.keys().map(String::as_str).collect();
        assert_eq!(
            ids,
            vec!["tool-0-search", "tool-1-read", DECISION_NODE_ID, VERIFICATION_NODE_ID]
        );

        let decision = plan.node(DECISION_NODE_ID).unwrap();
        let expected: BTreeSet<String> = ["tool-1-read".to_string()].into_iter().collect();
        assert_eq!(decision.dependencies, expected);
        assert!(plan
            .tool_nodes()
            .all(|n| !n.dependencies.contains(DECISION_NODE_ID)));
        assert!(!plan
            .node(VERIFICATION_NODE_ID)
            .unwrap()
            .dependencies
            .contains(DECISION_NODE_ID));

        assert!(PlanValidator::new().validate(&plan).valid);
    }

    #[test]
    fn test_parallel_placeholders_are_capped_and_not_executable() {
        let intent = intent_with_tools(&["search", "read"]);
        let plan = PlanGraphBuilder::new().build(
            &intent,
            &RequestContext::default(),
            &BuildOptions {
                max_parallelism: 8,
                ..Default::default()
            },
        );

        let placeholders: Vec<&PlanNode> = plan
            .nodes
            .values()
            .filter(|n| n.kind == NodeKind::Parallel)
            .collect();
        assert_eq!(placeholders.len(), 3);
        assert!(placeholders.iter().all(|n| !n.executable));
        assert_eq!(plan.max_parallelism, 3);
        // Placeholders are never exit points
        assert_eq!(plan.exit_points, vec![VERIFICATION_NODE_ID.to_string()]);
    }

    #[test]
    fn test_optimize_boosts_parallelism() {
        let mut intent = intent_with_tools(&["search", "read", "edit", "test-runner"]);
        intent.intent = Intent::Optimize;
        let plan = PlanGraphBuilder::new().build(
            &intent,
            &RequestContext::default(),
            &BuildOptions::default(),
        );
        assert_eq!(plan.max_parallelism, 4);

        let small = intent_with_tools(&["search"]);
        let mut small = small;
        small.intent = Intent::Optimize;
        let plan = PlanGraphBuilder::new().build(
            &small,
            &RequestContext::default(),
            &BuildOptions {
                include_verification: false,
                ..Default::default()
            },
        );
        // min(4, total nodes)
        assert_eq!(plan.max_parallelism, 1);
    }

    #[test]
    fn test_risk_assessment() {
        let mut intent = intent_with_tools(&["read", "edit", "format"]);
        intent.risk_level = RiskLevel::High;
        let plan = PlanGraphBuilder::new().build(
            &intent,
            &RequestContext::default(),
            &BuildOptions::default(),
        );
        // edit and format are mutating and inherit the intent's high risk
        assert_eq!(
            plan.risk_assessment.critical_paths,
            vec!["tool-1-edit".to_string(), "tool-2-format".to_string()]
        );
        assert_eq!(plan.risk_assessment.overall, RiskLevel::Medium);
        assert_eq!(
            plan.risk_assessment.rollback_points,
            vec!["tool-1-edit".to_string(), "tool-2-format".to_string()]
        );

        let mut migration = intent_with_tools(&["read"]);
        migration.intent = Intent::Migration;
        let plan = PlanGraphBuilder::new().build(
            &migration,
            &RequestContext::default(),
            &BuildOptions::default(),
        );
        assert_eq!(plan.risk_assessment.overall, RiskLevel::High);
    }

    #[test]
    fn test_unknown_tool_becomes_custom_params() {
        let intent = intent_with_tools(&["lint"]);
        let plan = PlanGraphBuilder::new().build(
            &intent,
            &RequestContext::default(),
            &BuildOptions::default(),
        );
        let node = plan.node("tool-0-lint").unwrap();
        assert_eq!(node.parameters.as_ref().unwrap().tool_name(), "lint");
    }

    #[test]
    fn test_empty_intent_builds_verification_only() {
        let intent = intent_with_tools(&[]);
        let plan = PlanGraphBuilder::new().build(
            &intent,
            &RequestContext::default(),
            &BuildOptions::default(),
        );
        assert_eq!(plan.nodes.len(), 1);
        assert!(plan.node(VERIFICATION_NODE_ID).unwrap().dependencies.is_empty());
        assert_eq!(plan.entry_point.as_deref(), Some(VERIFICATION_NODE_ID));
    }
}
