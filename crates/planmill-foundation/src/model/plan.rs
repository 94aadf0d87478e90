//! Plan graph types: nodes, edges, typed tool parameters and risk assessment.

use super::intent::RiskLevel;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Names of the built-in tools.
pub mod tool_names {
    pub const SEARCH: &str = "search";
    pub const READ: &str = "read";
    pub const EDIT: &str = "edit";
    pub const TYPECHECK: &str = "typecheck";
    pub const FORMAT: &str = "format";
    pub const TEST_RUNNER: &str = "test-runner";
    pub const SAFETY_CHECK: &str = "safety-check";
    pub const ROLLBACK: &str = "rollback";
}

/// Kind of a plan node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Tool,
    Decision,
    Parallel,
    Sequential,
    Condition,
    Verification,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub query: String,
    /// Sub-directory of the project root to search, defaults to the root
    #[serde(default)]
    pub path: Option<String>,
    pub max_results: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadParams {
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditParams {
    pub edits: Vec<super::context::EditInstruction>,
    /// Snapshot the pre-image of each file into the result's rollback data
    pub backup: bool,
    pub description: String,
}

/// Parameters for the command-backed tools (typecheck, format, test-runner).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandParams {
    /// Overrides the project-configured command
    #[serde(default)]
    pub command: Option<String>,
    /// Extra arguments appended to the command (files, test filter, ...)
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyCheckParams {
    pub checks: Vec<String>,
    pub target_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackParams {
    /// Restore the recorded pre-images instead of only verifying them
    pub restore: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomParams {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// Strongly-typed tool parameters, keyed by tool name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "kebab-case")]
pub enum ToolParams {
    Search(SearchParams),
    Read(ReadParams),
    Edit(EditParams),
    Typecheck(CommandParams),
    Format(CommandParams),
    TestRunner(CommandParams),
    SafetyCheck(SafetyCheckParams),
    Rollback(RollbackParams),
    /// Parameters for a tool registered outside the built-in set
    Custom(CustomParams),
}

impl ToolParams {
    /// Registry name of the tool these parameters belong to
    pub fn tool_name(&self) -> &str {
        match self {
            ToolParams::Search(_) => tool_names::SEARCH,
            ToolParams::Read(_) => tool_names::READ,
            ToolParams::Edit(_) => tool_names::EDIT,
            ToolParams::Typecheck(_) => tool_names::TYPECHECK,
            ToolParams::Format(_) => tool_names::FORMAT,
            ToolParams::TestRunner(_) => tool_names::TEST_RUNNER,
            ToolParams::SafetyCheck(_) => tool_names::SAFETY_CHECK,
            ToolParams::Rollback(_) => tool_names::ROLLBACK,
            ToolParams::Custom(custom) => &custom.name,
        }
    }
}

/// Whether running the named tool changes files on disk
pub fn is_mutating_tool(name: &str) -> bool {
    matches!(
        name,
        tool_names::EDIT | tool_names::FORMAT | tool_names::ROLLBACK
    )
}

fn default_true() -> bool {
    true
}

/// A node of the plan graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanNode {
    /// Unique within the graph
    pub id: String,
    pub kind: NodeKind,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<ToolParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<String>>,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// Minutes
    pub estimated_time: f64,
    pub risk_level: RiskLevel,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_plan: Option<String>,
    /// Scaffolding nodes are part of the graph but are never dispatched
    #[serde(default = "default_true")]
    pub executable: bool,
}

impl PlanNode {
    pub fn new(id: impl Into<String>, kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            description: String::new(),
            tool: None,
            parameters: None,
            conditions: None,
            dependencies: BTreeSet::new(),
            estimated_time: 0.0,
            risk_level: RiskLevel::Low,
            retryable: false,
            rollback_plan: None,
            executable: true,
        }
    }

    pub fn is_mutating(&self) -> bool {
        self.tool.as_deref().is_some_and(is_mutating_tool)
    }
}

/// Kind of a control edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Success,
    Failure,
    Condition,
    Parallel,
    Sequential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanEdge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    pub weight: f64,
}

impl PlanEdge {
    pub fn new(from: impl Into<String>, to: impl Into<String>, kind: EdgeKind) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind,
            condition: None,
            weight: 1.0,
        }
    }

    pub fn key(&self) -> String {
        edge_key(&self.from, &self.to)
    }
}

/// Edges are keyed by their `from->to` pair
pub fn edge_key(from: &str, to: &str) -> String {
    format!("{}->{}", from, to)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub overall: RiskLevel,
    /// Ids of high-risk nodes
    pub critical_paths: Vec<String>,
    /// Ids of nodes carrying a rollback plan
    pub rollback_points: Vec<String>,
}

/// A directed acyclic graph of actionable and decision nodes.
///
/// Built once per request and read-only during execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanGraph {
    pub nodes: IndexMap<String, PlanNode>,
    pub edges: IndexMap<String, PlanEdge>,
    pub entry_point: Option<String>,
    pub exit_points: Vec<String>,
    /// Sum of every node's estimate, in minutes
    pub estimated_total_time: f64,
    pub max_parallelism: usize,
    pub risk_assessment: RiskAssessment,
}

impl PlanGraph {
    pub fn node(&self, id: &str) -> Option<&PlanNode> {
        self.nodes.get(id)
    }

    pub fn edge(&self, from: &str, to: &str) -> Option<&PlanEdge> {
        self.edges.get(&edge_key(from, to))
    }

    pub fn insert_edge(&mut self, edge: PlanEdge) {
        self.edges.insert(edge.key(), edge);
    }

    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a PlanEdge> + 'a {
        self.edges.values().filter(move |e| e.from == id)
    }

    /// Nodes that declare `id` as a dependency
    pub fn dependents_of<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a PlanNode> + 'a {
        self.nodes
            .values()
            .filter(move |n| n.dependencies.contains(id))
    }

    pub fn tool_nodes(&self) -> impl Iterator<Item = &PlanNode> {
        self.nodes.values().filter(|n| n.kind == NodeKind::Tool)
    }
}

/// Outcome of structural plan validation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub valid: bool,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_params_tagged_by_tool_name() {
        let params = ToolParams::TestRunner(CommandParams {
            command: None,
            args: vec!["--lib".into()],
        });
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["tool"], json!("test-runner"));
        assert_eq!(params.tool_name(), tool_names::TEST_RUNNER);

        let parsed: ToolParams = serde_json::from_value(json!({
            "tool": "search",
            "query": "parse_config",
            "maxResults": 10
        }))
        .unwrap();
        assert_eq!(parsed.tool_name(), "search");
    }

    #[test]
    fn test_custom_params_report_their_own_name() {
        let params = ToolParams::Custom(CustomParams {
            name: "lint".into(),
            args: json!({"fix": true}),
        });
        assert_eq!(params.tool_name(), "lint");
    }

    #[test]
    fn test_edges_keyed_by_pair() {
        let mut graph = PlanGraph::default();
        graph.insert_edge(PlanEdge::new("a", "b", EdgeKind::Success));
        graph.insert_edge(PlanEdge::new("a", "b", EdgeKind::Condition));
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edge("a", "b").unwrap().kind, EdgeKind::Condition);
        assert_eq!(graph.outgoing("a").count(), 1);
    }

    #[test]
    fn test_mutating_tools() {
        assert!(is_mutating_tool("edit"));
        assert!(is_mutating_tool("format"));
        assert!(!is_mutating_tool("search"));
        assert!(!is_mutating_tool("typecheck"));
    }
}
