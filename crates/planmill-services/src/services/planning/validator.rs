//! Structural validation of plan graphs.

use planmill_foundation::model::{PlanGraph, ValidationReport};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};

/// Checks a plan graph for cycles, unreachable nodes and dangling dependencies.
///
/// Validation is pure: the same graph always yields the same report.
#[derive(Debug, Clone, Default)]
pub struct PlanValidator;

impl PlanValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, plan: &PlanGraph) -> ValidationReport {
        let mut issues = Vec::new();
        let mut suggestions = Vec::new();

        self.check_cycles(plan, &mut issues, &mut suggestions);
        self.check_reachability(plan, &mut issues, &mut suggestions);
        self.check_dependencies(plan, &mut issues, &mut suggestions);

        let valid = issues.is_empty();
        if valid {
            debug!(nodes = plan.nodes.len(), "Plan graph is valid");
        } else {
            warn!(issues = issues.len(), "Plan graph failed validation");
        }

        ValidationReport {
            valid,
            issues,
            suggestions,
        }
    }

    fn check_cycles(
        &self,
        plan: &PlanGraph,
        issues: &mut Vec<String>,
        suggestions: &mut Vec<String>,
    ) {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();

        for id in plan.nodes.keys() {
            if visited.contains(id.as_str()) {
                continue;
            }
            if let Some(culprit) = find_cycle(plan, id, &mut visited, &mut rec_stack) {
                issues.push(format!("Cycle detected involving node '{}'", culprit));
                suggestions.push(format!(
                    "Remove one of the dependencies forming the cycle through '{}'",
                    culprit
                ));
            }
            // An early return leaves the stack populated
            rec_stack.clear();
        }
    }

    /// Breadth-first walk over edges from the entry point.
    ///
    /// Non-executable placeholders are exempt; they are never dispatched.
    fn check_reachability(
        &self,
        plan: &PlanGraph,
        issues: &mut Vec<String>,
        suggestions: &mut Vec<String>,
    ) {
        if plan.nodes.is_empty() {
            return;
        }

        let entry = match plan.entry_point.as_deref() {
            Some(entry) if plan.nodes.contains_key(entry) => entry,
            Some(entry) => {
                issues.push(format!("Entry point '{}' is not a node of the plan", entry));
                suggestions.push("Point the entry point at an existing node".to_string());
                return;
            }
            None => {
                issues.push("Plan has no entry point".to_string());
                suggestions.push("Set the entry point to a node without dependencies".to_string());
                return;
            }
        };

        let mut reached: HashSet<&str> = HashSet::new();
        let mut queue = VecDeque::from([entry]);
        reached.insert(entry);

        while let Some(current) = queue.pop_front() {
            for edge in plan.outgoing(current) {
                if plan.nodes.contains_key(&edge.to) && reached.insert(edge.to.as_str()) {
                    queue.push_back(edge.to.as_str());
                }
            }
        }

        for node in plan.nodes.values() {
            if node.executable && !reached.contains(node.id.as_str()) {
                issues.push(format!(
                    "Node '{}' is unreachable from entry point '{}'",
                    node.id, entry
                ));
                suggestions.push(format!(
                    "Connect '{}' to the rest of the plan or remove it",
                    node.id
                ));
            }
        }
    }

    fn check_dependencies(
        &self,
        plan: &PlanGraph,
        issues: &mut Vec<String>,
        suggestions: &mut Vec<String>,
    ) {
        for node in plan.nodes.values() {
            for dep in &node.dependencies {
                if !plan.nodes.contains_key(dep) {
                    issues.push(format!(
                        "Node '{}' has missing dependency '{}'",
                        node.id, dep
                    ));
                    suggestions.push(format!(
                        "Add node '{}' or remove it from the dependencies of '{}'",
                        dep, node.id
                    ));
                }
            }
        }
    }
}

/// Depth-first search over dependencies; returns the node that closed a cycle
fn find_cycle<'a>(
    plan: &'a PlanGraph,
    id: &'a str,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
) -> Option<&'a str> {
    visited.insert(id);
    rec_stack.insert(id);

    if let Some(node) = plan.nodes.get(id) {
        for dep in &node.dependencies {
            // Dangling dependencies are reported separately
            if !plan.nodes.contains_key(dep) {
                continue;
            }
            if rec_stack.contains(dep.as_str()) {
                return Some(dep.as_str());
            }
            if !visited.contains(dep.as_str()) {
                if let Some(culprit) = find_cycle(plan, dep, visited, rec_stack) {
                    return Some(culprit);
                }
            }
        }
    }

    rec_stack.remove(id);
    None
}
