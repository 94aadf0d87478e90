//! Data model for the intent-to-execution pipeline.

pub mod context;
pub mod intent;
pub mod patch;
pub mod plan;
pub mod tool;

pub use context::{EditInstruction, RequestContext};
pub use intent::{Complexity, Intent, IntentClassification, RiskLevel};
pub use patch::{
    ApplyOptions, ApplyReport, Change, ChangeKind, CreateOptions, FilePatch, FileSnapshot, Impact,
    PatchFailure, PatchMetadata, PatchSet, PatchSetMetadata, RollbackPlan, RollbackReport,
    RollbackVerification,
};
pub use plan::{
    edge_key, is_mutating_tool, tool_names, CommandParams, CustomParams, EdgeKind, EditParams,
    NodeKind, PlanEdge, PlanGraph, PlanNode, ReadParams, RiskAssessment, RollbackParams,
    SafetyCheckParams, SearchParams, ToolParams, ValidationReport,
};
pub use tool::{CommandOutput, FileContent, RollbackData, SearchMatch, ToolData, ToolResult};
