//! Services for planning and executing refactoring requests

pub mod classifier;
pub mod conditions;
pub mod engine;
pub mod orchestrator;
pub mod patch_set;
pub mod planning;
pub mod tools;

pub use classifier::{ClassifyOptions, IntentClassifier, KeywordIntentClassifier};
pub use conditions::{ConditionEvaluator, ConditionOutcome};
pub use engine::{EngineReport, ExecutionEngine};
pub use orchestrator::{ExecutionResult, OrchestratorOptions, PlanningOrchestrator};
pub use patch_set::{ChecksumPatchCheck, PatchCheck, PatchSetManager};
pub use planning::{BuildOptions, PlanGraphBuilder, PlanValidator};
pub use tools::{ExecutionContext, ToolExecutor, ToolRegistry};
