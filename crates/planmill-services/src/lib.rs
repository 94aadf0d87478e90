pub mod services;

// Re-export commonly used types at crate root for convenience
pub use services::{
    BuildOptions, ChecksumPatchCheck, ClassifyOptions, EngineReport, ExecutionContext,
    ExecutionEngine, ExecutionResult, IntentClassifier, KeywordIntentClassifier,
    OrchestratorOptions, PatchCheck, PatchSetManager, PlanGraphBuilder, PlanValidator,
    PlanningOrchestrator, ToolExecutor, ToolRegistry,
};
