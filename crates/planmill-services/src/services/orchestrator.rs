//! Planning orchestrator
//!
//! One request runs through classify, build, validate and execute. Edits
//! recorded by the run are collected into a patch set so they can be
//! inspected, exported or rolled back afterwards.

use crate::services::classifier::{ClassifyOptions, IntentClassifier, KeywordIntentClassifier};
use crate::services::engine::{EngineReport, ExecutionEngine};
use crate::services::patch_set::PatchSetManager;
use crate::services::planning::{BuildOptions, PlanGraphBuilder, PlanValidator};
use crate::services::tools::{ExecutionContext, ToolRegistry};
use dashmap::DashMap;
use indexmap::IndexMap;
use planmill_config::logging::request_span;
use planmill_config::{AppConfig, FailurePolicy};
use planmill_foundation::model::{
    CreateOptions, FilePatch, IntentClassification, PatchSet, PlanGraph, RequestContext,
    ToolResult,
};
use planmill_foundation::PlanResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

/// Per-request knobs
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub classify: ClassifyOptions,
    pub build: BuildOptions,
    /// Run structural validation; issues become warnings and never abort
    pub validate: bool,
    pub dry_run: bool,
    pub backup: bool,
    /// Overrides `engine.max_retries` from the configuration
    pub max_retries: Option<u32>,
    /// Overrides `engine.failure_policy` from the configuration
    pub failure_policy: Option<FailurePolicy>,
    /// Undo the run's edits when any node failed or the run was cancelled
    pub rollback_on_failure: bool,
    pub cancellation: Option<CancellationToken>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            classify: ClassifyOptions::default(),
            build: BuildOptions::default(),
            validate: true,
            dry_run: false,
            backup: true,
            max_retries: None,
            failure_policy: None,
            rollback_on_failure: false,
            cancellation: None,
        }
    }
}

/// Summary of one orchestrated request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub request_id: String,
    pub success: bool,
    pub classification: IntentClassification,
    pub plan_graph: PlanGraph,
    pub execution_results: IndexMap<String, ToolResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_set: Option<PatchSet>,
    pub execution_time_ms: u64,
    pub retry_count: u32,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Wires the classifier, builder, validator, engine and patch sets together
pub struct PlanningOrchestrator {
    config: AppConfig,
    classifier: Arc<dyn IntentClassifier>,
    builder: PlanGraphBuilder,
    validator: PlanValidator,
    engine: ExecutionEngine,
    patch_sets: DashMap<PathBuf, Arc<PatchSetManager>>,
}

impl PlanningOrchestrator {
    /// Orchestrator with the built-in tools configured from `config.project`
    pub fn new(config: AppConfig) -> Self {
        let registry = Arc::new(ToolRegistry::with_builtins(&config.project));
        Self::with_registry(config, registry)
    }

    pub fn with_registry(config: AppConfig, registry: Arc<ToolRegistry>) -> Self {
        Self {
            engine: ExecutionEngine::new(registry, config.engine.clone()),
            config,
            classifier: Arc::new(KeywordIntentClassifier::new()),
            builder: PlanGraphBuilder::new(),
            validator: PlanValidator::new(),
            patch_sets: DashMap::new(),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        self.engine.registry()
    }

    /// Patch sets recorded for one project, created on first use
    pub fn patch_sets(&self, project_path: &Path) -> Arc<PatchSetManager> {
        self.patch_sets
            .entry(project_path.to_path_buf())
            .or_insert_with(|| {
                Arc::new(PatchSetManager::new(project_path, &self.config.patches))
            })
            .value()
            .clone()
    }

    /// Classify and build without executing anything
    pub fn plan(
        &self,
        input: &str,
        context: &RequestContext,
        options: &OrchestratorOptions,
    ) -> (IntentClassification, PlanGraph) {
        let classification = self.classifier.classify(input, context, &options.classify);
        let plan = self.builder.build(&classification, context, &options.build);
        (classification, plan)
    }

    /// Run one request end to end
    ///
    /// # Errors
    ///
    /// Only patch-set bookkeeping failures are errors. Node failures,
    /// cancellation, validation issues and rollback problems are reported
    /// inside the returned [`ExecutionResult`]; edits made before a
    /// cancellation are still recorded as a patch set.
    pub async fn execute(
        &self,
        input: &str,
        context: &RequestContext,
        project_path: impl AsRef<Path>,
        options: &OrchestratorOptions,
    ) -> PlanResult<ExecutionResult> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let span = request_span(&request_id);
        self.run(request_id, input, context, project_path.as_ref(), options)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        request_id: String,
        input: &str,
        context: &RequestContext,
        project_path: &Path,
        options: &OrchestratorOptions,
    ) -> PlanResult<ExecutionResult> {
        let start = Instant::now();
        let mut warnings = Vec::new();

        let (classification, plan) = self.plan(input, context, options);
        info!(
            intent = %classification.intent,
            confidence = classification.confidence,
            complexity = ?classification.complexity,
            risk = ?classification.risk_level,
            plan_nodes = plan.nodes.len(),
            "Planned request"
        );
        if classification.is_unknown() {
            warnings.push("Could not classify the request; running a minimal plan".to_string());
        }

        if options.validate {
            let report = self.validator.validate(&plan);
            if !report.valid {
                warn!(issues = ?report.issues, "Plan failed validation, executing anyway");
                warnings.extend(
                    report
                        .issues
                        .iter()
                        .map(|issue| format!("Plan validation: {}", issue)),
                );
            }
        }

        let mut engine_config = self.config.engine.clone();
        if let Some(max_retries) = options.max_retries {
            engine_config.max_retries = max_retries;
        }
        if let Some(policy) = options.failure_policy {
            engine_config.failure_policy = policy;
        }

        let mut ctx = ExecutionContext::new(project_path)
            .with_request(context.clone())
            .with_dry_run(options.dry_run)
            .with_backup(options.backup);
        ctx.request_id = request_id.clone();
        if let Some(token) = &options.cancellation {
            ctx = ctx.with_cancellation(token.clone());
        }

        let report = self.engine.execute_with(&plan, ctx, &engine_config).await;
        warnings.extend(unscheduled_warnings(&report));

        let mut errors = report.errors();
        let success = report.all_succeeded();

        let patch_set = self
            .record_patch_set(&request_id, &classification, &report, project_path, options)
            .await?;

        if !success && options.rollback_on_failure && !options.dry_run {
            if let Some(patch_set) = &patch_set {
                self.roll_back(patch_set, project_path, &mut warnings, &mut errors)
                    .await?;
            }
        }

        let execution_time_ms = start.elapsed().as_millis() as u64;
        let outcome = match (success, report.cancelled) {
            (true, _) => "success",
            (false, true) => "cancelled",
            (false, false) => "failure",
        };
        info!(
            outcome,
            executed = report.results.len(),
            retry_count = report.retry_count,
            execution_time_ms,
            "Request finished"
        );

        Ok(ExecutionResult {
            request_id,
            success,
            classification,
            plan_graph: plan,
            execution_results: report.results,
            patch_set,
            execution_time_ms,
            retry_count: report.retry_count,
            errors,
            warnings,
        })
    }

    /// Collect the edits of successful nodes, in execution order
    async fn record_patch_set(
        &self,
        request_id: &str,
        classification: &IntentClassification,
        report: &EngineReport,
        project_path: &Path,
        options: &OrchestratorOptions,
    ) -> PlanResult<Option<PatchSet>> {
        let patches: Vec<FilePatch> = report
            .results
            .values()
            .filter(|r| r.success)
            .filter_map(|r| r.data.patches())
            .flat_map(|patches| patches.iter().cloned())
            .collect();
        if patches.is_empty() {
            return Ok(None);
        }

        // The files already hold the new content, so there is nothing to check
        let create = CreateOptions {
            validate: false,
            backup: options.backup,
            generate_rollback: options.build.enable_rollback,
            ..CreateOptions::default()
        };
        let patch_set = self
            .patch_sets(project_path)
            .create(
                format!("{} request {}", classification.intent, request_id),
                classification.reasoning.clone(),
                patches,
                &create,
            )
            .await?;
        Ok(Some(patch_set))
    }

    async fn roll_back(
        &self,
        patch_set: &PatchSet,
        project_path: &Path,
        warnings: &mut Vec<String>,
        errors: &mut Vec<String>,
    ) -> PlanResult<()> {
        if patch_set.rollback_plan.is_none() {
            warnings.push(format!(
                "Patch set {} has no rollback plan; edits were left in place",
                patch_set.id
            ));
            return Ok(());
        }

        let report = self.patch_sets(project_path).rollback(&patch_set.id).await?;
        if report.success {
            warnings.push(format!(
                "Rolled back {} file(s) of patch set {} after a failure",
                report.rolled_back_patches.len(),
                patch_set.id
            ));
        } else {
            errors.extend(
                report
                    .failed_patches
                    .iter()
                    .map(|f| format!("rollback of {} failed: {}", f.file_path, f.error)),
            );
        }
        Ok(())
    }
}

fn unscheduled_warnings(report: &EngineReport) -> Vec<String> {
    let placeholders = report
        .not_executable
        .iter()
        .map(|id| format!("Node '{}' is not executable and was not run", id));
    let stuck = report
        .unexecutable
        .iter()
        .map(|id| format!("Node '{}' could never be scheduled", id));
    placeholders.chain(stuck).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use planmill_foundation::model::{EditInstruction, Intent};
    use tempfile::TempDir;

    fn orchestrator() -> PlanningOrchestrator {
        let mut config = AppConfig::default();
        config.project.typecheck_command = None;
        config.project.format_command = None;
        config.project.test_command = None;
        PlanningOrchestrator::new(config)
    }

    #[tokio::test]
    async fn test_unknown_request_is_degraded_not_an_error() {
        let dir = TempDir::new().unwrap();
        let result = orchestrator()
            .execute(
                "zzqx",
                &RequestContext::default(),
                dir.path(),
                &OrchestratorOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(result.classification.intent, Intent::Unknown);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("Could not classify")));
        assert!(result.patch_set.is_none());
    }

    #[tokio::test]
    async fn test_dry_run_records_patch_set_without_writing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "fn old_name() {}\n").unwrap();
        let context = RequestContext {
            target_files: vec!["lib.rs".into()],
            edits: vec![EditInstruction {
                file_path: "lib.rs".into(),
                find: "old_name".into(),
                replace: "new_name".into(),
                replace_all: true,
            }],
            risk_acknowledged: true,
            ..Default::default()
        };
        let options = OrchestratorOptions {
            dry_run: true,
            ..Default::default()
        };

        let orchestrator = orchestrator();
        let result = orchestrator
            .execute("rename old_name to new_name", &context, dir.path(), &options)
            .await
            .unwrap();

        assert!(result.success, "{:?}", result.errors);
        let patch_set = result.patch_set.expect("edit produced a patch set");
        assert_eq!(patch_set.patches[0].new_content, "fn new_name() {}\n");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("lib.rs")).unwrap(),
            "fn old_name() {}\n"
        );
        assert!(orchestrator
            .patch_sets(dir.path())
            .get(&patch_set.id)
            .is_some());
    }

    #[test]
    fn test_plan_without_execution() {
        let (classification, plan) = orchestrator().plan(
            "refactor this function",
            &RequestContext::default(),
            &OrchestratorOptions::default(),
        );
        assert_eq!(classification.intent, Intent::Refactor);
        assert!(plan.entry_point.is_some());
    }
}
