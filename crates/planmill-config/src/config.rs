//! Configuration management for planmill

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use planmill_foundation::{PlanError, PlanResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Execution engine configuration
    #[serde(default)]
    pub engine: EngineConfig,
    /// Project commands consumed by the command-backed tools
    #[serde(default)]
    pub project: ProjectConfig,
    /// Patch-set backup configuration
    #[serde(default)]
    pub patches: PatchesConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// What happens to the dependents of a node that failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Dependents of a failed node are recorded as skipped
    #[default]
    SkipDependents,
    /// Dependents run regardless of upstream failures
    Continue,
}

/// Execution engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on concurrently running nodes, whatever the plan asks for
    pub max_parallelism_cap: usize,
    /// Retries per node after the first attempt
    pub max_retries: u32,
    /// Base delay between attempts, multiplied by the attempt number
    pub retry_backoff_ms: u64,
    /// Per-node timeout; `None` disables it
    #[serde(default)]
    pub node_timeout_ms: Option<u64>,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

/// Project commands, run through the shell in the project root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub typecheck_command: Option<String>,
    #[serde(default)]
    pub format_command: Option<String>,
    #[serde(default)]
    pub test_command: Option<String>,
    pub command_timeout_seconds: u64,
}

/// Patch-set backup configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchesConfig {
    /// Directory receiving on-disk backups; in-memory only when unset
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallelism_cap: 8,
            max_retries: 2,
            retry_backoff_ms: 100,
            node_timeout_ms: Some(300_000), // 5 minutes
            failure_policy: FailurePolicy::SkipDependents,
        }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            typecheck_command: Some("cargo check".to_string()),
            format_command: Some("cargo fmt".to_string()),
            test_command: Some("cargo test".to_string()),
            command_timeout_seconds: 300,
        }
    }
}

impl AppConfig {
    /// Save configuration to a specified file path
    pub fn save(&self, path: &Path) -> PlanResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json_content = serde_json::to_string_pretty(self)
            .map_err(|e| PlanError::config(format!("Failed to serialize configuration: {}", e)))?;

        std::fs::write(path, json_content)
            .map_err(|e| PlanError::config(format!("Failed to write configuration file: {}", e)))?;

        Ok(())
    }

    /// Load configuration relative to the current directory
    pub fn load() -> PlanResult<Self> {
        Self::load_from(Path::new("."))
    }

    /// Load configuration from environment and config files under `root`
    ///
    /// Configuration is loaded in the following priority order (highest to lowest):
    /// 1. Environment variables (PLANMILL__*)
    /// 2. Environment-specific profile `[environments.<PLANMILL_ENV>]` from the TOML file
    /// 3. Base configuration from planmill.toml or .planmill/config.toml
    /// 4. Default values
    pub fn load_from(root: &Path) -> PlanResult<Self> {
        let env_profile = std::env::var("PLANMILL_ENV").unwrap_or_else(|_| "default".to_string());

        tracing::debug!(
            profile = %env_profile,
            root = %root.display(),
            "Loading configuration with profile"
        );

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

        let toml_paths = ["planmill.toml", ".planmill/config.toml"];
        let toml_file = toml_paths
            .iter()
            .map(|p| root.join(p))
            .find(|p| p.exists());

        if let Some(path) = &toml_file {
            tracing::info!(path = %path.display(), "Loading TOML configuration");
            figment = figment.merge(Toml::file(path));

            if env_profile != "default" {
                tracing::info!(
                    profile = %env_profile,
                    "Applying environment-specific profile"
                );
                let profile = Figment::from(Toml::file(path))
                    .focus(&format!("environments.{}", env_profile));
                figment = figment.merge(profile);
            }
        }

        figment = figment.merge(Env::prefixed("PLANMILL__").split("__"));

        let app_config: AppConfig = figment
            .extract()
            .map_err(|e| PlanError::config(format!("Failed to load configuration: {}", e)))?;

        app_config.validate()?;

        tracing::info!(
            max_retries = app_config.engine.max_retries,
            max_parallelism_cap = app_config.engine.max_parallelism_cap,
            "Configuration loaded successfully"
        );

        Ok(app_config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> PlanResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(PlanError::config(format!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        if self.engine.max_parallelism_cap == 0 {
            return Err(PlanError::config("Engine max_parallelism_cap cannot be 0"));
        }

        if self.engine.node_timeout_ms == Some(0) {
            return Err(PlanError::config(
                "Engine node_timeout_ms cannot be 0 (omit it to disable the timeout)",
            ));
        }

        if self.project.command_timeout_seconds == 0 {
            return Err(PlanError::config("Project command timeout cannot be 0"));
        }

        Ok(())
    }
}
