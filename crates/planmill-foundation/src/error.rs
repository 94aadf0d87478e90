//! Error handling for the planning engine
//!
//! Only configuration defects and caller misuse surface as `PlanError`.
//! Ordinary runtime failures (a tool failing, a file that cannot be written)
//! are reported through structured results instead.

use thiserror::Error;

/// Core error type used throughout planmill
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PlanError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Unknown tool '{tool}' requested by node '{node_id}'")]
    UnknownTool { tool: String, node_id: String },

    #[error("Patch set '{id}' not found")]
    PatchSetNotFound { id: String },

    #[error("Patch set '{id}' has no rollback plan")]
    MissingRollbackPlan { id: String },

    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl PlanError {
    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new invalid data error
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Create a new not found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create a new unknown tool error
    pub fn unknown_tool(tool: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self::UnknownTool {
            tool: tool.into(),
            node_id: node_id.into(),
        }
    }

    pub fn patch_set_not_found(id: impl Into<String>) -> Self {
        Self::PatchSetNotFound { id: id.into() }
    }

    pub fn missing_rollback_plan(id: impl Into<String>) -> Self {
        Self::MissingRollbackPlan { id: id.into() }
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error signals caller misuse rather than a runtime condition
    pub fn is_configuration_defect(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::UnknownTool { .. }
                | Self::PatchSetNotFound { .. }
                | Self::MissingRollbackPlan { .. }
        )
    }
}

/// Result type alias for convenience
pub type PlanResult<T> = Result<T, PlanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = PlanError::unknown_tool("lint", "tool-2-lint");
        assert_eq!(
            err.to_string(),
            "Unknown tool 'lint' requested by node 'tool-2-lint'"
        );

        let err = PlanError::missing_rollback_plan("ps-1");
        assert_eq!(err.to_string(), "Patch set 'ps-1' has no rollback plan");
    }

    #[test]
    fn test_configuration_defect_classification() {
        assert!(PlanError::patch_set_not_found("x").is_configuration_defect());
        assert!(PlanError::missing_rollback_plan("x").is_configuration_defect());
        assert!(PlanError::unknown_tool("t", "n").is_configuration_defect());
        assert!(!PlanError::internal("boom").is_configuration_defect());
        assert!(!PlanError::cancelled("run").is_configuration_defect());
    }
}
