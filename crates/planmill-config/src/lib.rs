//! planmill-config: configuration loading and logging initialisation

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, EngineConfig, FailurePolicy, LogFormat, LoggingConfig, PatchesConfig,
    ProjectConfig,
};
