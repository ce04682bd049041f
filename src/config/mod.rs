//! Configuration module for bayesgen.
//!
//! Handles session settings, environment variables, and model configuration.

mod model_config;
mod settings;

pub use model_config::ModelConfig;
pub use settings::{
    expand_env_vars, AnalysisSettings, DatabaseSettings, ModelSettings, Settings, SettingsError,
};
