//! TOML-based session settings.
//!
//! Supports a config file (bayesgen.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [database]
//! path = "${HOME}/data/survey.db"
//!
//! [analysis]
//! iterations = 200
//! iterations_per_checkpoint = 20
//! max_seconds = 600
//!
//! [models]
//! count = 16
//!
//! [models.config]
//! row_alpha = 1.0
//! initialization = "prior"
//! ```

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ModelConfig;

/// Environment variable naming an explicit settings file.
pub const CONFIG_ENV: &str = "BAYESGEN_CONFIG";

/// Settings file looked up in the working directory.
const LOCAL_CONFIG: &str = "bayesgen.toml";

/// Failures loading or validating [`Settings`].
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("cannot read settings file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("cannot parse settings: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("environment variable {0} is not set")]
    MissingEnvVar(String),

    #[error("invalid settings: {0}")]
    InvalidConfig(String),
}

/// Session settings, one section per concern.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Host database location.
    pub database: DatabaseSettings,

    /// Defaults for model analysis.
    pub analysis: AnalysisSettings,

    /// Defaults for model initialization.
    pub models: ModelSettings,
}

/// Host database settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Path to the SQLite database (supports ${ENV_VAR} expansion).
    ///
    /// An in-memory database is used when absent.
    pub path: Option<String>,
}

impl DatabaseSettings {
    /// Get the database path with environment variables expanded.
    pub fn resolved_path(&self) -> Result<Option<PathBuf>, SettingsError> {
        self.path
            .as_deref()
            .map(|p| expand_env_vars(p).map(PathBuf::from))
            .transpose()
    }

    /// The expanded database path, which must be set.
    ///
    /// For callers that need their work to outlive the process.
    pub fn required_path(&self) -> Result<PathBuf, SettingsError> {
        self.resolved_path()?.ok_or_else(|| {
            SettingsError::InvalidConfig(
                "no database path: pass --db or set database.path".to_string(),
            )
        })
    }
}

/// Analysis defaults.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Iterations per analysis call.
    pub iterations: usize,

    /// Commit progress every this many iterations.
    pub iterations_per_checkpoint: Option<usize>,

    /// Advisory wall-clock budget per analysis call, in seconds.
    pub max_seconds: Option<u64>,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            iterations: 1,
            iterations_per_checkpoint: None,
            max_seconds: None,
        }
    }
}

impl AnalysisSettings {
    pub fn max_duration(&self) -> Option<Duration> {
        self.max_seconds.map(Duration::from_secs)
    }
}

/// Model initialization defaults.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ModelSettings {
    /// Number of models to initialize per generator.
    pub count: u32,

    /// Provider-specific model configuration.
    pub config: ModelConfig,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            count: 8,
            config: ModelConfig::default(),
        }
    }
}

impl Settings {
    /// Read settings from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(SettingsError::FileNotFound(path.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Parse settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Find and read the settings file, or fall back to defaults.
    ///
    /// `$BAYESGEN_CONFIG` wins when set; otherwise the first existing file
    /// among `./bayesgen.toml` and `<config dir>/bayesgen/config.toml`.
    pub fn load() -> Result<Self, SettingsError> {
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return Self::from_file(PathBuf::from(path));
        }

        let candidates = [
            Some(PathBuf::from(LOCAL_CONFIG)),
            dirs::config_dir().map(|dir| dir.join("bayesgen").join("config.toml")),
        ];
        match candidates.into_iter().flatten().find(|p| p.is_file()) {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Reject values no analysis or initialization could honour.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.analysis.iterations == 0 {
            return Err(SettingsError::InvalidConfig(
                "analysis.iterations must be at least 1".to_string(),
            ));
        }
        if self.analysis.iterations_per_checkpoint == Some(0) {
            return Err(SettingsError::InvalidConfig(
                "analysis.iterations_per_checkpoint must be at least 1".to_string(),
            ));
        }
        if self.models.count == 0 {
            return Err(SettingsError::InvalidConfig(
                "models.count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Substitute `${NAME}` and `$NAME` references with environment values.
///
/// A `$` not followed by a name is kept as is. An unset variable is an
/// error rather than an empty string.
pub fn expand_env_vars(input: &str) -> Result<String, SettingsError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(at) = rest.find('$') {
        out.push_str(&rest[..at]);
        let after = &rest[at + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            let len = braced.find('}').unwrap_or(braced.len());
            let close = usize::from(len < braced.len());
            (&braced[..len], 1 + len + close)
        } else {
            let len = after
                .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..len], len)
        };

        if consumed == 0 {
            out.push('$');
        } else {
            let value =
                env::var(name).map_err(|_| SettingsError::MissingEnvVar(name.to_string()))?;
            out.push_str(&value);
        }
        rest = &after[consumed..];
    }

    out.push_str(rest);
    Ok(out)
}
