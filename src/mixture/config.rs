//! Model options accepted by the mixture metamodel.

use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::error::{Error, Result};

/// How fresh models partition columns into views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initialization {
    /// Draw the column partition from the prior.
    #[default]
    Prior,
    /// Start with every column in one view.
    SingleView,
    /// Start with every column in its own view.
    Independent,
}

/// Options for [`MixtureMetamodel`](super::MixtureMetamodel) models.
///
/// ```toml
/// row_alpha = 1.0
/// column_alpha = 1.0
/// seed = 42
/// initialization = "single_view"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MixtureConfig {
    /// Concentration of the row partition within each view.
    pub row_alpha: f64,
    /// Concentration of the column partition into views.
    pub column_alpha: f64,
    /// Base seed for inference.
    pub seed: u64,
    pub initialization: Initialization,
}

impl Default for MixtureConfig {
    fn default() -> Self {
        Self {
            row_alpha: 1.0,
            column_alpha: 1.0,
            seed: 0,
            initialization: Initialization::Prior,
        }
    }
}

impl MixtureConfig {
    /// Read and validate options from a model configuration.
    pub fn from_model_config(config: &ModelConfig) -> Result<Self> {
        let parsed: MixtureConfig = config.parse_as()?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.row_alpha > 0.0 && self.row_alpha.is_finite()) {
            return Err(Error::Config(format!(
                "row_alpha must be positive, got {}",
                self.row_alpha
            )));
        }
        if !(self.column_alpha > 0.0 && self.column_alpha.is_finite()) {
            return Err(Error::Config(format!(
                "column_alpha must be positive, got {}",
                self.column_alpha
            )));
        }
        Ok(())
    }
}
