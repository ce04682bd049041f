//! Provider-specific model configuration.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Options passed to [`Metamodel::initialize_models`].
///
/// The host does not know which options a provider recognizes; it carries
/// them as a TOML table. Providers read them with [`ModelConfig::parse_as`]
/// into a typed struct marked `#[serde(deny_unknown_fields)]`, so an
/// unrecognized option is rejected instead of ignored.
///
/// [`Metamodel::initialize_models`]: crate::metamodel::Metamodel::initialize_models
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelConfig(toml::Table);

impl ModelConfig {
    /// An empty configuration: every option takes the provider's default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml(s: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self(table))
    }

    /// Set an option.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&toml::Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Option names, in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Deserialize into a provider's typed options.
    pub fn parse_as<T: DeserializeOwned>(&self) -> Result<T> {
        toml::Value::Table(self.0.clone())
            .try_into::<T>()
            .map_err(|e| Error::Config(e.to_string()))
    }
}

impl From<toml::Table> for ModelConfig {
    fn from(table: toml::Table) -> Self {
        Self(table)
    }
}
