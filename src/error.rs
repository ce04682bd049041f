//! Crate-wide error type.
//!
//! Errors fall into the categories a host needs to tell apart:
//!
//! - registration conflicts (a name or instance clash in the registry)
//! - schema errors (a generator schema the metamodel cannot interpret)
//! - lifecycle-state violations (unknown generators, models, rows or columns,
//!   or querying a generator that has no models)
//! - unsupported operations (contract methods a provider does not implement)
//!
//! Storage and configuration failures are carried alongside.

use thiserror::Error;

use crate::config::SettingsError;
use crate::metamodel::{ColumnNumber, GeneratorId, ModelNumber, RowId};

/// Result type for host, registry and metamodel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the host session and by metamodels.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Registration conflicts
    // ========================================================================
    /// A metamodel with this name is already registered.
    #[error("metamodel already registered: {0}")]
    AlreadyRegistered(String),

    /// No metamodel with this name is registered.
    #[error("metamodel not registered: {0}")]
    NotRegistered(String),

    /// The name is registered, but to a different instance.
    #[error("a different instance of metamodel {0} is registered")]
    InstanceMismatch(String),

    // ========================================================================
    // Schema errors
    // ========================================================================
    /// The generator schema cannot be interpreted.
    #[error("schema error: {0}")]
    Schema(String),

    // ========================================================================
    // Lifecycle-state violations
    // ========================================================================
    /// No generator with this id.
    #[error("no such generator: {0}")]
    NoSuchGenerator(GeneratorId),

    /// No generator with this name.
    #[error("no such generator: {0}")]
    NoSuchGeneratorName(String),

    /// A generator with this name already exists.
    #[error("generator already exists: {0}")]
    GeneratorExists(String),

    /// The generator has no models to query or analyze.
    #[error("generator {0} has no models")]
    NoModels(GeneratorId),

    /// The model number does not exist in the generator.
    #[error("generator {generator_id} has no model {modelno}")]
    NoSuchModel {
        generator_id: GeneratorId,
        modelno: ModelNumber,
    },

    /// The model number already exists in the generator.
    #[error("generator {generator_id} already has model {modelno}")]
    ModelExists {
        generator_id: GeneratorId,
        modelno: ModelNumber,
    },

    /// The table does not exist in the host.
    #[error("no such table: {0}")]
    NoSuchTable(String),

    /// The table has no column with this name.
    #[error("no such column {column} in table {table}")]
    NoSuchColumn { table: String, column: String },

    /// The column number is not modelled by the generator.
    #[error("generator {generator_id} does not model column {colno}")]
    NoSuchColumnNumber {
        generator_id: GeneratorId,
        colno: ColumnNumber,
    },

    /// The row id is unknown to the generator.
    #[error("generator {generator_id} has no row {rowid}")]
    NoSuchRow {
        generator_id: GeneratorId,
        rowid: RowId,
    },

    /// An argument is out of range or malformed for this generator.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // ========================================================================
    // Unsupported operations
    // ========================================================================
    /// The metamodel does not implement this operation.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    // ========================================================================
    // Configuration
    // ========================================================================
    /// The model configuration was rejected by the metamodel.
    #[error("invalid model configuration: {0}")]
    Config(String),

    /// The session settings could not be loaded.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    // ========================================================================
    // Storage
    // ========================================================================
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    /// Create an invalid-argument error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Check if this error is a registry name or instance clash.
    pub fn is_registration_conflict(&self) -> bool {
        matches!(
            self,
            Self::AlreadyRegistered(_) | Self::NotRegistered(_) | Self::InstanceMismatch(_)
        )
    }

    /// Check if this error is a schema error.
    pub fn is_schema_error(&self) -> bool {
        matches!(self, Self::Schema(_))
    }

    /// Check if this error reports operating on a nonexistent or
    /// wrong-state generator, model, row or column.
    ///
    /// These are programmer errors and are never worth retrying.
    pub fn is_lifecycle_violation(&self) -> bool {
        matches!(
            self,
            Self::NoSuchGenerator(_)
                | Self::NoSuchGeneratorName(_)
                | Self::GeneratorExists(_)
                | Self::NoModels(_)
                | Self::NoSuchModel { .. }
                | Self::ModelExists { .. }
                | Self::NoSuchTable(_)
                | Self::NoSuchColumn { .. }
                | Self::NoSuchColumnNumber { .. }
                | Self::NoSuchRow { .. }
                | Self::InvalidArgument(_)
        )
    }

    /// Check if this error reports an operation the provider does not implement.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }
}
