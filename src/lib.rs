//! # bayesgen
//!
//! A registration and query-dispatch layer for generative models of tables.
//!
//! ## Architecture
//!
//! A host database stores tables and the canonical records of
//! *generators*: named, schema-bound instantiations of a *metamodel* over
//! one table. Metamodels are pluggable statistics providers; the host only
//! knows their contract.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      Session                             │
//! │  (one host database + its registry + settings)           │
//! └─────────────────────────────────────────────────────────┘
//!          │ register / deregister        │ routes by generator id
//!          ▼                              ▼
//! ┌──────────────────────┐   ┌──────────────────────────────┐
//! │      Registry        │   │            Host              │
//! │  name → Metamodel    │   │  tables, generator records,  │
//! └──────────────────────┘   │  savepoints                  │
//!          │                 └──────────────────────────────┘
//!          ▼                              ▲
//! ┌─────────────────────────────────────────────────────────┐
//! │              Metamodel (trait) + MetamodelExt            │
//! │  lifecycle: initialize / analyze / drop / insertmany     │
//! │  queries: dependence, MI, typicality, similarity,        │
//! │           predictive probability, predict, simulate      │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [reference provider]
//! ┌─────────────────────────────────────────────────────────┐
//! │                  MixtureMetamodel                        │
//! │  views of columns, clusters of rows, Gibbs analysis      │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod host;
pub mod metamodel;
pub mod mixture;
pub mod registry;
pub mod schema;
pub mod session;
pub mod value;

pub use config::{ModelConfig, Settings, SettingsError};
pub use error::{Error, Result};
pub use host::{GeneratorColumn, GeneratorRecord, Host};
pub use metamodel::{
    AnalysisProgress, AnalysisReport, AnalysisTarget, AnalyzeOptions, ColumnNumber, GeneratorId,
    Instantiate, Interrupt, Metamodel, MetamodelExt, ModelNumber, Prediction, RowId, StopReason,
    DEFAULT_MI_SAMPLES,
};
pub use mixture::{MixtureConfig, MixtureMetamodel, StatType};
pub use registry::Registry;
pub use schema::{tokenize, SchemaItem, SchemaToken};
pub use session::Session;
pub use value::Value;
