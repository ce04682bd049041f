//! The metamodel contract.
//!
//! A metamodel supplies the statistics behind probabilistic queries. The
//! host knows nothing about how a metamodel models data; it only calls the
//! operations of [`Metamodel`]:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Metamodel                            │
//! │  identity / install      name(), register()                  │
//! │  generators              create_generator(), drop_generator()│
//! │                          rename_column()                     │
//! │  model lifecycle         initialize_models(), drop_models(), │
//! │                          analyze_models(), insertmany()      │
//! │  queries                 column_dependence_probability(),    │
//! │                          mutual_information(), simulate(),   │
//! │                          predict_confidence(), ...           │
//! └──────────────────────────────────────────────────────────────┘
//!                               │ blanket impl
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       MetamodelExt                           │
//! │  predict()  (threshold over predict_confidence)              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Generator lifecycle
//!
//! ```text
//! create_generator ──▶ uninitialized ──initialize_models──▶ initialized
//!                          ▲                                    │
//!                          │ drop_models(None)    analyze_models│
//!                          │                                    ▼
//!                          └────────────────────────────── analyzed
//! drop_generator: terminal from any state
//! ```
//!
//! Queries on a generator without models fail with [`Error::NoModels`].

mod analysis;

pub use analysis::{
    run_analysis, AnalysisProgress, AnalysisReport, AnalysisTarget, AnalyzeOptions, Interrupt,
    ProgressHook, StopReason,
};

use crate::config::ModelConfig;
use crate::error::{Error, Result};
use crate::host::{GeneratorColumn, Host};
use crate::schema::SchemaItem;
use crate::value::Value;

/// Generator id, allocated by the host.
pub type GeneratorId = i64;

/// Column number: the column's position in the generator's base table.
pub type ColumnNumber = i64;

/// Row id in the generator's base table.
pub type RowId = i64;

/// Model number, unique within a generator.
pub type ModelNumber = u32;

/// Default number of Monte Carlo samples for mutual information.
pub const DEFAULT_MI_SAMPLES: usize = 100;

/// The host's generator-creation callback.
///
/// Takes the `(column name, statistical type)` pairs parsed from the schema
/// and returns the allocated generator id with the
/// `(column number, column name, statistical type)` records.
pub type Instantiate<'a> =
    dyn FnMut(&[(String, String)]) -> Result<(GeneratorId, Vec<GeneratorColumn>)> + 'a;

/// A point prediction with a confidence in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub value: Value,
    pub confidence: f64,
}

/// A provider of generative models for tables.
///
/// Every method receives the [`Host`] as its capability handle. Lifecycle
/// operations (`initialize_models`, `drop_models`, `analyze_models`,
/// `insertmany`) mutate model state and must be serialized per generator;
/// queries never mutate and may run concurrently with each other.
pub trait Metamodel: Send + Sync {
    /// Stable unique name of the metamodel.
    fn name(&self) -> &str;

    /// Install provider-private structures in the host.
    ///
    /// Called once per host, inside a savepoint: a failure leaves nothing
    /// behind.
    fn register(&self, host: &Host) -> Result<()>;

    /// Create a generator for `table` from a tokenized schema.
    ///
    /// Parses `schema` into `(column name, statistical type)` pairs, calls
    /// `instantiate` with them, and may then create private records keyed
    /// by the returned generator id and column numbers. Fails with
    /// [`Error::Schema`] when the schema cannot be interpreted.
    fn create_generator(
        &self,
        host: &Host,
        table: &str,
        schema: &[SchemaItem],
        instantiate: &mut Instantiate<'_>,
    ) -> Result<(GeneratorId, Vec<GeneratorColumn>)>;

    /// Remove all private records for a generator.
    fn drop_generator(&self, host: &Host, generator_id: GeneratorId) -> Result<()>;

    /// Note that a modelled column was renamed.
    fn rename_column(
        &self,
        _host: &Host,
        _generator_id: GeneratorId,
        _old_name: &str,
        _new_name: &str,
    ) -> Result<()> {
        Err(Error::Unsupported("rename_column"))
    }

    /// Create fresh, untrained models.
    ///
    /// Fails with [`Error::ModelExists`] if any listed model already exists
    /// and with [`Error::Config`] for unrecognized options.
    fn initialize_models(
        &self,
        host: &Host,
        generator_id: GeneratorId,
        modelnos: &[ModelNumber],
        config: &ModelConfig,
    ) -> Result<()>;

    /// Drop the listed models, or every model when `modelnos` is `None`.
    fn drop_models(
        &self,
        host: &Host,
        generator_id: GeneratorId,
        modelnos: Option<&[ModelNumber]>,
    ) -> Result<()>;

    /// Advance models through iterative inference.
    ///
    /// Resumes from persisted state; see [`AnalyzeOptions`] for budgets and
    /// checkpointing.
    fn analyze_models(
        &self,
        host: &Host,
        generator_id: GeneratorId,
        options: &AnalyzeOptions,
    ) -> Result<AnalysisReport>;

    /// Probability in `[0, 1]` that two columns are dependent.
    fn column_dependence_probability(
        &self,
        host: &Host,
        generator_id: GeneratorId,
        colno0: ColumnNumber,
        colno1: ColumnNumber,
    ) -> Result<f64>;

    /// Monte Carlo estimate (`>= 0`) of the mutual information of two
    /// columns from `numsamples` draws.
    fn mutual_information(
        &self,
        host: &Host,
        generator_id: GeneratorId,
        colno0: ColumnNumber,
        colno1: ColumnNumber,
        numsamples: usize,
    ) -> Result<f64>;

    fn column_typicality(
        &self,
        host: &Host,
        generator_id: GeneratorId,
        colno: ColumnNumber,
    ) -> Result<f64>;

    /// Density or mass of `value` under the column's fitted marginal.
    fn column_value_probability(
        &self,
        host: &Host,
        generator_id: GeneratorId,
        colno: ColumnNumber,
        value: &Value,
    ) -> Result<f64>;

    /// Similarity of `rowid` to `target_rowid` restricted to `colnos`.
    fn row_similarity(
        &self,
        host: &Host,
        generator_id: GeneratorId,
        rowid: RowId,
        target_rowid: RowId,
        colnos: &[ColumnNumber],
    ) -> Result<f64>;

    fn row_typicality(&self, host: &Host, generator_id: GeneratorId, rowid: RowId)
        -> Result<f64>;

    /// Predictive probability of the row's observed value in a column.
    ///
    /// `None` exactly when that value is null.
    fn row_column_predictive_probability(
        &self,
        host: &Host,
        generator_id: GeneratorId,
        rowid: RowId,
        colno: ColumnNumber,
    ) -> Result<Option<f64>>;

    /// Predict a column's value for a row, with a confidence.
    fn predict_confidence(
        &self,
        host: &Host,
        generator_id: GeneratorId,
        colno: ColumnNumber,
        rowid: RowId,
        numsamples: Option<usize>,
    ) -> Result<Prediction>;

    /// Draw `numpredictions` joint samples of `colnos` given `constraints`.
    ///
    /// Each row holds one value per requested column, in `colnos` order.
    fn simulate(
        &self,
        host: &Host,
        generator_id: GeneratorId,
        constraints: &[(ColumnNumber, Value)],
        colnos: &[ColumnNumber],
        numpredictions: usize,
    ) -> Result<Vec<Vec<Value>>>;

    /// Incorporate new observations into the generator's models.
    ///
    /// Each row has one value per modelled column, in schema order.
    fn insertmany(&self, host: &Host, generator_id: GeneratorId, rows: &[Vec<Value>])
        -> Result<()>;
}

impl std::fmt::Debug for dyn Metamodel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metamodel").field("name", &self.name()).finish()
    }
}

/// Operations derived from the [`Metamodel`] contract.
///
/// Implemented for every metamodel, so a provider cannot change these
/// independently of the primitives they are built on.
pub trait MetamodelExt: Metamodel {
    /// Predict a value, or `None` if the confidence is below `threshold`.
    fn predict(
        &self,
        host: &Host,
        generator_id: GeneratorId,
        colno: ColumnNumber,
        rowid: RowId,
        threshold: f64,
        numsamples: Option<usize>,
    ) -> Result<Option<Value>> {
        let prediction = self.predict_confidence(host, generator_id, colno, rowid, numsamples)?;
        if prediction.confidence < threshold {
            return Ok(None);
        }
        Ok(Some(prediction.value))
    }
}

impl<T: Metamodel + ?Sized> MetamodelExt for T {}
