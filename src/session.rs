//! Host sessions.
//!
//! A [`Session`] owns one [`Host`] database, the [`Registry`] of metamodels
//! installed in it, and the [`Settings`] it was opened with. Sessions are
//! plain values: there is no process-wide registry, and two sessions never
//! share state.
//!
//! Lifecycle and query operations are routed by generator id: the host
//! records which metamodel owns each generator, and the session forwards
//! the call to that metamodel.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use bayesgen::{AnalyzeOptions, MixtureMetamodel, ModelConfig, Session};
//!
//! let mut session = Session::open_in_memory()?;
//! session.register_metamodel(Arc::new(MixtureMetamodel::new()))?;
//!
//! let g = session.create_generator_from_spec(
//!     "people_gen",
//!     "people",
//!     "mixture",
//!     "age numerical, city categorical",
//! )?;
//! session.initialize_models(g, &[0, 1, 2, 3], &ModelConfig::new())?;
//! session.analyze_models(g, &AnalyzeOptions::default().with_iterations(50))?;
//!
//! let dependence = session.column_dependence_probability(g, 1, 2)?;
//! ```

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::config::{ModelConfig, Settings};
use crate::error::Result;
use crate::host::{GeneratorColumn, GeneratorRecord, Host};
use crate::metamodel::{
    AnalysisReport, AnalyzeOptions, ColumnNumber, GeneratorId, Metamodel, MetamodelExt,
    ModelNumber, Prediction, RowId,
};
use crate::registry::Registry;
use crate::schema::{self, SchemaItem};
use crate::value::Value;

/// A host session: one database, its metamodels, its settings.
#[derive(Debug)]
pub struct Session {
    host: Host,
    registry: Registry,
    settings: Settings,
}

impl Session {
    /// Open a session on a database file with default settings.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::with_host(Host::open(path)?, Settings::default()))
    }

    /// Open a session on an in-memory database with default settings.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::with_host(Host::open_in_memory()?, Settings::default()))
    }

    /// Open a session as described by `settings`.
    ///
    /// Uses `database.path` when set, otherwise an in-memory database.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let host = match settings.database.resolved_path()? {
            Some(path) => Host::open(path)?,
            None => Host::open_in_memory()?,
        };
        Ok(Self::with_host(host, settings))
    }

    /// Wrap an existing host.
    pub fn with_host(host: Host, settings: Settings) -> Self {
        Self {
            host,
            registry: Registry::new(),
            settings,
        }
    }

    /// End the session: release every metamodel and close the database.
    pub fn close(mut self) -> Result<()> {
        self.registry.clear();
        self.host.close()
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Install a metamodel; see [`Registry::register`].
    pub fn register_metamodel(&mut self, metamodel: Arc<dyn Metamodel>) -> Result<()> {
        self.registry.register(&self.host, metamodel)
    }

    /// Remove exactly this metamodel instance; see [`Registry::deregister`].
    pub fn deregister_metamodel(
        &mut self,
        metamodel: &Arc<dyn Metamodel>,
    ) -> Result<Arc<dyn Metamodel>> {
        self.registry.deregister(metamodel)
    }

    // ========================================================================
    // Generators
    // ========================================================================

    /// Create a generator named `name` over `table` with `metamodel`.
    ///
    /// The host record and the metamodel's private records are created in
    /// one savepoint; if the metamodel fails, no generator exists.
    pub fn create_generator(
        &self,
        name: &str,
        table: &str,
        metamodel: &str,
        schema: &[SchemaItem],
    ) -> Result<GeneratorId> {
        let provider = self.registry.get(metamodel)?;

        let (generator_id, columns) = self.host.savepoint(|host| {
            let mut instantiate = |columns: &[(String, String)]| {
                host.instantiate_generator(name, table, metamodel, columns)
            };
            provider.create_generator(host, table, schema, &mut instantiate)
        })?;

        info!(
            generator_id,
            generator = name,
            table,
            metamodel,
            columns = columns.len(),
            "created generator"
        );
        Ok(generator_id)
    }

    /// Tokenize `spec` and create a generator from it.
    pub fn create_generator_from_spec(
        &self,
        name: &str,
        table: &str,
        metamodel: &str,
        spec: &str,
    ) -> Result<GeneratorId> {
        let schema = schema::tokenize(spec)?;
        self.create_generator(name, table, metamodel, &schema)
    }

    /// Drop a generator and everything its metamodel stored for it.
    pub fn drop_generator(&self, generator_id: GeneratorId) -> Result<()> {
        let provider = self.metamodel_for(generator_id)?;
        self.host.savepoint(|host| {
            provider.drop_generator(host, generator_id)?;
            host.delete_generator(generator_id)
        })?;
        info!(generator_id, "dropped generator");
        Ok(())
    }

    /// Rename a modelled column in the host records and the metamodel.
    pub fn rename_column(
        &self,
        generator_id: GeneratorId,
        old_name: &str,
        new_name: &str,
    ) -> Result<()> {
        let provider = self.metamodel_for(generator_id)?;
        self.host.savepoint(|host| {
            host.rename_generator_column(generator_id, old_name, new_name)?;
            provider.rename_column(host, generator_id, old_name, new_name)
        })
    }

    /// Look up a generator id by name.
    pub fn generator_id(&self, name: &str) -> Result<GeneratorId> {
        self.host.generator_id(name)
    }

    pub fn generator(&self, generator_id: GeneratorId) -> Result<GeneratorRecord> {
        self.host.generator(generator_id)
    }

    pub fn generator_columns(&self, generator_id: GeneratorId) -> Result<Vec<GeneratorColumn>> {
        self.host.generator_columns(generator_id)
    }

    /// The registered metamodel that owns a generator.
    pub fn metamodel_for(&self, generator_id: GeneratorId) -> Result<Arc<dyn Metamodel>> {
        let record = self.host.generator(generator_id)?;
        self.registry.get(&record.metamodel)
    }

    // ========================================================================
    // Model lifecycle
    // ========================================================================

    pub fn initialize_models(
        &self,
        generator_id: GeneratorId,
        modelnos: &[ModelNumber],
        config: &ModelConfig,
    ) -> Result<()> {
        self.metamodel_for(generator_id)?
            .initialize_models(&self.host, generator_id, modelnos, config)
    }

    /// Initialize models `0..models.count` with the configured defaults.
    pub fn initialize_default_models(&self, generator_id: GeneratorId) -> Result<()> {
        let modelnos: Vec<ModelNumber> = (0..self.settings.models.count).collect();
        let config = self.settings.models.config.clone();
        self.initialize_models(generator_id, &modelnos, &config)
    }

    pub fn drop_models(
        &self,
        generator_id: GeneratorId,
        modelnos: Option<&[ModelNumber]>,
    ) -> Result<()> {
        self.metamodel_for(generator_id)?
            .drop_models(&self.host, generator_id, modelnos)
    }

    pub fn analyze_models(
        &self,
        generator_id: GeneratorId,
        options: &AnalyzeOptions,
    ) -> Result<AnalysisReport> {
        self.metamodel_for(generator_id)?
            .analyze_models(&self.host, generator_id, options)
    }

    /// Analysis options taken from the `[analysis]` settings.
    pub fn default_analyze_options(&self) -> AnalyzeOptions {
        let analysis = &self.settings.analysis;
        let mut options = AnalyzeOptions::default().with_iterations(analysis.iterations);
        options.iterations_per_checkpoint = analysis.iterations_per_checkpoint;
        options.max_duration = analysis.max_duration();
        options
    }

    pub fn insertmany(&self, generator_id: GeneratorId, rows: &[Vec<Value>]) -> Result<()> {
        self.metamodel_for(generator_id)?
            .insertmany(&self.host, generator_id, rows)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn column_dependence_probability(
        &self,
        generator_id: GeneratorId,
        colno0: ColumnNumber,
        colno1: ColumnNumber,
    ) -> Result<f64> {
        self.metamodel_for(generator_id)?
            .column_dependence_probability(&self.host, generator_id, colno0, colno1)
    }

    pub fn mutual_information(
        &self,
        generator_id: GeneratorId,
        colno0: ColumnNumber,
        colno1: ColumnNumber,
        numsamples: usize,
    ) -> Result<f64> {
        self.metamodel_for(generator_id)?.mutual_information(
            &self.host,
            generator_id,
            colno0,
            colno1,
            numsamples,
        )
    }

    pub fn column_typicality(&self, generator_id: GeneratorId, colno: ColumnNumber) -> Result<f64> {
        self.metamodel_for(generator_id)?
            .column_typicality(&self.host, generator_id, colno)
    }

    pub fn column_value_probability(
        &self,
        generator_id: GeneratorId,
        colno: ColumnNumber,
        value: &Value,
    ) -> Result<f64> {
        self.metamodel_for(generator_id)?
            .column_value_probability(&self.host, generator_id, colno, value)
    }

    pub fn row_similarity(
        &self,
        generator_id: GeneratorId,
        rowid: RowId,
        target_rowid: RowId,
        colnos: &[ColumnNumber],
    ) -> Result<f64> {
        self.metamodel_for(generator_id)?.row_similarity(
            &self.host,
            generator_id,
            rowid,
            target_rowid,
            colnos,
        )
    }

    pub fn row_typicality(&self, generator_id: GeneratorId, rowid: RowId) -> Result<f64> {
        self.metamodel_for(generator_id)?
            .row_typicality(&self.host, generator_id, rowid)
    }

    pub fn row_column_predictive_probability(
        &self,
        generator_id: GeneratorId,
        rowid: RowId,
        colno: ColumnNumber,
    ) -> Result<Option<f64>> {
        self.metamodel_for(generator_id)?
            .row_column_predictive_probability(&self.host, generator_id, rowid, colno)
    }

    pub fn predict_confidence(
        &self,
        generator_id: GeneratorId,
        colno: ColumnNumber,
        rowid: RowId,
        numsamples: Option<usize>,
    ) -> Result<Prediction> {
        self.metamodel_for(generator_id)?.predict_confidence(
            &self.host,
            generator_id,
            colno,
            rowid,
            numsamples,
        )
    }

    pub fn predict(
        &self,
        generator_id: GeneratorId,
        colno: ColumnNumber,
        rowid: RowId,
        threshold: f64,
        numsamples: Option<usize>,
    ) -> Result<Option<Value>> {
        self.metamodel_for(generator_id)?.predict(
            &self.host,
            generator_id,
            colno,
            rowid,
            threshold,
            numsamples,
        )
    }

    pub fn simulate(
        &self,
        generator_id: GeneratorId,
        constraints: &[(ColumnNumber, Value)],
        colnos: &[ColumnNumber],
        numpredictions: usize,
    ) -> Result<Vec<Vec<Value>>> {
        self.metamodel_for(generator_id)?.simulate(
            &self.host,
            generator_id,
            constraints,
            colnos,
            numpredictions,
        )
    }
}
