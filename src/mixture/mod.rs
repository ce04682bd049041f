//! Reference metamodel: a cross-categorized mixture of simple components.
//!
//! Columns are grouped into views of mutually dependent columns; within a
//! view, rows are grouped into clusters that share one component per
//! column. Numerical columns use Normal components and categorical columns
//! Dirichlet-multinomial ones.
//!
//! ```text
//! MixtureMetamodel
//!   cache: generator id ──▶ GeneratorState (RwLock)
//!                             ├── Dataset   base rows + inserted rows
//!                             ├── priors    one per column
//!                             └── models    modelno ──▶ MixtureModel
//!                                                        ├── column → view
//!                                                        └── views: row → cluster
//! ```
//!
//! State is loaded lazily from the host and cached per generator. Any
//! failed or interrupted lifecycle operation evicts the cached entry, so
//! the next access reloads the last committed state.

mod columns;
mod component;
mod config;
mod model;
mod state;
mod store;

pub use columns::StatType;
pub use config::{Initialization, MixtureConfig};

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use rand::Rng;
use rand_distr::StandardNormal;
use tracing::{debug, info};

use crate::config::ModelConfig;
use crate::error::{Error, Result};
use crate::host::{GeneratorColumn, Host};
use crate::metamodel::{
    run_analysis, AnalysisReport, AnalysisTarget, AnalyzeOptions, ColumnNumber, GeneratorId,
    Instantiate, Metamodel, ModelNumber, Prediction, RowId, StopReason,
};
use crate::schema::SchemaItem;
use crate::value::Value;

use columns::{Datum, MixtureColumn};
use component::ColumnPrior;
use model::MixtureModel;
use state::{model_rng, parse_row, GeneratorState};

/// Draws used by `predict_confidence` when the caller gives no count.
pub const DEFAULT_PREDICT_SAMPLES: usize = 100;

/// Seed offset separating model initialization from analysis iterations.
const INIT_STREAM: u64 = u64::MAX;

/// The `mixture` metamodel.
///
/// One instance serves one host.
#[derive(Default)]
pub struct MixtureMetamodel {
    cache: DashMap<GeneratorId, Arc<RwLock<GeneratorState>>>,
}

impl MixtureMetamodel {
    pub const NAME: &'static str = "mixture";

    pub fn new() -> Self {
        Self::default()
    }

    /// Completed analysis iterations of a model, as last committed.
    pub fn model_iterations(
        &self,
        host: &Host,
        generator_id: GeneratorId,
        modelno: ModelNumber,
    ) -> Result<Option<u64>> {
        store::model_iterations(host, generator_id, modelno)
    }

    /// Model numbers of a generator, in order.
    pub fn models(&self, host: &Host, generator_id: GeneratorId) -> Result<Vec<ModelNumber>> {
        let state = self.state(host, generator_id)?;
        let guard = state.read();
        Ok(guard.models.keys().copied().collect())
    }

    fn state(&self, host: &Host, generator_id: GeneratorId) -> Result<Arc<RwLock<GeneratorState>>> {
        if let Some(state) = self.cache.get(&generator_id) {
            return Ok(Arc::clone(state.value()));
        }
        let loaded = GeneratorState::load(host, generator_id)?;
        let entry = self
            .cache
            .entry(generator_id)
            .or_insert_with(|| Arc::new(RwLock::new(loaded)));
        Ok(Arc::clone(entry.value()))
    }

    fn evict(&self, generator_id: GeneratorId) {
        if self.cache.remove(&generator_id).is_some() {
            debug!(generator_id, "evicted cached generator state");
        }
    }

    /// Run a query against a generator that has models.
    ///
    /// Rows appended to the base table since the last access are
    /// incorporated first.
    fn query<T>(
        &self,
        host: &Host,
        generator_id: GeneratorId,
        f: impl FnOnce(&GeneratorState) -> Result<T>,
    ) -> Result<T> {
        let state = self.state(host, generator_id)?;
        if state.read().is_stale(host)? {
            let refreshed = state.write().refresh(host);
            if let Err(e) = refreshed {
                self.evict(generator_id);
                return Err(e);
            }
        }
        let guard = state.read();
        guard.require_models()?;
        f(&guard)
    }

    /// Run a lifecycle operation; on failure the cached state is dropped.
    fn update<T>(
        &self,
        host: &Host,
        generator_id: GeneratorId,
        f: impl FnOnce(&mut GeneratorState) -> Result<T>,
    ) -> Result<T> {
        let state = self.state(host, generator_id)?;
        let result = {
            let mut guard = state.write();
            f(&mut guard)
        };
        if result.is_err() {
            self.evict(generator_id);
        }
        result
    }
}

impl fmt::Debug for MixtureMetamodel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MixtureMetamodel")
            .field("cached_generators", &self.cache.len())
            .finish()
    }
}

// ============================================================================
// Analysis
// ============================================================================

/// An analysis of selected models of one generator.
struct AnalysisRun<'a> {
    host: &'a Host,
    state: &'a mut GeneratorState,
    modelnos: Vec<ModelNumber>,
}

impl AnalysisTarget for AnalysisRun<'_> {
    fn step(&mut self, _iteration: usize) -> Result<()> {
        let GeneratorState {
            generator_id,
            dataset,
            priors,
            models,
            ..
        } = &mut *self.state;
        for modelno in &self.modelnos {
            if let Some(model) = models.get_mut(modelno) {
                let mut rng = model_rng(&model.config, *generator_id, *modelno, model.iterations);
                model.step(dataset, priors, &mut rng);
            }
        }
        Ok(())
    }

    fn checkpoint(&mut self, completed: usize) -> Result<()> {
        let state = &*self.state;
        let modelnos = &self.modelnos;
        self.host.savepoint(|host| {
            for modelno in modelnos {
                if let Some(model) = state.models.get(modelno) {
                    store::save_model(host, state.generator_id, *modelno, &model.to_state())?;
                }
            }
            Ok(())
        })?;
        debug!(
            generator_id = state.generator_id,
            completed, "committed mixture models"
        );
        Ok(())
    }
}

// ============================================================================
// Metamodel
// ============================================================================

impl Metamodel for MixtureMetamodel {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn register(&self, host: &Host) -> Result<()> {
        store::install(host)
    }

    fn create_generator(
        &self,
        host: &Host,
        _table: &str,
        schema: &[SchemaItem],
        instantiate: &mut Instantiate<'_>,
    ) -> Result<(GeneratorId, Vec<GeneratorColumn>)> {
        let parsed = columns::parse_schema(schema)?;
        let pairs: Vec<(String, String)> = parsed
            .iter()
            .map(|(name, stattype)| (name.clone(), stattype.as_str().to_string()))
            .collect();

        let (generator_id, generator_columns) = instantiate(&pairs)?;

        let mixture_columns: Vec<MixtureColumn> = generator_columns
            .iter()
            .zip(&parsed)
            .map(|(column, (_, stattype))| MixtureColumn {
                colno: column.colno,
                stattype: *stattype,
            })
            .collect();
        store::insert_generator(host, generator_id, &mixture_columns)?;

        // Generator ids can be reused after a drop.
        self.evict(generator_id);
        Ok((generator_id, generator_columns))
    }

    fn drop_generator(&self, host: &Host, generator_id: GeneratorId) -> Result<()> {
        let result = store::delete_generator(host, generator_id);
        self.evict(generator_id);
        result
    }

    fn rename_column(
        &self,
        host: &Host,
        generator_id: GeneratorId,
        old_name: &str,
        new_name: &str,
    ) -> Result<()> {
        // Columns are keyed by number; only the generator must exist.
        store::generator_columns(host, generator_id)?;
        debug!(generator_id, old_name, new_name, "column renamed");
        Ok(())
    }

    fn initialize_models(
        &self,
        host: &Host,
        generator_id: GeneratorId,
        modelnos: &[ModelNumber],
        config: &ModelConfig,
    ) -> Result<()> {
        let config = MixtureConfig::from_model_config(config)?;

        self.update(host, generator_id, |state| {
            state.refresh(host)?;

            let mut seen = BTreeSet::new();
            for &modelno in modelnos {
                if !seen.insert(modelno) {
                    return Err(Error::invalid(format!("model {} listed twice", modelno)));
                }
                if state.models.contains_key(&modelno) {
                    return Err(Error::ModelExists {
                        generator_id,
                        modelno,
                    });
                }
            }

            let fresh: Vec<(ModelNumber, MixtureModel)> = modelnos
                .iter()
                .map(|&modelno| {
                    let mut rng = model_rng(&config, generator_id, modelno, INIT_STREAM);
                    let model = MixtureModel::initialize(
                        &state.dataset,
                        &state.priors,
                        config.clone(),
                        &mut rng,
                    );
                    (modelno, model)
                })
                .collect();

            host.savepoint(|host| {
                for (modelno, model) in &fresh {
                    store::save_model(host, generator_id, *modelno, &model.to_state())?;
                }
                Ok(())
            })?;

            state.models.extend(fresh);
            info!(generator_id, models = modelnos.len(), "initialized models");
            Ok(())
        })
    }

    fn drop_models(
        &self,
        host: &Host,
        generator_id: GeneratorId,
        modelnos: Option<&[ModelNumber]>,
    ) -> Result<()> {
        // Works from the private tables alone, so a generator whose table
        // can no longer be read can still be reset.
        store::generator_columns(host, generator_id)?;
        let result = host.savepoint(|host| match modelnos {
            None => store::delete_models(host, generator_id),
            Some(modelnos) => {
                for &modelno in modelnos {
                    if store::model_iterations(host, generator_id, modelno)?.is_none() {
                        return Err(Error::NoSuchModel {
                            generator_id,
                            modelno,
                        });
                    }
                }
                for &modelno in modelnos {
                    store::delete_model(host, generator_id, modelno)?;
                }
                Ok(())
            }
        });
        self.evict(generator_id);
        result?;

        info!(generator_id, "dropped models");
        Ok(())
    }

    fn analyze_models(
        &self,
        host: &Host,
        generator_id: GeneratorId,
        options: &AnalyzeOptions,
    ) -> Result<AnalysisReport> {
        options.validate()?;

        let report = self.update(host, generator_id, |state| {
            state.refresh(host)?;
            state.require_models()?;

            let modelnos = match &options.modelnos {
                Some(modelnos) => {
                    for &modelno in modelnos {
                        state.require_model(modelno)?;
                    }
                    modelnos.clone()
                }
                None => state.models.keys().copied().collect(),
            };

            let mut run = AnalysisRun {
                host,
                state,
                modelnos,
            };
            run_analysis(options, &mut run)
        })?;

        if report.stop == StopReason::Interrupted {
            self.evict(generator_id);
        }
        info!(
            generator_id,
            iterations = report.iterations,
            committed = report.committed_iterations,
            stop = ?report.stop,
            "analyzed models"
        );
        Ok(report)
    }

    fn column_dependence_probability(
        &self,
        host: &Host,
        generator_id: GeneratorId,
        colno0: ColumnNumber,
        colno1: ColumnNumber,
    ) -> Result<f64> {
        self.query(host, generator_id, |state| {
            let (c0, c1) = (state.column(colno0)?, state.column(colno1)?);
            if c0 == c1 {
                return Ok(1.0);
            }
            Ok(state.mean_over_models(|m| if m.same_view(c0, c1) { 1.0 } else { 0.0 }))
        })
    }

    fn mutual_information(
        &self,
        host: &Host,
        generator_id: GeneratorId,
        colno0: ColumnNumber,
        colno1: ColumnNumber,
        numsamples: usize,
    ) -> Result<f64> {
        if numsamples == 0 {
            return Err(Error::invalid("mutual information needs at least one sample"));
        }
        self.query(host, generator_id, |state| {
            let (c0, c1) = (state.column(colno0)?, state.column(colno1)?);
            let mut rng = state.query_rng(&[1, c0 as u64, c1 as u64, numsamples as u64]);
            Ok(state.mean_over_models(|m| {
                m.mutual_information(c0, c1, &state.priors, numsamples, &mut rng)
            }))
        })
    }

    fn column_typicality(
        &self,
        host: &Host,
        generator_id: GeneratorId,
        colno: ColumnNumber,
    ) -> Result<f64> {
        self.query(host, generator_id, |state| {
            let c = state.column(colno)?;
            let ncols = state.columns.len();
            if ncols == 1 {
                return Ok(1.0);
            }
            Ok(state.mean_over_models(|m| {
                let dependent = (0..ncols).filter(|&o| o != c && m.same_view(c, o)).count();
                dependent as f64 / (ncols - 1) as f64
            }))
        })
    }

    fn column_value_probability(
        &self,
        host: &Host,
        generator_id: GeneratorId,
        colno: ColumnNumber,
        value: &Value,
    ) -> Result<f64> {
        self.query(host, generator_id, |state| {
            let c = state.column(colno)?;
            let datum = state.columns[c].stattype.datum(value)?;
            if datum.is_missing() {
                return Err(Error::invalid("cannot evaluate the probability of a null value"));
            }
            Ok(state.mean_over_models(|m| m.log_density(c, &datum, &state.priors).exp()))
        })
    }

    fn row_similarity(
        &self,
        host: &Host,
        generator_id: GeneratorId,
        rowid: RowId,
        target_rowid: RowId,
        colnos: &[ColumnNumber],
    ) -> Result<f64> {
        self.query(host, generator_id, |state| {
            let (r0, r1) = (state.row(rowid)?, state.row(target_rowid)?);
            let columns: Vec<usize> = if colnos.is_empty() {
                (0..state.columns.len()).collect()
            } else {
                colnos
                    .iter()
                    .map(|&colno| state.column(colno))
                    .collect::<Result<_>>()?
            };
            Ok(state.mean_over_models(|m| m.row_similarity(r0, r1, &columns)))
        })
    }

    fn row_typicality(&self, host: &Host, generator_id: GeneratorId, rowid: RowId) -> Result<f64> {
        self.query(host, generator_id, |state| {
            let r = state.row(rowid)?;
            Ok(state.mean_over_models(|m| m.row_typicality(r)))
        })
    }

    fn row_column_predictive_probability(
        &self,
        host: &Host,
        generator_id: GeneratorId,
        rowid: RowId,
        colno: ColumnNumber,
    ) -> Result<Option<f64>> {
        self.query(host, generator_id, |state| {
            let (r, c) = (state.row(rowid)?, state.column(colno)?);

            // The cell is read from the table, so edits since the models were
            // refreshed are honoured.
            let values = host
                .generator_row(generator_id, rowid)?
                .ok_or(Error::NoSuchRow {
                    generator_id,
                    rowid,
                })?;
            let value = &values[c];
            if value.is_null() {
                return Ok(None);
            }
            let datum = state.columns[c].stattype.datum(value)?;

            let prior = &state.priors[c];
            let probability = state.mean_over_models(|m| {
                m.held_out(r, c, &state.dataset.rows, &state.priors)
                    .log_predictive(prior, &datum)
                    .exp()
            });
            Ok(Some(probability))
        })
    }

    fn predict_confidence(
        &self,
        host: &Host,
        generator_id: GeneratorId,
        colno: ColumnNumber,
        rowid: RowId,
        numsamples: Option<usize>,
    ) -> Result<Prediction> {
        self.query(host, generator_id, |state| {
            let (r, c) = (state.row(rowid)?, state.column(colno)?);
            let prior = &state.priors[c];
            let rows = &state.dataset.rows;

            match prior {
                ColumnPrior::Categorical { categories } => {
                    if categories.is_empty() {
                        return Ok(Prediction {
                            value: Value::Null,
                            confidence: 0.0,
                        });
                    }
                    let mut probabilities = vec![0.0; categories.len()];
                    for model in state.models.values() {
                        let stats = model.held_out(r, c, rows, &state.priors);
                        for (p, category) in probabilities.iter_mut().zip(categories) {
                            *p += stats.category_probability(prior, category);
                        }
                    }
                    let (best, total) = probabilities
                        .iter()
                        .enumerate()
                        .fold((0, f64::NEG_INFINITY), |(bi, bp), (i, &p)| {
                            if p > bp {
                                (i, p)
                            } else {
                                (bi, bp)
                            }
                        });
                    Ok(Prediction {
                        value: Value::Text(categories[best].clone()),
                        confidence: total / state.models.len() as f64,
                    })
                }
                ColumnPrior::Numerical { .. } => {
                    let params: Vec<(f64, f64)> = state
                        .models
                        .values()
                        .filter_map(|m| m.held_out(r, c, rows, &state.priors).normal_params(prior))
                        .collect();
                    let estimate = params.iter().map(|(mu, _)| mu).sum::<f64>() / params.len() as f64;

                    let draws = numsamples.unwrap_or(DEFAULT_PREDICT_SAMPLES).max(1);
                    let tolerance = 0.5 * prior.spread().unwrap_or(1.0);
                    let mut rng = state.query_rng(&[2, r as u64, c as u64, draws as u64]);
                    let hits = (0..draws)
                        .filter(|_| {
                            let (mu, var) = params[rng.random_range(0..params.len())];
                            let z: f64 = rng.sample(StandardNormal);
                            (mu + z * var.sqrt() - estimate).abs() <= tolerance
                        })
                        .count();

                    Ok(Prediction {
                        value: Value::Number(estimate),
                        confidence: hits as f64 / draws as f64,
                    })
                }
            }
        })
    }

    fn simulate(
        &self,
        host: &Host,
        generator_id: GeneratorId,
        constraints: &[(ColumnNumber, Value)],
        colnos: &[ColumnNumber],
        numpredictions: usize,
    ) -> Result<Vec<Vec<Value>>> {
        self.query(host, generator_id, |state| {
            let targets: Vec<usize> = colnos
                .iter()
                .map(|&colno| state.column(colno))
                .collect::<Result<_>>()?;
            let given: Vec<(usize, Datum)> = constraints
                .iter()
                .map(|(colno, value)| {
                    let c = state.column(*colno)?;
                    Ok((c, state.columns[c].stattype.datum(value)?))
                })
                .collect::<Result<_>>()?;

            let models: Vec<&MixtureModel> = state.models.values().collect();
            let mut rng = state.query_rng(&[3, numpredictions as u64, targets.len() as u64]);
            Ok((0..numpredictions)
                .map(|_| {
                    let model = models[rng.random_range(0..models.len())];
                    model
                        .simulate(&given, &targets, &state.priors, &mut rng)
                        .iter()
                        .map(Datum::to_value)
                        .collect()
                })
                .collect())
        })
    }

    fn insertmany(&self, host: &Host, generator_id: GeneratorId, rows: &[Vec<Value>]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.update(host, generator_id, |state| {
            state.refresh(host)?;
            let parsed: Vec<Vec<Datum>> = rows
                .iter()
                .map(|row| parse_row(&state.columns, row))
                .collect::<Result<_>>()?;

            let first_seq = state.dataset.inserted_len();
            state.push_rows(parsed)?;

            host.savepoint(|host| {
                store::insert_observations(host, generator_id, first_seq, rows)?;
                state.save_models(host)
            })?;
            info!(generator_id, rows = rows.len(), "inserted observations");
            Ok(())
        })
    }
}
