//! In-memory state of one mixture generator.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, warn};

use super::columns::{Datum, MixtureColumn, StatType};
use super::component::ColumnPrior;
use super::config::MixtureConfig;
use super::model::MixtureModel;
use super::store;
use crate::error::{Error, Result};
use crate::host::Host;
use crate::metamodel::{ColumnNumber, GeneratorId, ModelNumber, RowId};
use crate::value::Value;

// ============================================================================
// Dataset
// ============================================================================

/// The rows a generator's models are trained on.
///
/// Base-table rows come first, ordered by rowid, followed by rows added
/// through `insertmany`, which have no rowid.
#[derive(Debug, Clone, Default)]
pub(crate) struct Dataset {
    pub rows: Vec<Vec<Datum>>,
    pub rowids: Vec<Option<RowId>>,
    pub base_len: usize,
}

impl Dataset {
    pub fn new(rows: Vec<Vec<Datum>>, rowids: Vec<Option<RowId>>, base_len: usize) -> Self {
        Self {
            rows,
            rowids,
            base_len,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn inserted_len(&self) -> usize {
        self.rows.len() - self.base_len
    }

    pub fn push_inserted(&mut self, row: Vec<Datum>) {
        self.rows.push(row);
        self.rowids.push(None);
    }

    /// Position of a base-table row.
    pub fn position(&self, rowid: RowId) -> Option<usize> {
        self.rowids[..self.base_len]
            .binary_search(&Some(rowid))
            .ok()
    }

    /// Rowid of the last base-table row.
    pub fn last_base_rowid(&self) -> Option<RowId> {
        self.rowids[..self.base_len].last().copied().flatten()
    }

    pub fn fit_priors(&self, stattypes: &[StatType]) -> Vec<ColumnPrior> {
        stattypes
            .iter()
            .enumerate()
            .map(|(c, stattype)| ColumnPrior::fit(*stattype, self.rows.iter().map(|row| &row[c])))
            .collect()
    }
}

/// Interpret a row of values, one per column.
pub(crate) fn parse_row(columns: &[MixtureColumn], values: &[Value]) -> Result<Vec<Datum>> {
    if values.len() != columns.len() {
        return Err(Error::invalid(format!(
            "expected {} values per row, got {}",
            columns.len(),
            values.len()
        )));
    }
    columns
        .iter()
        .zip(values)
        .map(|(column, value)| column.stattype.datum(value))
        .collect()
}

/// Read the generator's base-table rows.
///
/// Cells that do not fit their column's type (text in a numerical column,
/// blobs) are modelled as missing. Queries on such a cell read it from the
/// table again and report it.
fn read_base_rows(
    host: &Host,
    generator_id: GeneratorId,
    columns: &[MixtureColumn],
) -> Result<(Vec<Vec<Datum>>, Vec<Option<RowId>>)> {
    let table = host.generator_rows(generator_id)?;
    let mut rows = Vec::with_capacity(table.len());
    let mut rowids = Vec::with_capacity(table.len());
    for (rowid, values) in table {
        let row = columns
            .iter()
            .zip(&values)
            .map(|(column, value)| {
                column.stattype.datum(value).unwrap_or_else(|_| {
                    warn!(generator_id, rowid, colno = column.colno, "ignoring ill-typed cell");
                    Datum::Missing
                })
            })
            .collect();
        rows.push(row);
        rowids.push(Some(rowid));
    }
    Ok((rows, rowids))
}

// ============================================================================
// Seeds
// ============================================================================

fn mix(parts: &[u64]) -> u64 {
    parts.iter().fold(0x9E37_79B9_7F4A_7C15u64, |acc, &p| {
        let x = (acc ^ p).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        x ^ (x >> 31)
    })
}

/// Random source for one analysis iteration of one model.
pub(crate) fn model_rng(
    config: &MixtureConfig,
    generator_id: GeneratorId,
    modelno: ModelNumber,
    iterations: u64,
) -> StdRng {
    StdRng::seed_from_u64(mix(&[
        config.seed,
        generator_id as u64,
        u64::from(modelno),
        iterations,
    ]))
}

// ============================================================================
// Generator state
// ============================================================================

/// Columns, data, priors and models of one generator.
#[derive(Debug, Clone)]
pub(crate) struct GeneratorState {
    pub generator_id: GeneratorId,
    pub columns: Vec<MixtureColumn>,
    pub dataset: Dataset,
    pub priors: Vec<ColumnPrior>,
    pub models: BTreeMap<ModelNumber, MixtureModel>,
}

impl GeneratorState {
    /// Load a generator from the host: its rows, inserted observations and
    /// the last committed state of every model.
    pub fn load(host: &Host, generator_id: GeneratorId) -> Result<Self> {
        let columns = store::generator_columns(host, generator_id)?;
        let (rows, rowids) = read_base_rows(host, generator_id, &columns)?;
        let base_len = rows.len();
        let mut dataset = Dataset::new(rows, rowids, base_len);
        for values in store::load_observations(host, generator_id)? {
            dataset.push_inserted(parse_row(&columns, &values)?);
        }

        let stattypes: Vec<StatType> = columns.iter().map(|c| c.stattype).collect();
        let priors = dataset.fit_priors(&stattypes);

        let mut models = BTreeMap::new();
        for (modelno, state) in store::load_models(host, generator_id)? {
            let mut rng = model_rng(&state.config, generator_id, modelno, state.iterations);
            let model = MixtureModel::restore(state, &dataset, &priors, &mut rng)?;
            models.insert(modelno, model);
        }

        debug!(
            generator_id,
            rows = dataset.len(),
            models = models.len(),
            "loaded mixture generator"
        );
        Ok(Self {
            generator_id,
            columns,
            dataset,
            priors,
            models,
        })
    }

    fn stattypes(&self) -> Vec<StatType> {
        self.columns.iter().map(|c| c.stattype).collect()
    }

    /// Whether rows were appended to or removed from the base table since
    /// the state was read. Edited cells are not detected here.
    pub fn is_stale(&self, host: &Host) -> Result<bool> {
        let (count, max_rowid) = host.generator_table_extent(self.generator_id)?;
        Ok(count != self.dataset.base_len || max_rowid != self.dataset.last_base_rowid())
    }

    /// Bring the state up to date with the base table.
    ///
    /// Appended rows are incorporated into every model. When cells of known
    /// rows changed, every model's cluster statistics are rebuilt from its
    /// partitions. Removed rows are an error.
    pub fn refresh(&mut self, host: &Host) -> Result<()> {
        let (rows, rowids) = read_base_rows(host, self.generator_id, &self.columns)?;
        let known = self.dataset.base_len;
        if rows.len() < known || rowids[..known] != self.dataset.rowids[..known] {
            return Err(Error::invalid(format!(
                "rows were removed from the table of generator {}",
                self.generator_id
            )));
        }

        let edited = rows[..known] != self.dataset.rows[..known];
        if !edited && rows.len() == known {
            return Ok(());
        }

        let base_len = rows.len();
        let inserted = self.dataset.rows.split_off(known);
        let mut dataset = Dataset::new(rows, rowids, base_len);
        for row in inserted {
            dataset.push_inserted(row);
        }
        self.dataset = dataset;
        self.refit();

        if edited {
            debug!(
                generator_id = self.generator_id,
                "base table cells changed; rebuilding model statistics"
            );
            self.rebuild_models()?;
        }
        self.sync_models()
    }

    /// Append validated observations.
    pub fn push_rows(&mut self, rows: Vec<Vec<Datum>>) -> Result<()> {
        for row in rows {
            self.dataset.push_inserted(row);
        }
        self.refit();
        self.sync_models()
    }

    fn refit(&mut self) {
        self.priors = self.dataset.fit_priors(&self.stattypes());
    }

    fn sync_models(&mut self) -> Result<()> {
        let Self {
            generator_id,
            dataset,
            priors,
            models,
            ..
        } = self;
        for (modelno, model) in models.iter_mut() {
            let mut rng = model_rng(&model.config, *generator_id, *modelno, model.iterations);
            model.sync(dataset, priors, &mut rng)?;
        }
        Ok(())
    }

    fn rebuild_models(&mut self) -> Result<()> {
        let Self {
            generator_id,
            dataset,
            priors,
            models,
            ..
        } = self;
        for (modelno, model) in models.iter_mut() {
            let mut rng = model_rng(&model.config, *generator_id, *modelno, model.iterations);
            *model = MixtureModel::restore(model.to_state(), dataset, priors, &mut rng)?;
        }
        Ok(())
    }

    /// Persist every model.
    pub fn save_models(&self, host: &Host) -> Result<()> {
        for (modelno, model) in &self.models {
            store::save_model(host, self.generator_id, *modelno, &model.to_state())?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------------

    pub fn require_models(&self) -> Result<()> {
        if self.models.is_empty() {
            return Err(Error::NoModels(self.generator_id));
        }
        Ok(())
    }

    pub fn require_model(&self, modelno: ModelNumber) -> Result<()> {
        if !self.models.contains_key(&modelno) {
            return Err(Error::NoSuchModel {
                generator_id: self.generator_id,
                modelno,
            });
        }
        Ok(())
    }

    /// Position of a modelled column.
    pub fn column(&self, colno: ColumnNumber) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.colno == colno)
            .ok_or(Error::NoSuchColumnNumber {
                generator_id: self.generator_id,
                colno,
            })
    }

    /// Position of a base-table row.
    pub fn row(&self, rowid: RowId) -> Result<usize> {
        self.dataset.position(rowid).ok_or(Error::NoSuchRow {
            generator_id: self.generator_id,
            rowid,
        })
    }

    /// Average of `f` over all models.
    pub fn mean_over_models(&self, f: impl FnMut(&MixtureModel) -> f64) -> f64 {
        let total: f64 = self.models.values().map(f).sum();
        total / self.models.len() as f64
    }

    /// Random source for a query, fixed by the query's arguments.
    pub fn query_rng(&self, parts: &[u64]) -> StdRng {
        let seed = self.models.values().next().map_or(0, |m| m.config.seed);
        let mut all = vec![seed, self.generator_id as u64];
        all.extend_from_slice(parts);
        StdRng::seed_from_u64(mix(&all))
    }
}
