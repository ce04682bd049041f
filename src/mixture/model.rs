//! One mixture model.
//!
//! Columns are partitioned into views; within each view, rows are
//! partitioned into clusters. Both partitions follow a Chinese restaurant
//! process and are updated by Gibbs sweeps. Every cluster keeps statistics
//! for every column, so moving a column between views needs no rescan.
//!
//! Row positions are aligned with [`Dataset`]: base-table rows first, then
//! rows added through `insertmany`.

use std::collections::HashMap;

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use super::columns::Datum;
use super::component::{logsumexp, sample_log_weights, sample_weights, ColumnPrior, Suff};
use super::config::{Initialization, MixtureConfig};
use super::state::Dataset;
use crate::error::{Error, Result};

// ============================================================================
// Clusters and views
// ============================================================================

#[derive(Debug, Clone)]
struct Cluster {
    size: usize,
    stats: Vec<Suff>,
}

impl Cluster {
    fn empty(priors: &[ColumnPrior]) -> Self {
        Self {
            size: 0,
            stats: priors.iter().map(ColumnPrior::empty).collect(),
        }
    }

    fn add(&mut self, row: &[Datum]) {
        self.size += 1;
        for (stat, datum) in self.stats.iter_mut().zip(row) {
            stat.add(datum);
        }
    }

    fn remove(&mut self, row: &[Datum]) {
        self.size -= 1;
        for (stat, datum) in self.stats.iter_mut().zip(row) {
            stat.remove(datum);
        }
    }

    /// Log predictive of `row` restricted to `columns`.
    fn log_predictive(&self, row: &[Datum], columns: &[usize], priors: &[ColumnPrior]) -> f64 {
        columns
            .iter()
            .map(|&c| self.stats[c].log_predictive(&priors[c], &row[c]))
            .sum()
    }
}

#[derive(Debug, Clone)]
struct View {
    /// Row position → cluster index.
    assignments: Vec<usize>,
    clusters: Vec<Cluster>,
}

impl View {
    fn build<'a>(
        assignments: Vec<usize>,
        rows: impl IntoIterator<Item = &'a [Datum]>,
        priors: &[ColumnPrior],
    ) -> Self {
        let nclusters = assignments.iter().max().map_or(0, |k| k + 1);
        let mut clusters: Vec<Cluster> = (0..nclusters).map(|_| Cluster::empty(priors)).collect();
        for (&k, row) in assignments.iter().zip(rows) {
            clusters[k].add(row);
        }
        let mut view = Self {
            assignments,
            clusters,
        };
        view.compact();
        view
    }

    fn rows(&self) -> usize {
        self.assignments.len()
    }

    /// Remove empty clusters and renumber the rest.
    fn compact(&mut self) {
        let mut remap = vec![usize::MAX; self.clusters.len()];
        let mut kept = Vec::with_capacity(self.clusters.len());
        for (k, cluster) in std::mem::take(&mut self.clusters).into_iter().enumerate() {
            if cluster.size > 0 {
                remap[k] = kept.len();
                kept.push(cluster);
            }
        }
        for k in &mut self.assignments {
            *k = remap[*k];
        }
        self.clusters = kept;
    }

    /// Log CRP weights of each cluster, then of a new cluster.
    fn log_weights(&self, alpha: f64) -> Vec<f64> {
        let total = self.rows() as f64 + alpha;
        self.clusters
            .iter()
            .map(|c| (c.size as f64 / total).ln())
            .chain(std::iter::once((alpha / total).ln()))
            .collect()
    }

    /// Statistics of `column` in cluster `k`; `k == clusters.len()` is a
    /// new, empty cluster.
    fn component(&self, k: usize, column: usize, prior: &ColumnPrior) -> Suff {
        self.clusters
            .get(k)
            .map_or_else(|| prior.empty(), |c| c.stats[column].clone())
    }

    /// Sample a cluster for `row` from its conditional given `columns`.
    fn choose_cluster(
        &self,
        row: &[Datum],
        columns: &[usize],
        priors: &[ColumnPrior],
        alpha: f64,
        rng: &mut StdRng,
    ) -> usize {
        let fresh = Cluster::empty(priors);
        let log_weights: Vec<f64> = self
            .clusters
            .iter()
            .map(|c| {
                if c.size == 0 {
                    f64::NEG_INFINITY
                } else {
                    (c.size as f64).ln() + c.log_predictive(row, columns, priors)
                }
            })
            .chain(std::iter::once(
                alpha.ln() + fresh.log_predictive(row, columns, priors),
            ))
            .collect();
        sample_log_weights(&log_weights, rng)
    }

    /// Place `row` in cluster `k`, opening a new cluster when `k` is past
    /// the end.
    fn assign(&mut self, k: usize, row: &[Datum], priors: &[ColumnPrior]) -> usize {
        let k = if k < self.clusters.len() {
            k
        } else if let Some(empty) = self.clusters.iter().position(|c| c.size == 0) {
            empty
        } else {
            self.clusters.push(Cluster::empty(priors));
            self.clusters.len() - 1
        };
        self.clusters[k].add(row);
        k
    }

    /// One Gibbs sweep over the rows of this view.
    fn sweep_rows(
        &mut self,
        rows: &[Vec<Datum>],
        columns: &[usize],
        priors: &[ColumnPrior],
        alpha: f64,
        rng: &mut StdRng,
    ) {
        for (r, row) in rows.iter().enumerate() {
            let old = self.assignments[r];
            self.clusters[old].remove(row);
            let k = self.choose_cluster(row, columns, priors, alpha, rng);
            self.assignments[r] = self.assign(k, row, priors);
        }
        self.compact();
    }

    /// Sequential log marginal likelihood of one column under this
    /// view's row partition.
    fn column_log_likelihood(&self, column: usize, rows: &[Vec<Datum>], prior: &ColumnPrior) -> f64 {
        let mut stats: Vec<Suff> = self.clusters.iter().map(|_| prior.empty()).collect();
        let mut ll = 0.0;
        for (&k, row) in self.assignments.iter().zip(rows) {
            ll += stats[k].log_predictive(prior, &row[column]);
            stats[k].add(&row[column]);
        }
        ll
    }
}

/// Draw a partition of `n` items from a Chinese restaurant process.
fn crp(n: usize, alpha: f64, rng: &mut StdRng) -> Vec<usize> {
    let mut sizes: Vec<f64> = Vec::new();
    let mut assignments = Vec::with_capacity(n);
    for _ in 0..n {
        let weights: Vec<f64> = sizes
            .iter()
            .copied()
            .chain(std::iter::once(alpha))
            .collect();
        let k = sample_weights(&weights, rng);
        if k == sizes.len() {
            sizes.push(0.0);
        }
        sizes[k] += 1.0;
        assignments.push(k);
    }
    assignments
}

fn columns_in_view(column_view: &[usize], view: usize) -> Vec<usize> {
    column_view
        .iter()
        .enumerate()
        .filter(|(_, v)| **v == view)
        .map(|(c, _)| c)
        .collect()
}

// ============================================================================
// Persisted form
// ============================================================================

/// The durable form of a model, stored as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ModelState {
    pub config: MixtureConfig,
    pub iterations: u64,
    /// Base-table rows covered by `assignments`.
    pub base_rows: usize,
    /// Inserted rows covered by `assignments`, after the base rows.
    pub inserted_rows: usize,
    pub column_view: Vec<usize>,
    /// Per view, row position → cluster.
    pub assignments: Vec<Vec<usize>>,
}

// ============================================================================
// Model
// ============================================================================

#[derive(Debug, Clone)]
pub(crate) struct MixtureModel {
    pub config: MixtureConfig,
    /// Completed analysis iterations.
    pub iterations: u64,
    base_rows: usize,
    inserted_rows: usize,
    /// Column position → view.
    column_view: Vec<usize>,
    views: Vec<View>,
}

impl MixtureModel {
    /// A fresh model drawn according to `config.initialization`.
    pub fn initialize(
        dataset: &Dataset,
        priors: &[ColumnPrior],
        config: MixtureConfig,
        rng: &mut StdRng,
    ) -> Self {
        let ncols = priors.len();
        let column_view = match config.initialization {
            Initialization::Prior => crp(ncols, config.column_alpha, rng),
            Initialization::SingleView => vec![0; ncols],
            Initialization::Independent => (0..ncols).collect(),
        };
        let nviews = column_view.iter().max().map_or(0, |v| v + 1);

        let views = (0..nviews)
            .map(|_| {
                let assignments = crp(dataset.len(), config.row_alpha, rng);
                View::build(
                    assignments,
                    dataset.rows.iter().map(Vec::as_slice),
                    priors,
                )
            })
            .collect();

        Self {
            config,
            iterations: 0,
            base_rows: dataset.base_len,
            inserted_rows: dataset.inserted_len(),
            column_view,
            views,
        }
    }

    /// Rebuild a model from its persisted form, then bring it up to date
    /// with rows added since it was saved.
    pub fn restore(
        state: ModelState,
        dataset: &Dataset,
        priors: &[ColumnPrior],
        rng: &mut StdRng,
    ) -> Result<Self> {
        let nviews = state.column_view.iter().max().map_or(0, |v| v + 1);
        let width = state.base_rows + state.inserted_rows;
        if state.column_view.len() != priors.len()
            || state.assignments.len() != nviews
            || state.assignments.iter().any(|a| a.len() != width)
        {
            return Err(Error::invalid("stored model does not match its generator"));
        }
        check_rows(dataset, state.base_rows, state.inserted_rows)?;

        let (base_rows, inserted_rows, base_len) =
            (state.base_rows, state.inserted_rows, dataset.base_len);
        let model_rows = move || {
            (0..base_rows)
                .chain(base_len..base_len + inserted_rows)
                .map(move |i| dataset.rows[i].as_slice())
        };
        let views = state
            .assignments
            .into_iter()
            .map(|assignments| View::build(assignments, model_rows(), priors))
            .collect();

        let mut model = Self {
            config: state.config,
            iterations: state.iterations,
            base_rows: state.base_rows,
            inserted_rows: state.inserted_rows,
            column_view: state.column_view,
            views,
        };
        model.sync(dataset, priors, rng)?;
        Ok(model)
    }

    pub fn to_state(&self) -> ModelState {
        ModelState {
            config: self.config.clone(),
            iterations: self.iterations,
            base_rows: self.base_rows,
            inserted_rows: self.inserted_rows,
            column_view: self.column_view.clone(),
            assignments: self.views.iter().map(|v| v.assignments.clone()).collect(),
        }
    }

    /// Incorporate rows the model has not seen yet.
    pub fn sync(&mut self, dataset: &Dataset, priors: &[ColumnPrior], rng: &mut StdRng) -> Result<()> {
        check_rows(dataset, self.base_rows, self.inserted_rows)?;

        for position in self.base_rows..dataset.base_len {
            self.incorporate(position, &dataset.rows[position], priors, rng);
        }
        self.base_rows = dataset.base_len;

        for offset in self.inserted_rows..dataset.inserted_len() {
            let position = dataset.base_len + offset;
            self.incorporate(position, &dataset.rows[position], priors, rng);
        }
        self.inserted_rows = dataset.inserted_len();
        Ok(())
    }

    fn incorporate(&mut self, position: usize, row: &[Datum], priors: &[ColumnPrior], rng: &mut StdRng) {
        let alpha = self.config.row_alpha;
        for (v, view) in self.views.iter_mut().enumerate() {
            let columns = columns_in_view(&self.column_view, v);
            let k = view.choose_cluster(row, &columns, priors, alpha, rng);
            let k = view.assign(k, row, priors);
            view.assignments.insert(position, k);
        }
    }

    // ------------------------------------------------------------------------
    // Inference
    // ------------------------------------------------------------------------

    /// One analysis iteration: a row sweep in every view, then a column
    /// sweep.
    pub fn step(&mut self, dataset: &Dataset, priors: &[ColumnPrior], rng: &mut StdRng) {
        let alpha = self.config.row_alpha;
        for (v, view) in self.views.iter_mut().enumerate() {
            let columns = columns_in_view(&self.column_view, v);
            view.sweep_rows(&dataset.rows, &columns, priors, alpha, rng);
        }
        self.sweep_columns(&dataset.rows, priors, rng);
        self.iterations += 1;
    }

    fn sweep_columns(&mut self, rows: &[Vec<Datum>], priors: &[ColumnPrior], rng: &mut StdRng) {
        let column_alpha = self.config.column_alpha;
        for column in 0..self.column_view.len() {
            let current = self.column_view[column];
            let mut counts = vec![0usize; self.views.len()];
            for &v in &self.column_view {
                counts[v] += 1;
            }

            let mut log_weights: Vec<f64> = self
                .views
                .iter()
                .enumerate()
                .map(|(v, view)| {
                    let others = counts[v] - usize::from(v == current);
                    let weight = if others == 0 {
                        column_alpha
                    } else {
                        others as f64
                    };
                    weight.ln() + view.column_log_likelihood(column, rows, &priors[column])
                })
                .collect();

            // A column alone in its view already stands for the new-view
            // proposal.
            let fresh = if counts[current] > 1 {
                let view = View::build(
                    crp(rows.len(), self.config.row_alpha, rng),
                    rows.iter().map(Vec::as_slice),
                    priors,
                );
                log_weights
                    .push(column_alpha.ln() + view.column_log_likelihood(column, rows, &priors[column]));
                Some(view)
            } else {
                None
            };

            let choice = sample_log_weights(&log_weights, rng);
            if let Some(view) = fresh.filter(|_| choice == self.views.len()) {
                self.views.push(view);
            }
            self.column_view[column] = choice;
            self.drop_empty_views();
        }
    }

    fn drop_empty_views(&mut self) {
        let mut remap = vec![usize::MAX; self.views.len()];
        let mut kept = Vec::with_capacity(self.views.len());
        for (v, view) in std::mem::take(&mut self.views).into_iter().enumerate() {
            if self.column_view.contains(&v) {
                remap[v] = kept.len();
                kept.push(view);
            }
        }
        for v in &mut self.column_view {
            *v = remap[*v];
        }
        self.views = kept;
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    #[cfg(test)]
    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    fn view_of(&self, column: usize) -> &View {
        &self.views[self.column_view[column]]
    }

    pub fn same_view(&self, column0: usize, column1: usize) -> bool {
        self.column_view[column0] == self.column_view[column1]
    }

    /// Share of the requested columns for which both rows sit in the same
    /// cluster.
    pub fn row_similarity(&self, row0: usize, row1: usize, columns: &[usize]) -> f64 {
        if columns.is_empty() {
            return 0.0;
        }
        let same = columns
            .iter()
            .filter(|&&c| {
                let view = self.view_of(c);
                view.assignments[row0] == view.assignments[row1]
            })
            .count();
        same as f64 / columns.len() as f64
    }

    /// Mean, over views, of the share of rows in this row's cluster.
    pub fn row_typicality(&self, row: usize) -> f64 {
        let total: f64 = self
            .views
            .iter()
            .map(|view| {
                let k = view.assignments[row];
                view.clusters[k].size as f64 / view.rows() as f64
            })
            .sum();
        total / self.views.len() as f64
    }

    /// Log density (or mass) of a value under the column's marginal.
    pub fn log_density(&self, column: usize, datum: &Datum, priors: &[ColumnPrior]) -> f64 {
        let prior = &priors[column];
        let view = self.view_of(column);
        let terms: Vec<f64> = view
            .log_weights(self.config.row_alpha)
            .into_iter()
            .enumerate()
            .map(|(k, w)| w + view.component(k, column, prior).log_predictive(prior, datum))
            .collect();
        logsumexp(&terms)
    }

    /// Statistics of the row's cluster in `column`, without the row's own
    /// value.
    pub fn held_out(
        &self,
        row: usize,
        column: usize,
        rows: &[Vec<Datum>],
        priors: &[ColumnPrior],
    ) -> Suff {
        let view = self.view_of(column);
        let mut stats = view.component(view.assignments[row], column, &priors[column]);
        stats.remove(&rows[row][column]);
        stats
    }

    /// Monte Carlo estimate of the mutual information of two columns.
    pub fn mutual_information(
        &self,
        column0: usize,
        column1: usize,
        priors: &[ColumnPrior],
        numsamples: usize,
        rng: &mut StdRng,
    ) -> f64 {
        if !self.same_view(column0, column1) {
            return 0.0;
        }
        let view = self.view_of(column0);
        let log_weights = view.log_weights(self.config.row_alpha);
        let (prior0, prior1) = (&priors[column0], &priors[column1]);
        let comps0: Vec<Suff> = (0..log_weights.len())
            .map(|k| view.component(k, column0, prior0))
            .collect();
        let comps1: Vec<Suff> = (0..log_weights.len())
            .map(|k| view.component(k, column1, prior1))
            .collect();

        let mut total = 0.0;
        let mut used = 0usize;
        for _ in 0..numsamples {
            let k = sample_log_weights(&log_weights, rng);
            let x0 = comps0[k].sample(prior0, rng);
            if x0.is_missing() {
                continue;
            }
            let lp0: Vec<f64> = comps0.iter().map(|s| s.log_predictive(prior0, &x0)).collect();
            let marginal0 = logsumexp(&add(&log_weights, &lp0));

            if column0 == column1 {
                total -= marginal0;
                used += 1;
                continue;
            }

            let x1 = comps1[k].sample(prior1, rng);
            if x1.is_missing() {
                continue;
            }
            let lp1: Vec<f64> = comps1.iter().map(|s| s.log_predictive(prior1, &x1)).collect();
            let marginal1 = logsumexp(&add(&log_weights, &lp1));
            let joint = logsumexp(&add(&add(&log_weights, &lp0), &lp1));
            total += joint - marginal0 - marginal1;
            used += 1;
        }

        if used == 0 {
            return 0.0;
        }
        (total / used as f64).max(0.0)
    }

    /// One joint draw of `targets` given `constraints`.
    ///
    /// Constrained target columns take their constraint value.
    pub fn simulate(
        &self,
        constraints: &[(usize, Datum)],
        targets: &[usize],
        priors: &[ColumnPrior],
        rng: &mut StdRng,
    ) -> Vec<Datum> {
        let mut chosen: HashMap<usize, usize> = HashMap::new();
        targets
            .iter()
            .map(|&column| {
                if let Some((_, datum)) = constraints.iter().find(|(c, _)| *c == column) {
                    return datum.clone();
                }
                let v = self.column_view[column];
                let k = *chosen
                    .entry(v)
                    .or_insert_with(|| self.constrained_cluster(v, constraints, priors, rng));
                self.views[v]
                    .component(k, column, &priors[column])
                    .sample(&priors[column], rng)
            })
            .collect()
    }

    fn constrained_cluster(
        &self,
        v: usize,
        constraints: &[(usize, Datum)],
        priors: &[ColumnPrior],
        rng: &mut StdRng,
    ) -> usize {
        let view = &self.views[v];
        let mut log_weights = view.log_weights(self.config.row_alpha);
        for (column, datum) in constraints {
            if self.column_view[*column] != v {
                continue;
            }
            let prior = &priors[*column];
            for (k, w) in log_weights.iter_mut().enumerate() {
                *w += view.component(k, *column, prior).log_predictive(prior, datum);
            }
        }
        sample_log_weights(&log_weights, rng)
    }
}

fn check_rows(dataset: &Dataset, base_rows: usize, inserted_rows: usize) -> Result<()> {
    if dataset.base_len < base_rows || dataset.inserted_len() < inserted_rows {
        return Err(Error::invalid(
            "rows were removed from the generator's data after models were built",
        ));
    }
    Ok(())
}

fn add(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter().zip(b).map(|(x, y)| x + y).collect()
}
