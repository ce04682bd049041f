//! Per-column priors and cluster sufficient statistics.
//!
//! Numerical columns use a Normal component with a conjugate-style prior
//! centred on the column's empirical mean and variance. Categorical columns
//! use a symmetric Dirichlet-multinomial with one extra slot for values not
//! yet seen.

use std::collections::HashMap;
use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;

use super::columns::{Datum, StatType};

/// Prior pseudo-observations for the component mean.
const KAPPA0: f64 = 1.0;

/// Prior pseudo-observations for the component variance.
const NU0: f64 = 2.0;

/// Dirichlet concentration per category.
const BETA: f64 = 1.0;

/// Smallest variance a numerical prior may carry.
const MIN_VARIANCE: f64 = 1e-6;

/// Hyperparameters for one column, fitted from the observed data.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ColumnPrior {
    Numerical { mean: f64, var: f64 },
    Categorical { categories: Vec<String> },
}

impl ColumnPrior {
    /// Fit a prior to the observed (non-missing) values of a column.
    pub fn fit<'a>(stattype: StatType, data: impl Iterator<Item = &'a Datum>) -> Self {
        match stattype {
            StatType::Numerical => {
                let xs: Vec<f64> = data
                    .filter_map(|d| match d {
                        Datum::Real(x) => Some(*x),
                        _ => None,
                    })
                    .collect();
                if xs.is_empty() {
                    return ColumnPrior::Numerical {
                        mean: 0.0,
                        var: 1.0,
                    };
                }
                let n = xs.len() as f64;
                let mean = xs.iter().sum::<f64>() / n;
                let var = if xs.len() > 1 {
                    xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)
                } else {
                    0.0
                };
                ColumnPrior::Numerical {
                    mean,
                    var: if var > MIN_VARIANCE { var } else { 1.0 },
                }
            }
            StatType::Categorical => {
                let mut categories: Vec<String> = data
                    .filter_map(|d| match d {
                        Datum::Category(c) => Some(c.clone()),
                        _ => None,
                    })
                    .collect();
                categories.sort();
                categories.dedup();
                ColumnPrior::Categorical { categories }
            }
        }
    }

    /// Empty statistics for a cluster of this column.
    pub fn empty(&self) -> Suff {
        match self {
            ColumnPrior::Numerical { .. } => Suff::Numerical {
                n: 0.0,
                sum: 0.0,
                sumsq: 0.0,
            },
            ColumnPrior::Categorical { .. } => Suff::Categorical {
                n: 0.0,
                counts: HashMap::new(),
            },
        }
    }

    /// Standard deviation of the column, for numerical columns.
    pub fn spread(&self) -> Option<f64> {
        match self {
            ColumnPrior::Numerical { var, .. } => Some(var.sqrt()),
            ColumnPrior::Categorical { .. } => None,
        }
    }

    /// Number of categorical outcomes, including the unseen slot.
    fn outcomes(categories: &[String]) -> f64 {
        categories.len() as f64 + 1.0
    }
}

/// Sufficient statistics of one column within one cluster.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Suff {
    Numerical { n: f64, sum: f64, sumsq: f64 },
    Categorical { n: f64, counts: HashMap<String, f64> },
}

impl Suff {
    pub fn add(&mut self, datum: &Datum) {
        self.update(datum, 1.0);
    }

    pub fn remove(&mut self, datum: &Datum) {
        self.update(datum, -1.0);
    }

    fn update(&mut self, datum: &Datum, sign: f64) {
        match (self, datum) {
            (Suff::Numerical { n, sum, sumsq }, Datum::Real(x)) => {
                *n += sign;
                *sum += sign * x;
                *sumsq += sign * x * x;
            }
            (Suff::Categorical { n, counts }, Datum::Category(c)) => {
                *n += sign;
                let count = counts.entry(c.clone()).or_insert(0.0);
                *count += sign;
                if *count <= 0.0 {
                    counts.remove(c);
                }
            }
            _ => {}
        }
    }

    /// Posterior predictive mean and variance of a numerical component.
    pub fn normal_params(&self, prior: &ColumnPrior) -> Option<(f64, f64)> {
        match (self, prior) {
            (Suff::Numerical { n, sum, sumsq }, ColumnPrior::Numerical { mean, var }) => {
                let mu = (sum + KAPPA0 * mean) / (n + KAPPA0);
                let scatter = if *n > 0.0 {
                    (sumsq - sum * sum / n).max(0.0)
                } else {
                    0.0
                };
                let sigma2 = (scatter + NU0 * var) / (n + NU0);
                Some((mu, sigma2 * (1.0 + 1.0 / (n + KAPPA0))))
            }
            _ => None,
        }
    }

    /// Posterior predictive probability of a category.
    pub fn category_probability(&self, prior: &ColumnPrior, category: &str) -> f64 {
        match (self, prior) {
            (Suff::Categorical { n, counts }, ColumnPrior::Categorical { categories }) => {
                let count = counts.get(category).copied().unwrap_or(0.0);
                (count + BETA) / (n + BETA * ColumnPrior::outcomes(categories))
            }
            _ => 0.0,
        }
    }

    /// Log posterior predictive density (or mass) of a datum.
    ///
    /// Missing values contribute nothing.
    pub fn log_predictive(&self, prior: &ColumnPrior, datum: &Datum) -> f64 {
        match datum {
            Datum::Missing => 0.0,
            Datum::Real(x) => match self.normal_params(prior) {
                Some((mu, var)) => normal_log_pdf(*x, mu, var),
                None => f64::NEG_INFINITY,
            },
            Datum::Category(c) => self.category_probability(prior, c).ln(),
        }
    }

    /// Draw one value from the posterior predictive.
    ///
    /// Categorical draws are restricted to known categories; a column with
    /// no observed categories yields a missing value.
    pub fn sample(&self, prior: &ColumnPrior, rng: &mut StdRng) -> Datum {
        match prior {
            ColumnPrior::Numerical { .. } => match self.normal_params(prior) {
                Some((mu, var)) => {
                    let z: f64 = rng.sample(StandardNormal);
                    Datum::Real(mu + z * var.sqrt())
                }
                None => Datum::Missing,
            },
            ColumnPrior::Categorical { categories } => {
                if categories.is_empty() {
                    return Datum::Missing;
                }
                let weights: Vec<f64> = categories
                    .iter()
                    .map(|c| self.category_probability(prior, c))
                    .collect();
                let index = sample_weights(&weights, rng);
                Datum::Category(categories[index].clone())
            }
        }
    }
}

pub(crate) fn normal_log_pdf(x: f64, mean: f64, var: f64) -> f64 {
    -0.5 * ((2.0 * PI * var).ln() + (x - mean).powi(2) / var)
}

pub(crate) fn logsumexp(xs: &[f64]) -> f64 {
    let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + xs.iter().map(|x| (x - max).exp()).sum::<f64>().ln()
}

/// Sample an index proportionally to non-negative weights.
pub(crate) fn sample_weights(weights: &[f64], rng: &mut StdRng) -> usize {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return rng.random_range(0..weights.len());
    }
    let mut u = rng.random::<f64>() * total;
    for (i, w) in weights.iter().enumerate() {
        if u < *w {
            return i;
        }
        u -= w;
    }
    weights.len() - 1
}

/// Sample an index proportionally to `exp(log_weights)`.
pub(crate) fn sample_log_weights(log_weights: &[f64], rng: &mut StdRng) -> usize {
    let max = log_weights
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return rng.random_range(0..log_weights.len());
    }
    let weights: Vec<f64> = log_weights.iter().map(|w| (w - max).exp()).collect();
    sample_weights(&weights, rng)
}
