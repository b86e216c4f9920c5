//! Frozen preprocessing parameters learned in fit mode

use crate::error::{ScoringError, ScoringResult};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Current on-disk version of `PreprocessorState`.
pub const STATE_VERSION: u32 = 1;

/// Trailing window length for the per-account behavioral features.
pub const ROLLING_WINDOW: usize = 5;

/// Merchants seen fewer times than this are flagged as new.
pub const DEFAULT_NEW_MERCHANT_THRESHOLD: f64 = 50.0;

const POWER_ITERATIONS: usize = 1000;
const POWER_TOLERANCE: f64 = 1e-12;

/// Everything apply mode needs to reproduce fit-mode output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessorState {
    pub version: u32,
    /// Seed of the synthetic categorical population
    pub seed: u64,
    pub scaler: RobustScaler,
    pub encoders: FrequencyEncoders,
    pub profiles: AccountProfiles,
    pub projection: Projection,
    #[serde(default = "default_new_merchant_threshold")]
    pub new_merchant_threshold: f64,
}

fn default_new_merchant_threshold() -> f64 {
    DEFAULT_NEW_MERCHANT_THRESHOLD
}

impl PreprocessorState {
    /// Structural checks run when the state is loaded from disk.
    pub fn validate(&self, path: &Path) -> ScoringResult<()> {
        if self.version != STATE_VERSION {
            return Err(ScoringError::schema(
                path,
                format!("unsupported preprocessor version {}", self.version),
            ));
        }
        let scaler = &self.scaler;
        if !scaler.center.is_finite() || !scaler.scale.is_finite() || scaler.scale == 0.0 {
            return Err(ScoringError::schema(
                path,
                "robust scaler must have a finite center and a non-zero scale",
            ));
        }
        self.projection
            .validate()
            .map_err(|reason| ScoringError::schema(path, reason))
    }
}

/// Median / interquartile-range scaler for `Amount`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RobustScaler {
    pub center: f64,
    pub scale: f64,
}

impl RobustScaler {
    pub fn fit(values: &[f64]) -> Self {
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        let center = percentile(&sorted, 50.0);
        let iqr = percentile(&sorted, 75.0) - percentile(&sorted, 25.0);
        let scale = if iqr == 0.0 { 1.0 } else { iqr };

        Self { center, scale }
    }

    pub fn transform(&self, value: f64) -> f64 {
        (value - self.center) / self.scale
    }
}

/// Linear-interpolated percentile of an ascending slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = q / 100.0 * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
        }
    }
}

/// Occurrence counts per categorical id in the fitted population.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrequencyEncoders {
    pub merchant_id: BTreeMap<u32, u64>,
    pub device_type: BTreeMap<u32, u64>,
    pub geo_bucket: BTreeMap<u32, u64>,
    pub account_id: BTreeMap<u32, u64>,
}

impl FrequencyEncoders {
    /// Count of `id` in `table`; unseen or unresolved ids count as zero.
    pub fn count(table: &BTreeMap<u32, u64>, id: Option<u32>) -> f64 {
        id.and_then(|id| table.get(&id)).copied().unwrap_or(0) as f64
    }

    pub(crate) fn observe(table: &mut BTreeMap<u32, u64>, id: Option<u32>) {
        if let Some(id) = id {
            *table.entry(id).or_insert(0) += 1;
        }
    }
}

/// One historical transaction of an account.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub time: f64,
    pub row_index: u64,
    pub amount: f64,
}

impl HistoryEntry {
    fn precedes(&self, time: f64, position: u64) -> bool {
        self.time < time || (self.time == time && self.row_index < position)
    }
}

/// Per-account transaction history frozen from the training batch.
///
/// Entries are kept sorted by (`time`, `row_index`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountProfiles {
    pub history: BTreeMap<u32, Vec<HistoryEntry>>,
}

impl AccountProfiles {
    pub(crate) fn from_entries(entries: impl IntoIterator<Item = (u32, HistoryEntry)>) -> Self {
        let mut history: BTreeMap<u32, Vec<HistoryEntry>> = BTreeMap::new();
        for (account, entry) in entries {
            history.entry(account).or_default().push(entry);
        }
        for entries in history.values_mut() {
            entries.sort_by(|a, b| {
                a.time
                    .total_cmp(&b.time)
                    .then_with(|| a.row_index.cmp(&b.row_index))
            });
        }
        Self { history }
    }

    /// Mean and count of the 5 transactions preceding (`time`, `position`).
    ///
    /// A partial window counts as missing and yields `(0.0, 0.0)`.
    pub fn window(&self, account_id: u32, time: f64, position: u64) -> (f64, f64) {
        let Some(entries) = self.history.get(&account_id) else {
            return (0.0, 0.0);
        };

        let end = entries.partition_point(|e| e.precedes(time, position));
        if end < ROLLING_WINDOW {
            return (0.0, 0.0);
        }
        let window = &entries[end - ROLLING_WINDOW..end];

        let sum: f64 = window.iter().map(|e| e.amount).sum();
        (sum / window.len() as f64, window.len() as f64)
    }
}

/// Frozen 2-axis linear projection of the numeric engineered columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    /// Input columns, in the order `mean` and each component are laid out
    pub input_columns: Vec<String>,
    pub mean: Vec<f64>,
    pub components: Vec<Vec<f64>>,
}

impl Projection {
    /// Fit the two leading principal axes of `data` (rows x input columns).
    pub fn fit(input_columns: Vec<String>, data: &Array2<f64>) -> Self {
        let n = data.nrows();
        let d = data.ncols();
        let mean = data
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(d));

        let centered = data - &mean;
        let denom = if n > 1 { (n - 1) as f64 } else { 1.0 };
        let mut cov = centered.t().dot(&centered) / denom;
        let threshold = cov.diag().sum().abs() * 1e-12;

        let mut components: Vec<Array1<f64>> = Vec::with_capacity(2);
        for _ in 0..2 {
            let v = match leading_eigenvector(&cov, threshold) {
                Some((lambda, v)) => {
                    let outer = v
                        .view()
                        .insert_axis(Axis(1))
                        .dot(&v.view().insert_axis(Axis(0)));
                    cov = cov - outer * lambda;
                    v
                }
                None => orthogonal_basis_vector(d, &components),
            };
            components.push(v);
        }
        let components = components.into_iter().map(|c| c.to_vec()).collect();

        Self {
            input_columns,
            mean: mean.to_vec(),
            components,
        }
    }

    /// Project one row given in `input_columns` order.
    pub fn project(&self, values: &[f64]) -> [f64; 2] {
        let mut out = [0.0; 2];
        for (slot, component) in out.iter_mut().zip(&self.components) {
            *slot = values
                .iter()
                .zip(&self.mean)
                .zip(component)
                .map(|((x, m), w)| (x - m) * w)
                .sum();
        }
        out
    }

    fn validate(&self) -> Result<(), String> {
        let d = self.input_columns.len();
        if self.components.len() != 2 {
            return Err(format!(
                "projection must have 2 components, found {}",
                self.components.len()
            ));
        }
        if self.mean.len() != d || self.components.iter().any(|c| c.len() != d) {
            return Err(format!("projection vectors must all have width {d}"));
        }
        Ok(())
    }
}

/// Power iteration for the dominant eigenpair of a symmetric PSD matrix.
///
/// Returns `None` once the matrix is numerically exhausted (`|Cv| <= threshold`).
/// The returned vector's largest-magnitude entry is positive.
fn leading_eigenvector(cov: &Array2<f64>, threshold: f64) -> Option<(f64, Array1<f64>)> {
    let d = cov.nrows();
    if d == 0 {
        return None;
    }
    let floor = threshold.max(f64::MIN_POSITIVE);

    let mut v = Array1::from_iter((0..d).map(|i| 1.0 + i as f64 / d as f64));
    let norm = v.dot(&v).sqrt();
    v /= norm;

    for _ in 0..POWER_ITERATIONS {
        let w = cov.dot(&v);
        let norm = w.dot(&w).sqrt();
        if !norm.is_finite() || norm <= floor {
            return None;
        }
        let next = w / norm;
        let delta: f64 = (&next - &v).mapv(f64::abs).sum();
        v = next;
        if delta < POWER_TOLERANCE {
            break;
        }
    }

    let lambda = v.dot(&cov.dot(&v));
    Some((lambda, with_positive_pivot(v)))
}

/// First unit axis with a non-negligible part orthogonal to `previous`.
fn orthogonal_basis_vector(d: usize, previous: &[Array1<f64>]) -> Array1<f64> {
    for i in 0..d {
        let mut v = Array1::<f64>::zeros(d);
        v[i] = 1.0;
        for p in previous {
            let overlap = v.dot(p);
            v = v - p * overlap;
        }
        let norm = v.dot(&v).sqrt();
        if norm > 1e-8 {
            return with_positive_pivot(v / norm);
        }
    }
    Array1::zeros(d)
}

fn with_positive_pivot(mut v: Array1<f64>) -> Array1<f64> {
    let pivot = v
        .iter()
        .copied()
        .fold(0.0_f64, |best, x| if x.abs() > best.abs() { x } else { best });
    if pivot < 0.0 {
        v.mapv_inplace(|x| -x);
    }
    v
}
