//! Engineered feature row and the static engineered schema

use serde::{Deserialize, Serialize};

/// Every column the feature pipeline produces, in output order.
///
/// Fit mode freezes exactly this list as the feature-column contract.
pub const ENGINEERED_COLUMNS: [&str; 56] = [
    "Time",
    "V1",
    "V2",
    "V3",
    "V4",
    "V5",
    "V6",
    "V7",
    "V8",
    "V9",
    "V10",
    "V11",
    "V12",
    "V13",
    "V14",
    "V15",
    "V16",
    "V17",
    "V18",
    "V19",
    "V20",
    "V21",
    "V22",
    "V23",
    "V24",
    "V25",
    "V26",
    "V27",
    "V28",
    "Amount",
    "hour",
    "dayofweek",
    "amount_log",
    "amount_scaled",
    "merchant_id",
    "device_type",
    "geo_bucket",
    "account_id",
    "account_age_days",
    "merchant_freq",
    "device_freq",
    "account_txn_count",
    "last_5_mean_amount",
    "last_5_count",
    "merchant_id_missing",
    "device_type_missing",
    "geo_bucket_missing",
    "account_age_days_missing",
    "merchant_id_fe",
    "device_type_fe",
    "geo_bucket_fe",
    "account_id_fe",
    "amount_times_age",
    "is_new_merchant",
    "pca_x",
    "pca_y",
];

/// Categorical code columns kept out of the projection.
const PROJECTION_EXCLUDED: [&str; 1] = ["device_type"];

/// Columns fed into the 2-axis projection: everything before `pca_x` except
/// the device code.
pub fn projection_input_columns() -> Vec<String> {
    ENGINEERED_COLUMNS[..ENGINEERED_COLUMNS.len() - 2]
        .iter()
        .filter(|c| !PROJECTION_EXCLUDED.contains(c))
        .map(|c| c.to_string())
        .collect()
}

/// A single engineered row: ordered column names with numeric values.
///
/// Columns keep insertion order; inserting an existing name overwrites it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineeredFeatureRow {
    columns: Vec<String>,
    values: Vec<f64>,
}

impl EngineeredFeatureRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            columns: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
        }
    }

    /// Insert or overwrite a column.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.position(&name) {
            Some(i) => self.values[i] = value,
            None => {
                self.columns.push(name);
                self.values.push(value);
            }
        }
    }

    /// Remove a column, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<f64> {
        let i = self.position(name)?;
        self.columns.remove(i);
        Some(self.values.remove(i))
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.position(name).map(|i| self.values[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }

    /// First column holding NaN or an infinity.
    pub fn first_non_finite(&self) -> Option<(&str, f64)> {
        self.iter().find(|(_, v)| !v.is_finite())
    }

    /// Project the row onto `names`, in that order.
    ///
    /// Returns every absent name on failure so callers can report them all.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<f64>, Vec<String>> {
        let mut out = Vec::with_capacity(names.len());
        let mut missing = Vec::new();
        for name in names {
            match self.get(name.as_ref()) {
                Some(v) => out.push(v),
                None => missing.push(name.as_ref().to_string()),
            }
        }
        if missing.is_empty() {
            Ok(out)
        } else {
            Err(missing)
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}
