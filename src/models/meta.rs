//! Meta-feature assembly for the second-stage model

use crate::error::{ScoringError, ScoringResult};
use crate::features::EngineeredFeatureRow;
use crate::models::loader::ModelArtifactSet;
use crate::models::signals::BaseSignals;
use serde::Serialize;
use std::collections::BTreeMap;

pub const TREE_SIGNAL: &str = "xgb_oof_proba";
pub const ANOMALY_SIGNAL: &str = "anomaly_score";
pub const RECONSTRUCTION_SIGNAL: &str = "ae_recon_error";
pub const CLUSTER_ID: &str = "cluster_id";

/// Engineered columns offered to the meta-model next to the base signals.
pub const CONTEXT_COLUMNS: [&str; 4] = [
    "amount_log",
    "merchant_freq",
    "account_txn_count",
    "last_5_mean_amount",
];

/// Meta-model input, ordered exactly as the frozen meta-feature list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetaFeatureVector {
    names: Vec<String>,
    values: Vec<f64>,
}

impl MetaFeatureVector {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.values[i])
    }
}

/// Combine base signals with contextual columns, projected by name into the
/// frozen meta-feature order.
pub fn assemble(
    row: &EngineeredFeatureRow,
    signals: &BaseSignals,
    artifacts: &ModelArtifactSet,
) -> ScoringResult<MetaFeatureVector> {
    let mut available: BTreeMap<&str, f64> = BTreeMap::new();
    available.insert(TREE_SIGNAL, signals.tree_fraud_probability);
    available.insert(ANOMALY_SIGNAL, signals.anomaly_score);
    available.insert(RECONSTRUCTION_SIGNAL, signals.reconstruction_error);
    for name in CONTEXT_COLUMNS {
        if let Some(value) = row.get(name) {
            available.insert(name, value);
        }
    }
    if let Some(clusters) = &artifacts.clusters {
        if let Ok(x) = row.select(&clusters.features) {
            available.insert(CLUSTER_ID, clusters.assign(&x) as f64);
        }
    }

    let mut values = Vec::with_capacity(artifacts.meta_feature_order.len());
    let mut missing = Vec::new();
    for name in &artifacts.meta_feature_order {
        match available.get(name.as_str()) {
            Some(&v) => values.push(v),
            None => missing.push(name.clone()),
        }
    }
    if !missing.is_empty() {
        return Err(ScoringError::MissingMetaFeature { missing });
    }

    Ok(MetaFeatureVector {
        names: artifacts.meta_feature_order.clone(),
        values,
    })
}
