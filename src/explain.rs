//! Per-transaction feature attributions for the tree classifier.
//!
//! Attributions are exact TreeSHAP values in log-odds space over the tree
//! model's own feature slice, so together with the expected value they add
//! up to the model's raw output for the row.

use crate::error::ScoringResult;
use crate::features::EngineeredFeatureRow;
use crate::models::loader::ModelArtifactSet;
use crate::models::signals::{model_inputs, TREE_MODEL};
use crate::types::{Contribution, Explanation};

/// Number of contributions returned when the caller does not ask for more.
pub const DEFAULT_TOP_K: usize = 5;

/// Attributions for every tree feature, in the model's feature order.
pub fn attributions(
    row: &EngineeredFeatureRow,
    artifacts: &ModelArtifactSet,
) -> ScoringResult<Explanation> {
    let x = model_inputs(row, &artifacts.tree_features, TREE_MODEL)?;
    let phi = artifacts.tree.shap_values(&x);

    let contributions = artifacts
        .tree_features
        .iter()
        .zip(x.iter().zip(phi))
        .map(|(feature, (&value, shap_value))| Contribution {
            feature: feature.clone(),
            shap_value,
            value,
        })
        .collect();

    Ok(Explanation {
        expected_value: artifacts.tree.expected_value(x.len()),
        contributions,
    })
}

/// Top `k` attributions by descending magnitude.
pub fn explain(
    row: &EngineeredFeatureRow,
    artifacts: &ModelArtifactSet,
    k: usize,
) -> ScoringResult<Explanation> {
    let mut explanation = attributions(row, artifacts)?;
    explanation.contributions = top_k(explanation.contributions, k);
    Ok(explanation)
}

/// Stable ranking: equal magnitudes keep feature order.
pub fn top_k(mut contributions: Vec<Contribution>, k: usize) -> Vec<Contribution> {
    contributions.sort_by(|a, b| b.shap_value.abs().total_cmp(&a.shap_value.abs()));
    contributions.truncate(k);
    contributions
}
