//! Base signal generator: one score from each first-stage model

use crate::error::{ScoringError, ScoringResult};
use crate::features::EngineeredFeatureRow;
use crate::models::loader::ModelArtifactSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const TREE_MODEL: &str = "xgb";
pub const ANOMALY_MODEL: &str = "iforest";
pub const AUTOENCODER_MODEL: &str = "autoencoder";

/// First-stage outputs for one transaction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaseSignals {
    /// Tree classifier fraud probability (0.0 - 1.0)
    pub tree_fraud_probability: f64,
    /// Isolation-forest signal, larger = more anomalous
    pub anomaly_score: f64,
    /// Autoencoder mean squared reconstruction error
    pub reconstruction_error: f64,
}

/// Restrict `row` to one model's frozen feature list, in that order.
pub fn model_inputs(
    row: &EngineeredFeatureRow,
    features: &[String],
    model: &str,
) -> ScoringResult<Vec<f64>> {
    row.select(features)
        .map_err(|missing| ScoringError::MissingFeature {
            model: model.to_string(),
            missing,
        })
}

/// Score `row` with all three base models.
///
/// Every model's inputs are resolved before any model runs, so a missing
/// feature never yields a partial result.
pub fn compute(row: &EngineeredFeatureRow, artifacts: &ModelArtifactSet) -> ScoringResult<BaseSignals> {
    let tree_x = model_inputs(row, &artifacts.tree_features, TREE_MODEL)?;
    let anomaly_x = model_inputs(row, &artifacts.anomaly_features, ANOMALY_MODEL)?;
    let ae_x = model_inputs(row, &artifacts.autoencoder_features, AUTOENCODER_MODEL)?;

    let signals = BaseSignals {
        tree_fraud_probability: finite(TREE_MODEL, artifacts.tree.predict_proba(&tree_x))?,
        anomaly_score: finite(ANOMALY_MODEL, artifacts.anomaly.anomaly_score(&anomaly_x))?,
        reconstruction_error: finite(
            AUTOENCODER_MODEL,
            artifacts.autoencoder.reconstruction_error(&ae_x),
        )?,
    };

    debug!(
        tree = signals.tree_fraud_probability,
        anomaly = signals.anomaly_score,
        recon = signals.reconstruction_error,
        "Base signals computed"
    );
    Ok(signals)
}

/// A signal that overflowed cannot be stacked.
fn finite(model: &str, value: f64) -> ScoringResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ScoringError::invalid_input(
            model,
            format!("{model} signal {value} is not finite"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fixture_artifacts, fraud_demo, normal_demo};

    #[test]
    fn test_signals_separate_demo_rows() {
        let artifacts = fixture_artifacts();
        let normal = artifacts.pipeline.apply(&normal_demo()).unwrap();
        let fraud = artifacts.pipeline.apply(&fraud_demo()).unwrap();

        let a = compute(&normal, &artifacts).unwrap();
        let b = compute(&fraud, &artifacts).unwrap();

        assert!(b.tree_fraud_probability > 0.9);
        assert!(a.tree_fraud_probability < 0.2);
        assert!(b.anomaly_score > a.anomaly_score);
        assert!(a.reconstruction_error >= 0.0);
    }

    #[test]
    fn test_missing_feature_rejected_before_scoring() {
        let artifacts = fixture_artifacts();
        let mut row = artifacts.pipeline.apply(&normal_demo()).unwrap();
        row.remove("V17");

        match compute(&row, &artifacts) {
            Err(ScoringError::MissingFeature { model, missing }) => {
                assert_eq!(model, ANOMALY_MODEL);
                assert_eq!(missing, vec!["V17".to_string()]);
            }
            other => panic!("expected MissingFeature, got {other:?}"),
        }
    }

    #[test]
    fn test_overflowing_reconstruction_is_rejected() {
        let artifacts = fixture_artifacts();
        let mut row = artifacts.pipeline.apply(&normal_demo()).unwrap();
        row.insert("amount_scaled", 1e200);

        match compute(&row, &artifacts) {
            Err(ScoringError::InvalidInputType { field, .. }) => {
                assert_eq!(field, AUTOENCODER_MODEL)
            }
            other => panic!("expected InvalidInputType, got {other:?}"),
        }
    }

    #[test]
    fn test_each_model_sees_its_own_order() {
        let artifacts = fixture_artifacts();
        let row = artifacts.pipeline.apply(&fraud_demo()).unwrap();

        let x = model_inputs(&row, &artifacts.tree_features, TREE_MODEL).unwrap();
        for (name, value) in artifacts.tree_features.iter().zip(&x) {
            assert_eq!(row.get(name), Some(*value));
        }
    }
}
