//! Stacked decision engine

use crate::error::{ScoringError, ScoringResult};
use crate::models::loader::ModelArtifactSet;
use crate::models::meta::MetaFeatureVector;
use crate::types::{Decision, Label};

/// Score the meta vector and apply the frozen threshold (`>=` is fraud).
pub fn decide(meta: &MetaFeatureVector, artifacts: &ModelArtifactSet) -> ScoringResult<Decision> {
    let expected = &artifacts.meta_feature_order;
    if meta.names() != expected.as_slice() {
        let missing: Vec<String> = expected
            .iter()
            .filter(|name| !meta.names().contains(name))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Err(ScoringError::MetaFeatureOrder {
                expected: expected.clone(),
                actual: meta.names().to_vec(),
            });
        }
        return Err(ScoringError::MissingMetaFeature { missing });
    }

    let score = artifacts.stacker.predict_proba(meta.values());
    if !score.is_finite() {
        return Err(ScoringError::invalid_input(
            "score",
            format!("meta-model score {score} is not finite"),
        ));
    }
    Ok(Decision {
        score,
        label: Label::from_score(score, artifacts.threshold),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::meta::assemble;
    use crate::models::signals::BaseSignals;
    use crate::models::stacker::LogisticStacker;
    use crate::test_support::{fixture_artifacts, normal_demo};

    #[test]
    fn test_score_equal_to_threshold_is_fraud() {
        let mut artifacts = fixture_artifacts();
        let n = artifacts.meta_feature_order.len();
        artifacts.stacker = LogisticStacker {
            coefficients: vec![0.0; n],
            intercept: 0.0,
        };
        artifacts.threshold = 0.5;

        let row = artifacts.pipeline.apply(&normal_demo()).unwrap();
        let signals = BaseSignals {
            tree_fraud_probability: 0.1,
            anomaly_score: 0.0,
            reconstruction_error: 0.0,
        };
        let meta = assemble(&row, &signals, &artifacts).unwrap();

        let decision = decide(&meta, &artifacts).unwrap();
        assert_eq!(decision.score, 0.5);
        assert_eq!(decision.label, Label::Fraud);
    }

    #[test]
    fn test_reordered_meta_vector_reports_both_orders() {
        let artifacts = fixture_artifacts();
        let row = artifacts.pipeline.apply(&normal_demo()).unwrap();
        let signals = BaseSignals {
            tree_fraud_probability: 0.3,
            anomaly_score: 0.1,
            reconstruction_error: 0.5,
        };
        let meta = assemble(&row, &signals, &artifacts).unwrap();

        let mut reordered = artifacts.clone();
        reordered.meta_feature_order.reverse();
        match decide(&meta, &reordered) {
            Err(ScoringError::MetaFeatureOrder { expected, actual }) => {
                assert_eq!(expected, reordered.meta_feature_order);
                assert_eq!(actual, artifacts.meta_feature_order);
            }
            other => panic!("expected MetaFeatureOrder, got {other:?}"),
        }
    }

    #[test]
    fn test_nan_score_is_never_labelled() {
        let mut artifacts = fixture_artifacts();
        let row = artifacts.pipeline.apply(&normal_demo()).unwrap();
        let signals = BaseSignals {
            tree_fraud_probability: 0.3,
            anomaly_score: 0.1,
            reconstruction_error: f64::INFINITY,
        };
        let meta = assemble(&row, &signals, &artifacts).unwrap();
        artifacts.stacker.coefficients[2] = 0.0;

        match decide(&meta, &artifacts) {
            Err(ScoringError::InvalidInputType { field, .. }) => assert_eq!(field, "score"),
            other => panic!("expected InvalidInputType, got {other:?}"),
        }
    }

    #[test]
    fn test_decision_is_deterministic() {
        let artifacts = fixture_artifacts();
        let row = artifacts.pipeline.apply(&normal_demo()).unwrap();
        let signals = BaseSignals {
            tree_fraud_probability: 0.3,
            anomaly_score: 0.1,
            reconstruction_error: 0.5,
        };
        let meta = assemble(&row, &signals, &artifacts).unwrap();

        let first = decide(&meta, &artifacts).unwrap();
        let second = decide(&meta, &artifacts).unwrap();
        assert_eq!(first.score.to_bits(), second.score.to_bits());
        assert_eq!(first.label, second.label);
    }
}
