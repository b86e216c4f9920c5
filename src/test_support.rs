//! Deterministic fixtures shared by the unit tests

use crate::features::{FeatureColumnContract, FeatureList, FeaturePipeline};
use crate::models::autoencoder::{Autoencoder, AutoencoderWeights, LayerWeights};
use crate::models::isolation::{IsolationForest, IsolationNode, IsolationTree};
use crate::models::loader::{self, ArtifactParts, ArtifactPaths, EnsembleMetrics, ModelArtifactSet};
use crate::models::stacker::LogisticStacker;
use crate::models::tree::{GradientBoostedTrees, Tree, TreeNode};
use crate::types::RawTransaction;
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fs;
use std::path::Path;

pub(crate) use crate::demo::{fraud_transaction as fraud_demo, normal_transaction as normal_demo};

pub(crate) const FIXTURE_THRESHOLD: f64 = 0.41;

static PIPELINE: Lazy<FeaturePipeline> = Lazy::new(|| {
    FeaturePipeline::fit(&training_batch(64), 42)
        .expect("fixture batch fits")
        .0
});

/// Deterministic raw training rows.
pub(crate) fn training_batch(n: usize) -> Vec<RawTransaction> {
    let mut rng = StdRng::seed_from_u64(7);
    (0..n)
        .map(|i| {
            let amount = (rng.gen_range(0.0..500.0_f64) * 100.0).round() / 100.0;
            let mut tx = RawTransaction::new(i as f64 * 37.5, amount);
            for v in tx.components.iter_mut() {
                *v = rng.gen_range(-3.0..3.0);
            }
            tx
        })
        .collect()
}

/// Pipeline fitted once on `training_batch(64)` with seed 42.
pub(crate) fn fitted_pipeline() -> &'static FeaturePipeline {
    &PIPELINE
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

pub(crate) fn tree_features() -> Vec<String> {
    names(&["V14", "V4", "V12", "V10", "amount_log"])
}

pub(crate) fn anomaly_features() -> Vec<String> {
    names(&["V14", "V17"])
}

pub(crate) fn autoencoder_features() -> Vec<String> {
    names(&["V1", "V2", "V3", "amount_scaled"])
}

pub(crate) fn meta_features() -> Vec<String> {
    names(&[
        "xgb_oof_proba",
        "anomaly_score",
        "ae_recon_error",
        "amount_log",
        "merchant_freq",
        "account_txn_count",
        "last_5_mean_amount",
    ])
}

fn split(feature: usize, threshold: f64, left: usize, right: usize, cover: f64) -> TreeNode {
    TreeNode::Split {
        feature,
        threshold,
        left,
        right,
        cover,
    }
}

fn leaf(value: f64, cover: f64) -> TreeNode {
    TreeNode::Leaf { leaf: value, cover }
}

/// Two trees over `tree_features()`: a strongly negative V14 or V12 pushes
/// towards fraud, V4 matters only when V14 is unremarkable.
pub(crate) fn tree_model() -> GradientBoostedTrees {
    GradientBoostedTrees {
        base_margin: 0.0,
        trees: vec![
            Tree {
                nodes: vec![
                    split(0, -2.0, 1, 2, 100.0),
                    leaf(2.0, 10.0),
                    split(1, 2.0, 3, 4, 90.0),
                    leaf(-1.5, 80.0),
                    leaf(0.5, 10.0),
                ],
            },
            Tree {
                nodes: vec![
                    split(2, -1.5, 1, 2, 100.0),
                    leaf(1.0, 15.0),
                    leaf(-0.8, 85.0),
                ],
            },
        ],
    }
}

pub(crate) fn anomaly_model() -> IsolationForest {
    IsolationForest {
        max_samples: 100,
        offset: -0.5,
        trees: vec![IsolationTree {
            nodes: vec![
                IsolationNode::Split {
                    feature: 0,
                    threshold: -3.0,
                    left: 1,
                    right: 2,
                },
                IsolationNode::Leaf { size: 1 },
                IsolationNode::Split {
                    feature: 1,
                    threshold: -2.0,
                    left: 3,
                    right: 4,
                },
                IsolationNode::Leaf { size: 1 },
                IsolationNode::Leaf { size: 98 },
            ],
        }],
    }
}

/// Keeps V1 and V2, loses V3 and the scaled amount.
pub(crate) fn autoencoder_weights() -> AutoencoderWeights {
    AutoencoderWeights {
        encoder: vec![LayerWeights {
            weight: vec![vec![1.0, 0.0, 0.0, 0.0], vec![0.0, 1.0, 0.0, 0.0]],
            bias: vec![0.0, 0.0],
        }],
        decoder: vec![LayerWeights {
            weight: vec![
                vec![1.0, 0.0],
                vec![0.0, 1.0],
                vec![0.0, 0.0],
                vec![0.0, 0.0],
            ],
            bias: vec![0.0; 4],
        }],
    }
}

pub(crate) fn stacker() -> LogisticStacker {
    LogisticStacker {
        coefficients: vec![6.0, 0.5, 0.0, 0.0, 0.0, 0.0, 0.0],
        intercept: -3.0,
    }
}

pub(crate) fn ensemble_metrics() -> EnsembleMetrics {
    EnsembleMetrics {
        meta_features: meta_features(),
        final_threshold: FIXTURE_THRESHOLD,
        schema_version: loader::ENSEMBLE_SCHEMA_VERSION,
    }
}

/// Known-weight artifact set over the fitted fixture pipeline.
pub(crate) fn fixture_artifacts() -> ModelArtifactSet {
    let autoencoder =
        Autoencoder::from_weights(&autoencoder_weights()).expect("fixture autoencoder is valid");
    ModelArtifactSet::from_parts(
        ArtifactParts {
            contract: FeatureColumnContract::engineered(),
            pipeline: fitted_pipeline().clone(),
            tree: tree_model(),
            tree_features: tree_features(),
            anomaly: anomaly_model(),
            anomaly_features: anomaly_features(),
            autoencoder,
            autoencoder_features: autoencoder_features(),
            stacker: stacker(),
            clusters: None,
            metrics: ensemble_metrics(),
        },
        Path::new("fixture"),
    )
    .expect("fixture artifacts are consistent")
}

fn write<T: Serialize>(path: &Path, value: &T) {
    fs::write(path, serde_json::to_string_pretty(value).expect("serializable"))
        .expect("writable fixture dir");
}

/// Write the fixture artifact set as JSON files under `root`.
pub(crate) fn write_artifact_dir(root: &Path) -> ArtifactPaths {
    let paths = ArtifactPaths::new(root.join("models"), root.join("ensemble"));
    fs::create_dir_all(&paths.models_dir).expect("create models dir");
    fs::create_dir_all(&paths.ensemble_dir).expect("create ensemble dir");

    let contract = FeatureColumnContract::engineered();
    write(
        &paths.model(loader::FEATURE_COLUMNS_FILE),
        &FeatureList::new(contract.columns().to_vec()),
    );
    write(
        &paths.model(loader::TREE_FEATURES_FILE),
        &FeatureList::new(tree_features()),
    );
    write(
        &paths.model(loader::ANOMALY_FEATURES_FILE),
        &FeatureList::new(anomaly_features()),
    );
    write(
        &paths.model(loader::AUTOENCODER_FEATURES_FILE),
        &FeatureList::new(autoencoder_features()),
    );
    write(&paths.model(loader::PREPROCESSORS_FILE), fitted_pipeline().state());
    write(&paths.model(loader::TREE_MODEL_FILE), &tree_model());
    write(&paths.model(loader::ANOMALY_MODEL_FILE), &anomaly_model());
    write(
        &paths.model(loader::AUTOENCODER_MODEL_FILE),
        &autoencoder_weights(),
    );
    write(&paths.model(loader::STACKER_MODEL_FILE), &stacker());
    write(
        &paths.ensemble(loader::ENSEMBLE_METRICS_FILE),
        &ensemble_metrics(),
    );

    paths
}
