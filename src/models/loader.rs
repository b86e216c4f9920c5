//! Frozen artifact loading and the process-wide artifact registry

use crate::error::{ScoringError, ScoringResult};
use crate::features::{read_feature_list, FeatureColumnContract, FeaturePipeline};
use crate::models::autoencoder::Autoencoder;
use crate::models::isolation::IsolationForest;
use crate::models::stacker::{ClusterModel, LogisticStacker};
use crate::models::tree::GradientBoostedTrees;
use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Supported version of `metrics.json`.
pub const ENSEMBLE_SCHEMA_VERSION: u32 = 1;

pub const FEATURE_COLUMNS_FILE: &str = "feature_columns.json";
pub const TREE_FEATURES_FILE: &str = "xgb_features.json";
pub const ANOMALY_FEATURES_FILE: &str = "iforest_features.json";
pub const AUTOENCODER_FEATURES_FILE: &str = "ae_features.json";
pub const PREPROCESSORS_FILE: &str = "preprocessors.json";
pub const TREE_MODEL_FILE: &str = "xgb.json";
pub const ANOMALY_MODEL_FILE: &str = "iforest.json";
pub const AUTOENCODER_MODEL_FILE: &str = "autoencoder.json";
pub const STACKER_MODEL_FILE: &str = "stacker.json";
pub const CLUSTER_MODEL_FILE: &str = "clusters.json";
pub const ENSEMBLE_METRICS_FILE: &str = "metrics.json";

/// Read and deserialize a JSON artifact.
///
/// Absent files map to `ArtifactNotFound`; well-formed JSON of the wrong
/// shape maps to `ArtifactSchemaError`.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> ScoringResult<T> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ScoringError::ArtifactNotFound {
                path: path.to_path_buf(),
            })
        }
        Err(source) => {
            return Err(ScoringError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_str(&text).map_err(|source| match source.classify() {
        serde_json::error::Category::Data => ScoringError::schema(path, source.to_string()),
        _ => ScoringError::Json {
            path: path.to_path_buf(),
            source,
        },
    })
}

/// Meta-model ordering and decision threshold frozen with the ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleMetrics {
    pub meta_features: Vec<String>,
    pub final_threshold: f64,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

fn default_schema_version() -> u32 {
    ENSEMBLE_SCHEMA_VERSION
}

/// Where the frozen artifacts live on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub models_dir: PathBuf,
    pub ensemble_dir: PathBuf,
}

impl ArtifactPaths {
    pub fn new(models_dir: impl Into<PathBuf>, ensemble_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            ensemble_dir: ensemble_dir.into(),
        }
    }

    pub fn model(&self, file: &str) -> PathBuf {
        self.models_dir.join(file)
    }

    pub fn ensemble(&self, file: &str) -> PathBuf {
        self.ensemble_dir.join(file)
    }
}

/// Unvalidated components of a [`ModelArtifactSet`].
#[derive(Debug, Clone)]
pub struct ArtifactParts {
    pub contract: FeatureColumnContract,
    pub pipeline: FeaturePipeline,
    pub tree: GradientBoostedTrees,
    pub tree_features: Vec<String>,
    pub anomaly: IsolationForest,
    pub anomaly_features: Vec<String>,
    pub autoencoder: Autoencoder,
    pub autoencoder_features: Vec<String>,
    pub stacker: LogisticStacker,
    pub clusters: Option<ClusterModel>,
    pub metrics: EnsembleMetrics,
}

/// Everything inference needs, loaded once and shared read-only.
#[derive(Debug, Clone)]
pub struct ModelArtifactSet {
    pub contract: FeatureColumnContract,
    pub pipeline: FeaturePipeline,
    pub tree: GradientBoostedTrees,
    pub tree_features: Vec<String>,
    pub anomaly: IsolationForest,
    pub anomaly_features: Vec<String>,
    pub autoencoder: Autoencoder,
    pub autoencoder_features: Vec<String>,
    pub stacker: LogisticStacker,
    pub clusters: Option<ClusterModel>,
    /// Column order the meta-model was trained on
    pub meta_feature_order: Vec<String>,
    /// Scores at or above this are labelled fraud
    pub threshold: f64,
}

impl ModelArtifactSet {
    /// Load every artifact under `paths`.
    pub fn load(paths: &ArtifactPaths) -> ScoringResult<Self> {
        let start = Instant::now();

        let contract = FeatureColumnContract::load(&paths.model(FEATURE_COLUMNS_FILE))?;
        let tree_features = read_feature_list(&paths.model(TREE_FEATURES_FILE))?;
        let anomaly_features = read_feature_list(&paths.model(ANOMALY_FEATURES_FILE))?;
        let autoencoder_features = read_feature_list(&paths.model(AUTOENCODER_FEATURES_FILE))?;

        let pipeline = FeaturePipeline::load(&paths.model(PREPROCESSORS_FILE))?;
        let tree = GradientBoostedTrees::load(&paths.model(TREE_MODEL_FILE), tree_features.len())?;
        let anomaly =
            IsolationForest::load(&paths.model(ANOMALY_MODEL_FILE), anomaly_features.len())?;
        let autoencoder = Autoencoder::load(
            &paths.model(AUTOENCODER_MODEL_FILE),
            autoencoder_features.len(),
        )?;

        let metrics_path = paths.ensemble(ENSEMBLE_METRICS_FILE);
        let metrics: EnsembleMetrics = read_json(&metrics_path)?;
        validate_metrics(&metrics).map_err(|reason| ScoringError::schema(&metrics_path, reason))?;

        let stacker = LogisticStacker::load(
            &paths.model(STACKER_MODEL_FILE),
            metrics.meta_features.len(),
        )?;
        let clusters = ClusterModel::load_optional(&paths.model(CLUSTER_MODEL_FILE))?;

        let set = Self::from_parts(
            ArtifactParts {
                contract,
                pipeline,
                tree,
                tree_features,
                anomaly,
                anomaly_features,
                autoencoder,
                autoencoder_features,
                stacker,
                clusters,
                metrics,
            },
            &paths.models_dir,
        )?;

        info!(
            models_dir = %paths.models_dir.display(),
            ensemble_dir = %paths.ensemble_dir.display(),
            contract_columns = set.contract.len(),
            meta_features = set.meta_feature_order.len(),
            threshold = set.threshold,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Artifact set loaded"
        );
        Ok(set)
    }

    /// Cross-check independently loaded parts; `origin` names them in errors.
    pub fn from_parts(parts: ArtifactParts, origin: &Path) -> ScoringResult<Self> {
        let schema = |reason: String| ScoringError::schema(origin, reason);

        for (model, features) in [
            ("xgb", &parts.tree_features),
            ("iforest", &parts.anomaly_features),
            ("autoencoder", &parts.autoencoder_features),
        ] {
            let unknown = parts.contract.unknown(features);
            if !unknown.is_empty() {
                return Err(schema(format!(
                    "{model} features outside the feature contract: {unknown:?}"
                )));
            }
        }
        if let Some(clusters) = &parts.clusters {
            clusters.validate().map_err(&schema)?;
            let unknown = parts.contract.unknown(&clusters.features);
            if !unknown.is_empty() {
                return Err(schema(format!(
                    "cluster features outside the feature contract: {unknown:?}"
                )));
            }
        }

        parts
            .tree
            .validate(parts.tree_features.len())
            .map_err(&schema)?;
        parts
            .anomaly
            .validate(parts.anomaly_features.len())
            .map_err(&schema)?;
        if parts.autoencoder.input_dim() != parts.autoencoder_features.len() {
            return Err(schema(format!(
                "autoencoder takes {} inputs, feature list has {}",
                parts.autoencoder.input_dim(),
                parts.autoencoder_features.len()
            )));
        }
        validate_metrics(&parts.metrics).map_err(&schema)?;
        parts
            .stacker
            .validate(parts.metrics.meta_features.len())
            .map_err(&schema)?;

        Ok(Self {
            contract: parts.contract,
            pipeline: parts.pipeline,
            tree: parts.tree,
            tree_features: parts.tree_features,
            anomaly: parts.anomaly,
            anomaly_features: parts.anomaly_features,
            autoencoder: parts.autoencoder,
            autoencoder_features: parts.autoencoder_features,
            stacker: parts.stacker,
            clusters: parts.clusters,
            meta_feature_order: parts.metrics.meta_features,
            threshold: parts.metrics.final_threshold,
        })
    }
}

fn validate_metrics(metrics: &EnsembleMetrics) -> Result<(), String> {
    if metrics.schema_version != ENSEMBLE_SCHEMA_VERSION {
        return Err(format!(
            "unsupported ensemble schema version {}",
            metrics.schema_version
        ));
    }
    if !(0.0..=1.0).contains(&metrics.final_threshold) {
        return Err(format!(
            "final_threshold {} is outside [0, 1]",
            metrics.final_threshold
        ));
    }
    if metrics.meta_features.is_empty() {
        return Err("meta_features is empty".to_string());
    }
    let mut seen = HashSet::new();
    if let Some(dup) = metrics.meta_features.iter().find(|f| !seen.insert(f.as_str())) {
        return Err(format!("duplicate meta feature '{dup}'"));
    }
    Ok(())
}

/// Loads the artifact set on first use and hands out the cached instance.
///
/// Concurrent first callers block on a single load.
#[derive(Debug)]
pub struct ArtifactRegistry {
    paths: ArtifactPaths,
    cell: OnceCell<Arc<ModelArtifactSet>>,
}

impl ArtifactRegistry {
    pub fn new(paths: ArtifactPaths) -> Self {
        Self {
            paths,
            cell: OnceCell::new(),
        }
    }

    /// Registry pre-seeded with an already built set.
    pub fn with_artifacts(paths: ArtifactPaths, artifacts: ModelArtifactSet) -> Self {
        Self {
            paths,
            cell: OnceCell::with_value(Arc::new(artifacts)),
        }
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    pub fn load(&self) -> ScoringResult<Arc<ModelArtifactSet>> {
        self.cell
            .get_or_try_init(|| ModelArtifactSet::load(&self.paths).map(Arc::new))
            .map(Arc::clone)
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_artifact_dir;
    use std::fs;

    #[test]
    fn test_load_full_artifact_dir() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_artifact_dir(dir.path());

        let set = ModelArtifactSet::load(&paths).unwrap();
        assert_eq!(set.threshold, 0.41);
        assert_eq!(set.meta_feature_order[0], "xgb_oof_proba");
        assert_eq!(set.autoencoder.input_dim(), set.autoencoder_features.len());
        assert!(set.clusters.is_none());
    }

    #[test]
    fn test_missing_file_is_artifact_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_artifact_dir(dir.path());
        fs::remove_file(paths.model(ANOMALY_MODEL_FILE)).unwrap();

        match ModelArtifactSet::load(&paths) {
            Err(ScoringError::ArtifactNotFound { path }) => {
                assert!(path.ends_with(ANOMALY_MODEL_FILE))
            }
            other => panic!("expected ArtifactNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_feature_list_is_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_artifact_dir(dir.path());
        fs::write(paths.model(TREE_FEATURES_FILE), r#"["V14", "V4"]"#).unwrap();

        assert!(matches!(
            ModelArtifactSet::load(&paths),
            Err(ScoringError::ArtifactSchemaError { .. })
        ));
    }

    #[test]
    fn test_threshold_out_of_range_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_artifact_dir(dir.path());
        fs::write(
            paths.ensemble(ENSEMBLE_METRICS_FILE),
            r#"{"meta_features": ["xgb_oof_proba"], "final_threshold": 1.5}"#,
        )
        .unwrap();

        assert!(matches!(
            ModelArtifactSet::load(&paths),
            Err(ScoringError::ArtifactSchemaError { .. })
        ));
    }

    #[test]
    fn test_feature_outside_contract_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_artifact_dir(dir.path());
        fs::write(
            paths.model(ANOMALY_FEATURES_FILE),
            r#"{"features": ["V14", "not_a_column"]}"#,
        )
        .unwrap();

        match ModelArtifactSet::load(&paths) {
            Err(ScoringError::ArtifactSchemaError { reason, .. }) => {
                assert!(reason.contains("not_a_column"))
            }
            other => panic!("expected ArtifactSchemaError, got {other:?}"),
        }
    }

    #[test]
    fn test_registry_loads_once() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(ArtifactRegistry::new(write_artifact_dir(dir.path())));
        assert!(!registry.is_loaded());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.load().unwrap())
            })
            .collect();
        let sets: Vec<Arc<ModelArtifactSet>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        let first = registry.load().unwrap();
        for set in &sets {
            assert!(Arc::ptr_eq(set, &first));
        }
        assert!(registry.is_loaded());
    }

    #[test]
    fn test_registry_surfaces_load_failure() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ArtifactRegistry::new(ArtifactPaths::new(dir.path(), dir.path()));
        assert!(matches!(
            registry.load(),
            Err(ScoringError::ArtifactNotFound { .. })
        ));
        assert!(!registry.is_loaded());
    }
}
