//! Second-stage meta-model and the optional cluster assigner

use crate::error::{ScoringError, ScoringResult};
use crate::models::loader::read_json;
use crate::models::tree::sigmoid;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Logistic regression over the ordered meta-feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticStacker {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl LogisticStacker {
    pub fn load(path: &Path, n_meta_features: usize) -> ScoringResult<Self> {
        let model: Self = read_json(path)?;
        model
            .validate(n_meta_features)
            .map_err(|reason| ScoringError::schema(path, reason))?;
        info!(path = %path.display(), inputs = n_meta_features, "Loaded meta-model");
        Ok(model)
    }

    pub fn validate(&self, n_meta_features: usize) -> Result<(), String> {
        if self.coefficients.len() != n_meta_features {
            return Err(format!(
                "{} coefficients for {n_meta_features} meta features",
                self.coefficients.len()
            ));
        }
        if !self.intercept.is_finite() || self.coefficients.iter().any(|c| !c.is_finite()) {
            return Err("coefficients must be finite".to_string());
        }
        Ok(())
    }

    /// Positive-class probability.
    pub fn predict_proba(&self, x: &[f64]) -> f64 {
        let z: f64 = self
            .coefficients
            .iter()
            .zip(x)
            .map(|(w, v)| w * v)
            .sum::<f64>()
            + self.intercept;
        sigmoid(z)
    }
}

/// Nearest-centroid assigner used by the cluster variant of the meta-model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterModel {
    pub features: Vec<String>,
    pub centroids: Vec<Vec<f64>>,
}

impl ClusterModel {
    /// Load `clusters.json` when present.
    pub fn load_optional(path: &Path) -> ScoringResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let model: Self = read_json(path)?;
        model
            .validate()
            .map_err(|reason| ScoringError::schema(path, reason))?;
        info!(
            path = %path.display(),
            clusters = model.centroids.len(),
            "Loaded cluster assigner"
        );
        Ok(Some(model))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.features.is_empty() || self.centroids.is_empty() {
            return Err("cluster model needs features and centroids".to_string());
        }
        let d = self.features.len();
        if let Some(bad) = self.centroids.iter().position(|c| c.len() != d) {
            return Err(format!("centroid {bad} does not have {d} coordinates"));
        }
        Ok(())
    }

    /// Index of the nearest centroid by squared distance; ties go to the lowest index.
    pub fn assign(&self, x: &[f64]) -> usize {
        let mut best = (0, f64::INFINITY);
        for (i, centroid) in self.centroids.iter().enumerate() {
            let d: f64 = centroid.iter().zip(x).map(|(c, v)| (c - v).powi(2)).sum();
            if d < best.1 {
                best = (i, d);
            }
        }
        best.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_model_scores_half() {
        let model = LogisticStacker {
            coefficients: vec![0.0; 3],
            intercept: 0.0,
        };
        assert_eq!(model.predict_proba(&[5.0, -1.0, 2.0]), 0.5);
    }

    #[test]
    fn test_predict_proba_is_logistic() {
        let model = LogisticStacker {
            coefficients: vec![2.0, -1.0],
            intercept: 0.5,
        };
        let expected = 1.0 / (1.0 + (-(2.0 * 1.0 - 3.0 + 0.5_f64)).exp());
        assert!((model.predict_proba(&[1.0, 3.0]) - expected).abs() < 1e-15);
        assert!(model.validate(3).is_err());
    }

    #[test]
    fn test_cluster_assignment_breaks_ties_low() {
        let clusters = ClusterModel {
            features: vec!["a".into(), "b".into()],
            centroids: vec![vec![0.0, 0.0], vec![2.0, 0.0], vec![10.0, 10.0]],
        };
        assert_eq!(clusters.assign(&[1.0, 0.0]), 0);
        assert_eq!(clusters.assign(&[1.5, 0.2]), 1);
        assert_eq!(clusters.assign(&[9.0, 9.0]), 2);
    }

    #[test]
    fn test_missing_cluster_file_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            ClusterModel::load_optional(&dir.path().join("clusters.json")).unwrap(),
            None
        );
    }
}
