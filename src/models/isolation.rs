//! Isolation-forest anomaly model

use crate::error::{ScoringError, ScoringResult};
use crate::models::loader::read_json;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

const EULER_GAMMA: f64 = 0.577_215_664_9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IsolationNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    /// Number of training samples that reached this leaf
    Leaf { size: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationTree {
    pub nodes: Vec<IsolationNode>,
}

impl IsolationTree {
    /// Depth at which `x` is isolated, corrected for the leaf's residual size.
    pub fn path_length(&self, x: &[f64]) -> f64 {
        let mut idx = 0;
        let mut depth = 0.0;
        loop {
            match self.nodes[idx] {
                IsolationNode::Leaf { size } => return depth + average_path_length(size),
                IsolationNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if x[feature] <= threshold { left } else { right };
                    depth += 1.0;
                }
            }
        }
    }

    fn validate(&self, n_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if let IsolationNode::Split {
                feature,
                threshold,
                left,
                right,
            } = *node
            {
                if feature >= n_features {
                    return Err(format!(
                        "node {i} splits on feature {feature}, only {n_features} declared"
                    ));
                }
                if !threshold.is_finite() {
                    return Err(format!("node {i} threshold is not finite"));
                }
                if [left, right].iter().any(|&c| c <= i || c >= self.nodes.len()) {
                    return Err(format!("node {i} has invalid children ({left}, {right})"));
                }
            }
        }
        Ok(())
    }
}

/// Forest of isolation trees; `offset` is the fitted decision boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    pub max_samples: usize,
    pub offset: f64,
    pub trees: Vec<IsolationTree>,
}

impl IsolationForest {
    pub fn load(path: &Path, n_features: usize) -> ScoringResult<Self> {
        let model: Self = read_json(path)?;
        model
            .validate(n_features)
            .map_err(|reason| ScoringError::schema(path, reason))?;
        info!(
            path = %path.display(),
            trees = model.trees.len(),
            max_samples = model.max_samples,
            "Loaded anomaly model"
        );
        Ok(model)
    }

    pub fn validate(&self, n_features: usize) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("forest has no trees".to_string());
        }
        if self.max_samples < 2 {
            return Err(format!("max_samples must be at least 2, got {}", self.max_samples));
        }
        if !self.offset.is_finite() {
            return Err("offset is not finite".to_string());
        }
        for (t, tree) in self.trees.iter().enumerate() {
            tree.validate(n_features)
                .map_err(|reason| format!("tree {t}: {reason}"))?;
        }
        Ok(())
    }

    /// Mean isolation depth across the forest.
    pub fn mean_path_length(&self, x: &[f64]) -> f64 {
        let total: f64 = self.trees.iter().map(|t| t.path_length(x)).sum();
        total / self.trees.len() as f64
    }

    /// Native score: the negated anomaly score, in [-1, 0).
    pub fn score_samples(&self, x: &[f64]) -> f64 {
        let depth = self.mean_path_length(x);
        -(2.0_f64).powf(-depth / average_path_length(self.max_samples))
    }

    /// Native decision function: negative for outliers.
    pub fn decision_function(&self, x: &[f64]) -> f64 {
        self.score_samples(x) - self.offset
    }

    /// Anomaly signal; larger is more anomalous.
    pub fn anomaly_score(&self, x: &[f64]) -> f64 {
        -self.decision_function(x)
    }
}

/// Expected path length of an unsuccessful BST search among `n` samples.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        n => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}
