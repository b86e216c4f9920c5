//! Gradient-boosted tree classifier with exact path-dependent TreeSHAP.
//!
//! Trees are stored as flat node arrays. A split sends a row left iff
//! `x[feature] < threshold`. Every node carries its training cover; the
//! attribution algorithm weights unseen branches by cover, so child covers
//! must sum to the parent's.

use crate::error::{ScoringError, ScoringResult};
use crate::models::loader::read_json;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

const COVER_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        cover: f64,
    },
    Leaf {
        leaf: f64,
        cover: f64,
    },
}

impl TreeNode {
    pub fn cover(&self) -> f64 {
        match *self {
            TreeNode::Split { cover, .. } | TreeNode::Leaf { cover, .. } => cover,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<TreeNode>,
}

impl Tree {
    /// Leaf value reached by `x`.
    pub fn predict(&self, x: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes[idx] {
                TreeNode::Leaf { leaf, .. } => return leaf,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => idx = if x[feature] < threshold { left } else { right },
            }
        }
    }

    /// Expected output when only the features flagged in `known` are observed;
    /// unknown splits average their children by cover.
    pub fn conditional_expectation(&self, x: &[f64], known: &[bool]) -> f64 {
        self.expectation_at(0, x, known)
    }

    fn expectation_at(&self, idx: usize, x: &[f64], known: &[bool]) -> f64 {
        match self.nodes[idx] {
            TreeNode::Leaf { leaf, .. } => leaf,
            TreeNode::Split {
                feature,
                threshold,
                left,
                right,
                cover,
            } => {
                if known[feature] {
                    let next = if x[feature] < threshold { left } else { right };
                    self.expectation_at(next, x, known)
                } else {
                    let l = self.nodes[left].cover() / cover;
                    let r = self.nodes[right].cover() / cover;
                    l * self.expectation_at(left, x, known)
                        + r * self.expectation_at(right, x, known)
                }
            }
        }
    }

    /// Add this tree's SHAP values for `x` into `phi`.
    pub fn accumulate_shap(&self, x: &[f64], phi: &mut [f64]) {
        self.shap_recurse(x, phi, 0, Vec::new(), 1.0, 1.0, None);
    }

    #[allow(clippy::too_many_arguments)]
    fn shap_recurse(
        &self,
        x: &[f64],
        phi: &mut [f64],
        idx: usize,
        mut path: Vec<PathElement>,
        zero_fraction: f64,
        one_fraction: f64,
        feature: Option<usize>,
    ) {
        extend_path(&mut path, zero_fraction, one_fraction, feature);

        match self.nodes[idx] {
            TreeNode::Leaf { leaf, .. } => {
                for i in 1..path.len() {
                    let weight = unwound_path_sum(&path, i);
                    let el = path[i];
                    if let Some(f) = el.feature {
                        phi[f] += weight * (el.one_fraction - el.zero_fraction) * leaf;
                    }
                }
            }
            TreeNode::Split {
                feature: split,
                threshold,
                left,
                right,
                cover,
            } => {
                let (hot, cold) = if x[split] < threshold {
                    (left, right)
                } else {
                    (right, left)
                };
                let hot_zero = self.nodes[hot].cover() / cover;
                let cold_zero = self.nodes[cold].cover() / cover;

                // A repeated split on one feature replaces its earlier path entry
                let (mut incoming_zero, mut incoming_one) = (1.0, 1.0);
                if let Some(k) = path.iter().position(|e| e.feature == Some(split)) {
                    incoming_zero = path[k].zero_fraction;
                    incoming_one = path[k].one_fraction;
                    unwind_path(&mut path, k);
                }

                self.shap_recurse(
                    x,
                    phi,
                    hot,
                    path.clone(),
                    hot_zero * incoming_zero,
                    incoming_one,
                    Some(split),
                );
                self.shap_recurse(
                    x,
                    phi,
                    cold,
                    path,
                    cold_zero * incoming_zero,
                    0.0,
                    Some(split),
                );
            }
        }
    }

    fn validate(&self, n_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        let mut parents = vec![0usize; self.nodes.len()];

        for (i, node) in self.nodes.iter().enumerate() {
            let cover = node.cover();
            if !cover.is_finite() || cover <= 0.0 {
                return Err(format!("node {i} has non-positive cover {cover}"));
            }
            match *node {
                TreeNode::Leaf { leaf, .. } => {
                    if !leaf.is_finite() {
                        return Err(format!("leaf {i} is not finite"));
                    }
                }
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    if feature >= n_features {
                        return Err(format!(
                            "node {i} splits on feature {feature}, only {n_features} declared"
                        ));
                    }
                    if !threshold.is_finite() {
                        return Err(format!("node {i} threshold is not finite"));
                    }
                    for child in [left, right] {
                        if child <= i || child >= self.nodes.len() {
                            return Err(format!("node {i} has invalid child {child}"));
                        }
                        parents[child] += 1;
                    }
                    let children = self.nodes[left].cover() + self.nodes[right].cover();
                    if (children - cover).abs() > COVER_TOLERANCE * cover.max(1.0) {
                        return Err(format!(
                            "node {i} cover {cover} differs from children total {children}"
                        ));
                    }
                }
            }
        }

        if let Some(orphan) = (1..parents.len()).find(|&i| parents[i] != 1) {
            return Err(format!("node {orphan} is not referenced by exactly one parent"));
        }
        Ok(())
    }
}

/// Additive tree ensemble; output is `sigmoid(base_margin + sum(leaves))`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    #[serde(default)]
    pub base_margin: f64,
    pub trees: Vec<Tree>,
}

impl GradientBoostedTrees {
    /// Load `xgb.json`, validating feature indices against `n_features`.
    pub fn load(path: &Path, n_features: usize) -> ScoringResult<Self> {
        let model: Self = read_json(path)?;
        model
            .validate(n_features)
            .map_err(|reason| ScoringError::schema(path, reason))?;
        info!(
            path = %path.display(),
            trees = model.trees.len(),
            features = n_features,
            "Loaded tree classifier"
        );
        Ok(model)
    }

    pub fn validate(&self, n_features: usize) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("ensemble has no trees".to_string());
        }
        if !self.base_margin.is_finite() {
            return Err("base_margin is not finite".to_string());
        }
        for (t, tree) in self.trees.iter().enumerate() {
            tree.validate(n_features)
                .map_err(|reason| format!("tree {t}: {reason}"))?;
        }
        Ok(())
    }

    /// Raw log-odds output.
    pub fn margin(&self, x: &[f64]) -> f64 {
        self.base_margin + self.trees.iter().map(|t| t.predict(x)).sum::<f64>()
    }

    /// Positive-class probability.
    pub fn predict_proba(&self, x: &[f64]) -> f64 {
        sigmoid(self.margin(x))
    }

    /// Cover-weighted mean margin over the training distribution.
    pub fn expected_value(&self, n_features: usize) -> f64 {
        let x = vec![0.0; n_features];
        let known = vec![false; n_features];
        self.base_margin
            + self
                .trees
                .iter()
                .map(|t| t.conditional_expectation(&x, &known))
                .sum::<f64>()
    }

    /// Per-feature SHAP values in margin space; they sum with
    /// `expected_value` to `margin(x)`.
    pub fn shap_values(&self, x: &[f64]) -> Vec<f64> {
        let mut phi = vec![0.0; x.len()];
        for tree in &self.trees {
            tree.accumulate_shap(x, &mut phi);
        }
        phi
    }
}

pub fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

#[derive(Debug, Clone, Copy)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    pweight: f64,
}

fn extend_path(
    path: &mut Vec<PathElement>,
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
) {
    let depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        pweight: if depth == 0 { 1.0 } else { 0.0 },
    });
    let scale = (depth + 1) as f64;
    for i in (0..depth).rev() {
        path[i + 1].pweight += one_fraction * path[i].pweight * (i + 1) as f64 / scale;
        path[i].pweight = zero_fraction * path[i].pweight * (depth - i) as f64 / scale;
    }
}

fn unwind_path(path: &mut Vec<PathElement>, path_index: usize) {
    let depth = path.len() - 1;
    let one_fraction = path[path_index].one_fraction;
    let zero_fraction = path[path_index].zero_fraction;
    let scale = (depth + 1) as f64;
    let mut next_one_portion = path[depth].pweight;

    for i in (0..depth).rev() {
        if one_fraction != 0.0 {
            let tmp = path[i].pweight;
            path[i].pweight = next_one_portion * scale / ((i + 1) as f64 * one_fraction);
            next_one_portion = tmp - path[i].pweight * zero_fraction * (depth - i) as f64 / scale;
        } else {
            path[i].pweight = path[i].pweight * scale / (zero_fraction * (depth - i) as f64);
        }
    }

    for i in path_index..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.pop();
}

fn unwound_path_sum(path: &[PathElement], path_index: usize) -> f64 {
    let depth = path.len() - 1;
    let one_fraction = path[path_index].one_fraction;
    let zero_fraction = path[path_index].zero_fraction;
    let scale = (depth + 1) as f64;
    let mut next_one_portion = path[depth].pweight;
    let mut total = 0.0;

    for i in (0..depth).rev() {
        if one_fraction != 0.0 {
            let tmp = next_one_portion * scale / ((i + 1) as f64 * one_fraction);
            total += tmp;
            next_one_portion = path[i].pweight - tmp * zero_fraction * (depth - i) as f64 / scale;
        } else {
            total += path[i].pweight / zero_fraction / ((depth - i) as f64 / scale);
        }
    }
    total
}
