//! Dense autoencoder scored by reconstruction error

use crate::error::{ScoringError, ScoringResult};
use crate::models::loader::read_json;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Stored layer: `weight` is `out x in`, `bias` has `out` entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerWeights {
    pub weight: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoencoderWeights {
    pub encoder: Vec<LayerWeights>,
    pub decoder: Vec<LayerWeights>,
}

#[derive(Debug, Clone)]
struct DenseLayer {
    weight: Array2<f64>,
    bias: Array1<f64>,
}

impl DenseLayer {
    fn from_weights(layer: &LayerWeights) -> Result<Self, String> {
        let rows = layer.weight.len();
        let cols = layer.weight.first().map(Vec::len).unwrap_or(0);
        if rows == 0 || cols == 0 {
            return Err("layer weight matrix is empty".to_string());
        }
        if layer.weight.iter().any(|r| r.len() != cols) {
            return Err("layer weight matrix is ragged".to_string());
        }
        if layer.bias.len() != rows {
            return Err(format!(
                "bias has {} entries, weight has {rows} rows",
                layer.bias.len()
            ));
        }
        let flat: Vec<f64> = layer.weight.iter().flatten().copied().collect();
        if flat.iter().chain(&layer.bias).any(|v| !v.is_finite()) {
            return Err("layer contains non-finite weights".to_string());
        }
        let weight = Array2::from_shape_vec((rows, cols), flat).map_err(|e| e.to_string())?;

        Ok(Self {
            weight,
            bias: Array1::from(layer.bias.clone()),
        })
    }

    fn inputs(&self) -> usize {
        self.weight.ncols()
    }

    fn outputs(&self) -> usize {
        self.weight.nrows()
    }

    fn forward(&self, x: &Array1<f64>) -> Array1<f64> {
        self.weight.dot(x) + &self.bias
    }
}

/// Encoder and decoder stacks with ReLU between layers.
#[derive(Debug, Clone)]
pub struct Autoencoder {
    encoder: Vec<DenseLayer>,
    decoder: Vec<DenseLayer>,
}

impl Autoencoder {
    /// Load `autoencoder.json`; its input width must equal `expected_inputs`.
    pub fn load(path: &Path, expected_inputs: usize) -> ScoringResult<Self> {
        let weights: AutoencoderWeights = read_json(path)?;
        let model =
            Self::from_weights(&weights).map_err(|reason| ScoringError::schema(path, reason))?;

        if model.input_dim() != expected_inputs {
            return Err(ScoringError::schema(
                path,
                format!(
                    "first encoder layer takes {} inputs, feature list has {expected_inputs}",
                    model.input_dim()
                ),
            ));
        }

        info!(
            path = %path.display(),
            input_dim = model.input_dim(),
            latent_dim = model.latent_dim(),
            "Loaded autoencoder"
        );
        Ok(model)
    }

    pub fn from_weights(weights: &AutoencoderWeights) -> Result<Self, String> {
        if weights.encoder.is_empty() || weights.decoder.is_empty() {
            return Err("encoder and decoder need at least one layer each".to_string());
        }
        let encoder = weights
            .encoder
            .iter()
            .enumerate()
            .map(|(i, l)| DenseLayer::from_weights(l).map_err(|e| format!("encoder.{i}: {e}")))
            .collect::<Result<Vec<_>, _>>()?;
        let decoder = weights
            .decoder
            .iter()
            .enumerate()
            .map(|(i, l)| DenseLayer::from_weights(l).map_err(|e| format!("decoder.{i}: {e}")))
            .collect::<Result<Vec<_>, _>>()?;

        let layers: Vec<&DenseLayer> = encoder.iter().chain(&decoder).collect();
        for pair in layers.windows(2) {
            if pair[0].outputs() != pair[1].inputs() {
                return Err(format!(
                    "layer widths do not chain: {} outputs feed {} inputs",
                    pair[0].outputs(),
                    pair[1].inputs()
                ));
            }
        }

        let model = Self { encoder, decoder };
        let output_dim = model.decoder.last().map(DenseLayer::outputs).unwrap_or(0);
        if output_dim != model.input_dim() {
            return Err(format!(
                "decoder emits {output_dim} values for {} inputs",
                model.input_dim()
            ));
        }
        Ok(model)
    }

    /// Width inferred from the first encoder layer.
    pub fn input_dim(&self) -> usize {
        self.encoder.first().map(DenseLayer::inputs).unwrap_or(0)
    }

    pub fn latent_dim(&self) -> usize {
        self.encoder.last().map(DenseLayer::outputs).unwrap_or(0)
    }

    pub fn reconstruct(&self, x: &[f64]) -> Array1<f64> {
        let latent = run_stack(&self.encoder, Array1::from(x.to_vec()));
        run_stack(&self.decoder, latent)
    }

    /// Mean squared difference between `x` and its reconstruction.
    pub fn reconstruction_error(&self, x: &[f64]) -> f64 {
        let input = Array1::from(x.to_vec());
        let diff = self.reconstruct(x) - &input;
        diff.mapv(|d| d * d).mean().unwrap_or(0.0)
    }
}

fn run_stack(layers: &[DenseLayer], input: Array1<f64>) -> Array1<f64> {
    let last = layers.len().saturating_sub(1);
    layers.iter().enumerate().fold(input, |h, (i, layer)| {
        let out = layer.forward(&h);
        if i < last {
            out.mapv(|v| v.max(0.0))
        } else {
            out
        }
    })
}
