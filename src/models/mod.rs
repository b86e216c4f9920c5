//! Frozen models and the stacked inference pipeline

pub mod autoencoder;
pub mod decision;
pub mod inference;
pub mod isolation;
pub mod loader;
pub mod meta;
pub mod signals;
pub mod stacker;
pub mod tree;

pub use inference::InferenceEngine;
pub use loader::{ArtifactPaths, ArtifactRegistry, ModelArtifactSet};
pub use meta::MetaFeatureVector;
pub use signals::BaseSignals;
