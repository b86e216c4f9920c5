//! Fraud Risk Scoring Library
//!
//! Real-time scoring of single payment transactions against a frozen model
//! bundle: deterministic feature engineering checked against a frozen column
//! contract, three base signals (gradient-boosted trees, isolation forest,
//! autoencoder) stacked by a logistic meta-model, and exact tree attributions
//! for every decision.

pub mod api;
pub mod client;
pub mod config;
pub mod consumer;
pub mod demo;
pub mod error;
pub mod explain;
pub mod features;
pub mod metrics;
pub mod models;
pub mod producer;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::ScoringClient;
pub use config::AppConfig;
pub use consumer::TransactionConsumer;
pub use error::{ScoringError, ScoringResult};
pub use features::{FeatureColumnContract, FeaturePipeline, TransformMode};
pub use metrics::PipelineMetrics;
pub use models::{ArtifactPaths, ArtifactRegistry, InferenceEngine, ModelArtifactSet};
pub use producer::DecisionProducer;
pub use types::{Contribution, Decision, Explanation, Label, RawTransaction, ScoredTransaction};
