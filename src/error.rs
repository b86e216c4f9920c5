//! Error taxonomy for the scoring pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the scoring core.
pub type ScoringResult<T> = Result<T, ScoringError>;

/// Errors raised by feature engineering, artifact loading and inference.
///
/// Contract and schema violations are never recovered from inside the core:
/// they abort the request (or startup) that raised them.
#[derive(Debug, Error)]
pub enum ScoringError {
    /// Engineered output does not match the frozen feature-column contract.
    #[error("Feature contract mismatch. Missing: {missing:?} | Extra: {extra:?}")]
    ContractViolation {
        missing: Vec<String>,
        extra: Vec<String>,
    },

    /// A required frozen artifact is absent.
    #[error("Artifact not found: {}", path.display())]
    ArtifactNotFound { path: PathBuf },

    /// A frozen artifact was found but has the wrong shape.
    #[error("Invalid artifact {}: {reason}", path.display())]
    ArtifactSchemaError { path: PathBuf, reason: String },

    /// A base model's required feature is absent from the engineered row.
    #[error("Missing required features for {model}: {missing:?}")]
    MissingFeature { model: String, missing: Vec<String> },

    /// The meta-feature assembler cannot find a name the meta-model needs.
    #[error("Missing meta features: {missing:?}")]
    MissingMetaFeature { missing: Vec<String> },

    /// The meta vector carries the right names in the wrong order.
    #[error("Meta features out of order. Expected: {expected:?} | Got: {actual:?}")]
    MetaFeatureOrder {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    /// A raw field is non-numeric or outside its domain.
    #[error("Invalid value for field '{field}': {reason}")]
    InvalidInputType { field: String, reason: String },

    /// Apply mode only accepts a single raw row.
    #[error("Apply mode expects exactly one transaction, got {rows}")]
    SingleRowRequired { rows: usize },

    /// Fit mode needs at least one row to learn from.
    #[error("Cannot fit preprocessors on an empty batch")]
    EmptyBatch,

    /// The scoring service could not be reached (boundary layer only).
    #[error("Scoring service unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A label outside {fraud, legit} was produced or received.
    #[error("Unknown prediction label: {0}")]
    UnknownLabel(String),

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ScoringError {
    /// Short machine-readable name, used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ScoringError::ContractViolation { .. } => "contract_violation",
            ScoringError::ArtifactNotFound { .. } => "artifact_not_found",
            ScoringError::ArtifactSchemaError { .. } => "artifact_schema_error",
            ScoringError::MissingFeature { .. } => "missing_feature",
            ScoringError::MissingMetaFeature { .. } => "missing_meta_feature",
            ScoringError::MetaFeatureOrder { .. } => "meta_feature_order",
            ScoringError::InvalidInputType { .. } => "invalid_input_type",
            ScoringError::SingleRowRequired { .. } => "single_row_required",
            ScoringError::EmptyBatch => "empty_batch",
            ScoringError::UpstreamUnavailable(_) => "upstream_unavailable",
            ScoringError::UnknownLabel(_) => "unknown_label",
            ScoringError::Io { .. } => "io",
            ScoringError::Json { .. } => "json",
        }
    }

    pub(crate) fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ScoringError::InvalidInputType {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn schema(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ScoringError::ArtifactSchemaError {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
