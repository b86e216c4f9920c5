//! Inference engine: raw transaction to decision and explanation

use crate::error::{ScoringError, ScoringResult};
use crate::explain;
use crate::features::EngineeredFeatureRow;
use crate::models::decision::decide;
use crate::models::loader::ModelArtifactSet;
use crate::models::meta::assemble;
use crate::models::signals::{self, BaseSignals};
use crate::types::{Assessment, Decision, Explanation, RawTransaction};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Per-request pipeline over a shared, immutable artifact set.
#[derive(Debug, Clone)]
pub struct InferenceEngine {
    artifacts: Arc<ModelArtifactSet>,
    top_k: usize,
}

impl InferenceEngine {
    pub fn new(artifacts: Arc<ModelArtifactSet>) -> Self {
        Self::with_top_k(artifacts, explain::DEFAULT_TOP_K)
    }

    pub fn with_top_k(artifacts: Arc<ModelArtifactSet>, top_k: usize) -> Self {
        Self { artifacts, top_k }
    }

    pub fn artifacts(&self) -> &ModelArtifactSet {
        &self.artifacts
    }

    /// Default explanation length
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Engineer `raw` and check it against the frozen contract.
    ///
    /// Raw values that overflow during engineering are rejected here, naming
    /// the engineered column.
    pub fn engineer(&self, raw: &RawTransaction) -> ScoringResult<EngineeredFeatureRow> {
        let row = self.artifacts.pipeline.apply(raw)?;
        let row = self.artifacts.contract.enforce(row)?;
        if let Some((column, value)) = row.first_non_finite() {
            return Err(ScoringError::invalid_input(
                column,
                format!("engineered value {value} is not finite"),
            ));
        }
        Ok(row)
    }

    /// Base signals for an engineered row.
    pub fn signals(&self, row: &EngineeredFeatureRow) -> ScoringResult<BaseSignals> {
        signals::compute(row, &self.artifacts)
    }

    /// Fraud decision for one transaction.
    pub fn predict(&self, raw: &RawTransaction) -> ScoringResult<Decision> {
        let start = Instant::now();
        let row = self.engineer(raw)?;
        let decision = self.decide_row(&row)?;

        debug!(
            row_index = ?raw.row_index,
            score = decision.score,
            label = %decision.label,
            processing_time_us = start.elapsed().as_micros() as u64,
            "Transaction scored"
        );
        Ok(decision)
    }

    /// Top `k` tree attributions for one transaction.
    pub fn explain(&self, raw: &RawTransaction, k: usize) -> ScoringResult<Explanation> {
        let row = self.engineer(raw)?;
        explain::explain(&row, &self.artifacts, k)
    }

    /// Decision plus explanation; an explanation failure never blocks the decision.
    pub fn assess(&self, raw: &RawTransaction) -> ScoringResult<Assessment> {
        let start = Instant::now();
        let row = self.engineer(raw)?;
        let decision = self.decide_row(&row)?;

        let explanation = explain::explain(&row, &self.artifacts, self.top_k);
        let assessment = settle(raw, decision, explanation);

        debug!(
            row_index = ?raw.row_index,
            score = decision.score,
            label = %decision.label,
            explained = assessment.explanation.is_ok(),
            processing_time_us = start.elapsed().as_micros() as u64,
            "Transaction assessed"
        );
        Ok(assessment)
    }

    fn decide_row(&self, row: &EngineeredFeatureRow) -> ScoringResult<Decision> {
        let base = signals::compute(row, &self.artifacts)?;
        let meta = assemble(row, &base, &self.artifacts)?;
        decide(&meta, &self.artifacts)
    }
}

fn settle(
    raw: &RawTransaction,
    decision: Decision,
    explanation: ScoringResult<Explanation>,
) -> Assessment {
    let explanation = explanation.map_err(|e| {
        warn!(
            row_index = ?raw.row_index,
            error = %e,
            kind = e.kind(),
            "Explanation unavailable, returning decision only"
        );
        e.to_string()
    });
    Assessment {
        decision,
        explanation,
    }
}
