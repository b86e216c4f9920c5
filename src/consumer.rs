//! NATS consumer for incoming raw transactions

use crate::error::{ScoringError, ScoringResult};
use crate::metrics::PipelineMetrics;
use crate::models::InferenceEngine;
use crate::types::{RawTransaction, ScoredTransaction};
use anyhow::Result;
use async_nats::{Client, Subscriber};
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Consumer for receiving transactions from NATS
pub struct TransactionConsumer {
    client: Client,
    subject: String,
}

impl TransactionConsumer {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Subscribe to the transaction subject
    pub async fn subscribe(&self) -> Result<Subscriber> {
        let subscriber = self.client.subscribe(self.subject.clone()).await?;
        info!(subject = %self.subject, "Subscribed to transaction subject");
        Ok(subscriber)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Decode one message payload as a flat raw-transaction object.
pub fn decode(payload: &[u8]) -> ScoringResult<RawTransaction> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| ScoringError::invalid_input("<payload>", e.to_string()))?;
    RawTransaction::from_json_value(&value)
}

/// Score one message. Malformed or rejected messages are logged, counted and
/// dropped.
pub fn score_message(
    engine: &InferenceEngine,
    metrics: &PipelineMetrics,
    payload: &[u8],
) -> Option<ScoredTransaction> {
    let start = Instant::now();
    let raw = match decode(payload) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, bytes = payload.len(), "Skipping malformed transaction message");
            metrics.record_rejection(&e);
            return None;
        }
    };

    match engine.assess(&raw) {
        Ok(assessment) => {
            metrics.record_decision(start.elapsed(), &assessment.decision);
            if assessment.explanation.is_err() {
                metrics.record_explanation_failure();
            }
            debug!(
                row_index = ?raw.row_index,
                score = assessment.decision.score,
                label = %assessment.decision.label,
                processing_time_us = start.elapsed().as_micros() as u64,
                "Transaction scored from stream"
            );
            Some(ScoredTransaction::new(raw.row_index, assessment))
        }
        Err(e) => {
            warn!(row_index = ?raw.row_index, kind = e.kind(), error = %e, "Inference failed");
            metrics.record_rejection(&e);
            None
        }
    }
}
