//! NATS producer for scored decisions

use crate::types::ScoredTransaction;
use anyhow::Result;
use async_nats::Client;
use tracing::debug;

/// Publishes every scored transaction to the decision subject
#[derive(Clone)]
pub struct DecisionProducer {
    client: Client,
    subject: String,
}

impl DecisionProducer {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    pub async fn publish(&self, scored: &ScoredTransaction) -> Result<()> {
        let payload = encode(scored)?;

        self.client
            .publish(self.subject.clone(), payload.into())
            .await?;

        debug!(
            decision_id = %scored.decision_id,
            row_index = ?scored.row_index,
            score = scored.score,
            label = %scored.label,
            "Published decision"
        );

        Ok(())
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Wire encoding of a published decision.
pub fn encode(scored: &ScoredTransaction) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(scored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Assessment, Decision, Label};
    use serde_json::Value;

    #[test]
    fn test_encode_without_explanation() {
        let scored = ScoredTransaction::new(
            None,
            Assessment {
                decision: Decision {
                    score: 0.12,
                    label: Label::Legit,
                },
                explanation: Err("Missing required features for xgb: [\"V14\"]".to_string()),
            },
        );

        let json: Value = serde_json::from_slice(&encode(&scored).unwrap()).unwrap();
        assert_eq!(json["label"], "legit");
        assert!(json.get("row_index").is_none());
        assert!(json.get("explanation").is_none());
        assert!(json["explanation_error"].as_str().unwrap().contains("V14"));
        assert!(json["decision_id"].as_str().is_some());
    }
}
