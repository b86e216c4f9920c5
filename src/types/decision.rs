//! Decision and explanation data structures

use crate::error::ScoringError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Binary fraud decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Fraud,
    Legit,
}

impl Label {
    /// `Fraud` iff `score >= threshold`.
    pub fn from_score(score: f64, threshold: f64) -> Self {
        if score >= threshold {
            Label::Fraud
        } else {
            Label::Legit
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Fraud => "fraud",
            Label::Legit => "legit",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = ScoringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fraud" => Ok(Label::Fraud),
            "legit" => Ok(Label::Legit),
            other => Err(ScoringError::UnknownLabel(other.to_string())),
        }
    }
}

/// Inference response: `{"score": .., "label": ..}`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Positive-class probability from the meta-model (0.0 - 1.0)
    pub score: f64,
    pub label: Label,
}

/// One ranked feature attribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub feature: String,
    /// Signed attribution; positive pushes towards fraud
    pub shap_value: f64,
    /// Observed engineered value
    pub value: f64,
}

/// Ranked attributions for one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    /// Model output before any attribution (log-odds)
    pub expected_value: f64,
    /// Top contributions, sorted by descending |shap_value|
    pub contributions: Vec<Contribution>,
}

/// Decision plus an explanation that may be unavailable.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub decision: Decision,
    pub explanation: Result<Explanation, String>,
}

/// Scored transaction published by the streaming transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredTransaction {
    /// Unique decision identifier
    pub decision_id: String,

    /// Training row index when the input carried one
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub row_index: Option<u64>,

    pub score: f64,
    pub label: Label,

    /// Top contributions; absent when the explanation failed
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub explanation: Option<Vec<Contribution>>,

    /// Why the explanation is unavailable
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub explanation_error: Option<String>,

    /// Decision timestamp
    pub timestamp: DateTime<Utc>,
}

impl ScoredTransaction {
    /// Build the published record from an assessment
    pub fn new(row_index: Option<u64>, assessment: Assessment) -> Self {
        let (explanation, explanation_error) = match assessment.explanation {
            Ok(explanation) => (Some(explanation.contributions), None),
            Err(reason) => (None, Some(reason)),
        };

        Self {
            decision_id: uuid::Uuid::new_v4().to_string(),
            row_index,
            score: assessment.decision.score,
            label: assessment.decision.label,
            explanation,
            explanation_error,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_from_score_is_inclusive() {
        assert_eq!(Label::from_score(0.41, 0.41), Label::Fraud);
        assert_eq!(Label::from_score(0.409_999, 0.41), Label::Legit);
        assert_eq!(Label::from_score(1.0, 0.5), Label::Fraud);
    }

    #[test]
    fn test_label_parse_rejects_unknown() {
        assert_eq!("fraud".parse::<Label>().unwrap(), Label::Fraud);
        assert_eq!("legit".parse::<Label>().unwrap(), Label::Legit);
        assert!(matches!(
            "suspicious".parse::<Label>(),
            Err(ScoringError::UnknownLabel(ref l)) if l == "suspicious"
        ));
    }

    #[test]
    fn test_decision_wire_format() {
        let decision = Decision {
            score: 0.8,
            label: Label::Fraud,
        };
        let json = serde_json::to_value(decision).unwrap();
        assert_eq!(json, serde_json::json!({"score": 0.8, "label": "fraud"}));
    }

    #[test]
    fn test_scored_transaction_carries_explanation_error() {
        let assessment = Assessment {
            decision: Decision {
                score: 0.2,
                label: Label::Legit,
            },
            explanation: Err("tree model unavailable".to_string()),
        };

        let scored = ScoredTransaction::new(Some(3), assessment);
        let json = serde_json::to_value(&scored).unwrap();

        assert_eq!(json["label"], "legit");
        assert_eq!(json["row_index"], 3);
        assert!(json.get("explanation").is_none());
        assert_eq!(json["explanation_error"], "tree model unavailable");
    }
}
