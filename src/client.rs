//! HTTP client for a remote scoring service.
//!
//! Every call is bounded by a timeout. Transport failures and non-2xx answers
//! surface as [`ScoringError::UpstreamUnavailable`]; a label outside
//! `{fraud, legit}` surfaces as [`ScoringError::UnknownLabel`].

use crate::config::ClientConfig;
use crate::error::{ScoringError, ScoringResult};
use crate::types::{Contribution, Decision, Label, RawTransaction};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct WireDecision {
    score: f64,
    label: String,
}

/// Client for `/health`, `/predict` and `/explain`
#[derive(Debug, Clone)]
pub struct ScoringClient {
    http: Client,
    base_url: String,
    health_timeout: Duration,
}

impl ScoringClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        health_timeout: Duration,
    ) -> ScoringResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScoringError::UpstreamUnavailable(format!("http client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            health_timeout,
        })
    }

    pub fn from_config(config: &ClientConfig) -> ScoringResult<Self> {
        Self::new(&config.base_url, config.timeout(), config.health_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// True when the service answers `/health` with a 2xx in time.
    pub async fn health(&self) -> bool {
        let result = self
            .http
            .get(self.url("/health"))
            .timeout(self.health_timeout)
            .send()
            .await;

        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(base_url = %self.base_url, error = %e, "Health check failed");
                false
            }
        }
    }

    /// Remote fraud decision for one transaction.
    pub async fn predict(&self, raw: &RawTransaction) -> ScoringResult<Decision> {
        let response = self.post("/predict", raw).await?;
        let wire: WireDecision = read_json(response).await?;
        let label: Label = wire.label.parse()?;

        Ok(Decision {
            score: wire.score,
            label,
        })
    }

    /// Remote attributions; `k = None` leaves the count to the server.
    pub async fn explain(
        &self,
        raw: &RawTransaction,
        k: Option<usize>,
    ) -> ScoringResult<Vec<Contribution>> {
        let path = match k {
            Some(k) => format!("/explain?k={k}"),
            None => "/explain".to_string(),
        };
        let response = self.post(&path, raw).await?;
        read_json(response).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post(&self, path: &str, raw: &RawTransaction) -> ScoringResult<Response> {
        let response = self
            .http
            .post(self.url(path))
            .json(raw)
            .send()
            .await
            .map_err(|e| {
                warn!(path, error = %e, "Scoring request failed");
                ScoringError::UpstreamUnavailable(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(path, status = status.as_u16(), body = %body, "Scoring service returned an error");
            return Err(ScoringError::UpstreamUnavailable(format!(
                "{path} returned {status}: {body}"
            )));
        }
        Ok(response)
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> ScoringResult<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| ScoringError::UpstreamUnavailable(format!("malformed response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fraud_demo, normal_demo};
    use httpmock::{Method, MockServer};
    use serde_json::json;

    fn client(server: &MockServer, timeout_ms: u64) -> ScoringClient {
        ScoringClient::new(
            server.base_url(),
            Duration::from_millis(timeout_ms),
            Duration::from_millis(timeout_ms),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_predict_parses_decision() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(Method::POST)
                    .path("/predict")
                    .header("content-type", "application/json");
                then.status(200)
                    .json_body(json!({ "score": 0.949, "label": "fraud" }));
            })
            .await;

        let decision = client(&server, 2_000).predict(&fraud_demo()).await.unwrap();
        mock.assert_async().await;
        assert_eq!(decision.label, Label::Fraud);
        assert_eq!(decision.score, 0.949);
    }

    #[tokio::test]
    async fn test_unknown_label() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(Method::POST).path("/predict");
                then.status(200)
                    .json_body(json!({ "score": 0.5, "label": "suspicious" }));
            })
            .await;

        let result = client(&server, 2_000).predict(&normal_demo()).await;
        assert!(matches!(result, Err(ScoringError::UnknownLabel(ref l)) if l == "suspicious"));
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(Method::POST).path("/predict");
                then.status(503).body("warming up");
            })
            .await;

        let result = client(&server, 2_000).predict(&normal_demo()).await;
        match result {
            Err(ScoringError::UpstreamUnavailable(msg)) => assert!(msg.contains("503")),
            other => panic!("expected UpstreamUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_unavailable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(Method::POST).path("/predict");
                then.status(200)
                    .delay(Duration::from_millis(500))
                    .json_body(json!({ "score": 0.1, "label": "legit" }));
            })
            .await;

        let result = client(&server, 50).predict(&normal_demo()).await;
        assert!(matches!(result, Err(ScoringError::UpstreamUnavailable(_))));
    }

    #[tokio::test]
    async fn test_explain_passes_k() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(Method::POST)
                    .path("/explain")
                    .query_param("k", "1");
                then.status(200).json_body(json!([
                    { "feature": "V14", "shap_value": 2.15, "value": -4.289254 }
                ]));
            })
            .await;

        let contributions = client(&server, 2_000)
            .explain(&fraud_demo(), Some(1))
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(contributions.len(), 1);
        assert_eq!(contributions[0].feature, "V14");
    }

    #[tokio::test]
    async fn test_health() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(Method::GET).path("/health");
                then.status(200).json_body(json!({ "status": "ok" }));
            })
            .await;
        assert!(client(&server, 2_000).health().await);

        let down = ScoringClient::new(
            "http://127.0.0.1:9",
            Duration::from_millis(200),
            Duration::from_millis(200),
        )
        .unwrap();
        assert!(!down.health().await);
    }
}
