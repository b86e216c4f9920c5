//! Fraud Risk Scoring - Main Entry Point
//!
//! Loads the frozen artifact bundle once, serves `/predict` and `/explain`
//! over HTTP and, when enabled, scores raw transactions streamed over NATS.

use anyhow::{Context, Result};
use fraud_risk_scoring::{
    api::{self, AppState},
    config::{AppConfig, LoggingConfig, NatsConfig},
    consumer::{self, TransactionConsumer},
    metrics::{MetricsReporter, PipelineMetrics},
    models::{ArtifactRegistry, InferenceEngine},
    producer::DecisionProducer,
};
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.logging)?;

    info!("Starting Fraud Risk Scoring service");

    let registry = ArtifactRegistry::new(config.artifacts.paths());
    let artifacts = registry
        .load()
        .context("Failed to load frozen model artifacts")?;
    info!(
        features = artifacts.contract.len(),
        meta_features = artifacts.meta_feature_order.len(),
        threshold = artifacts.threshold,
        clusters = artifacts.clusters.is_some(),
        "Artifact bundle ready"
    );

    let engine = Arc::new(InferenceEngine::with_top_k(artifacts, config.explain.top_k));
    let metrics = Arc::new(PipelineMetrics::new());

    if config.metrics.report_interval_secs > 0 {
        let reporter = MetricsReporter::new(metrics.clone(), config.metrics.report_interval_secs);
        tokio::spawn(reporter.start());
    }

    if config.nats.enabled {
        let engine = engine.clone();
        let metrics = metrics.clone();
        let nats = config.nats.clone();
        tokio::spawn(async move {
            if let Err(e) = run_stream(nats, engine, metrics).await {
                error!(error = %e, "Streaming transport stopped");
            }
        });
    }

    let state = AppState::new(
        engine,
        metrics.clone(),
        config.server.max_concurrent_requests,
    );
    let address = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    info!(address = %address, "HTTP server listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Service shutting down...");
    metrics.print_summary();

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("fraud_risk_scoring={}", logging.level).parse()?)
        .add_directive(format!("tower_http={}", logging.level).parse()?);

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "pretty" {
        builder.pretty().init();
    } else {
        builder.json().init();
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

/// Score raw transactions from NATS and publish every decision.
async fn run_stream(
    nats: NatsConfig,
    engine: Arc<InferenceEngine>,
    metrics: Arc<PipelineMetrics>,
) -> Result<()> {
    let client = async_nats::connect(&nats.url)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", nats.url))?;
    info!(url = %nats.url, "Connected to NATS");

    let consumer = TransactionConsumer::new(client.clone(), &nats.transaction_subject);
    let producer = Arc::new(DecisionProducer::new(client, &nats.decision_subject));
    info!(
        workers = nats.workers,
        listening = %consumer.subject(),
        publishing = %producer.subject(),
        "Starting streaming loop"
    );

    let semaphore = Arc::new(Semaphore::new(nats.workers.max(1)));
    let processed_count = Arc::new(AtomicU64::new(0));
    let mut subscription = consumer.subscribe().await?;

    while let Some(message) = subscription.next().await {
        let permit = semaphore.clone().acquire_owned().await?;

        let engine = engine.clone();
        let producer = producer.clone();
        let metrics = metrics.clone();
        let processed_count = processed_count.clone();

        tokio::spawn(async move {
            if let Some(scored) = consumer::score_message(&engine, &metrics, &message.payload) {
                if let Err(e) = producer.publish(&scored).await {
                    error!(
                        decision_id = %scored.decision_id,
                        error = %e,
                        "Failed to publish decision"
                    );
                }

                let count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;
                if count % 100 == 0 {
                    let processing = metrics.get_processing_stats();
                    info!(
                        processed = count,
                        throughput = format!("{:.1} tx/s", metrics.get_throughput()),
                        avg_latency_us = processing.mean_us,
                        "Processing milestone"
                    );
                }
            }
            drop(permit);
        });
    }

    warn!("Transaction subscription closed");
    Ok(())
}
