//! Live Prediction Tool
//!
//! Sends the reference transactions plus a few random legitimate-looking ones
//! to a running scoring service and prints every decision with its top
//! attributions. With `--nats <url>` the same transactions are published to the
//! transaction subject instead, for exercising the streaming transport.
//!
//! Usage: live-predict [base_url] [random_count] [--nats <url>]

use anyhow::{bail, Result};
use fraud_risk_scoring::{
    config::AppConfig,
    demo::{fraud_transaction, normal_transaction},
    RawTransaction, ScoringClient,
};
use rand::Rng;
use std::time::Duration;
use tracing::{info, warn};

/// Random transaction with small components and an everyday amount
fn legitimate_transaction(rng: &mut impl Rng) -> RawTransaction {
    let mut tx = RawTransaction::new(
        rng.gen_range(0.0..172_800.0),
        (rng.gen_range(1.0..250.0_f64) * 100.0).round() / 100.0,
    );
    for v in tx.components.iter_mut() {
        *v = rng.gen_range(-1.0..1.0);
    }
    tx
}

fn batch(random_count: usize) -> Vec<(String, RawTransaction)> {
    let mut rng = rand::thread_rng();
    let mut transactions = vec![
        ("normal".to_string(), normal_transaction()),
        ("known-fraud".to_string(), fraud_transaction()),
    ];
    for i in 0..random_count {
        transactions.push((format!("random-{}", i + 1), legitimate_transaction(&mut rng)));
    }
    transactions
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("live_predict=info".parse()?),
        )
        .init();

    let config = AppConfig::load()?;
    let mut args = std::env::args().skip(1);
    let mut positional = Vec::new();
    let mut nats_url = None;
    while let Some(arg) = args.next() {
        if arg == "--nats" {
            nats_url = args.next();
        } else {
            positional.push(arg);
        }
    }
    let base_url = positional
        .first()
        .cloned()
        .unwrap_or_else(|| config.client.base_url.clone());
    let random_count: usize = positional.get(1).and_then(|s| s.parse().ok()).unwrap_or(3);

    let transactions = batch(random_count);

    if let Some(url) = nats_url {
        return publish(&url, &config.nats.transaction_subject, &transactions).await;
    }

    let client = ScoringClient::new(
        &base_url,
        config.client.timeout(),
        config.client.health_timeout(),
    )?;
    if !client.health().await {
        bail!("Scoring service at {base_url} is not healthy");
    }
    info!(base_url = %base_url, count = transactions.len(), "Service healthy, sending transactions");

    for (name, tx) in &transactions {
        let decision = match client.predict(tx).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(transaction = %name, error = %e, "Prediction failed");
                continue;
            }
        };
        println!(
            "{name:<12} amount={:>9.2}  score={:.4}  label={}",
            tx.amount, decision.score, decision.label
        );

        match client.explain(tx, None).await {
            Ok(contributions) => {
                for c in contributions {
                    println!(
                        "    {:<22} shap={:>+9.4}  value={:>10.4}",
                        c.feature, c.shap_value, c.value
                    );
                }
            }
            Err(e) => println!("    explanation unavailable: {e}"),
        }
    }

    Ok(())
}

async fn publish(url: &str, subject: &str, transactions: &[(String, RawTransaction)]) -> Result<()> {
    let client = async_nats::connect(url).await?;
    info!(nats_url = %url, subject = %subject, "Connected to NATS");

    for (name, tx) in transactions {
        let payload = serde_json::to_vec(tx)?;
        client.publish(subject.to_string(), payload.into()).await?;
        info!(transaction = %name, "Published transaction");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    client.flush().await?;

    info!(count = transactions.len(), "Completed");
    Ok(())
}
