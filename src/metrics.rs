//! In-process scoring metrics and the periodic log reporter.

use crate::error::ScoringError;
use crate::types::{Decision, Label};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

const MAX_RETAINED_TIMINGS: usize = 10_000;

/// Metrics collector shared by the HTTP and streaming transports
pub struct PipelineMetrics {
    /// Transactions that produced a decision
    pub predictions: AtomicU64,
    /// Decisions labelled fraud
    pub fraud_decisions: AtomicU64,
    /// Decisions returned without an explanation
    pub explanation_failures: AtomicU64,
    /// Rejected requests, keyed by `ScoringError::kind`
    rejections: RwLock<BTreeMap<String, u64>>,
    /// Processing times (in microseconds)
    processing_times: RwLock<Vec<u64>>,
    /// Score histogram, ten buckets of width 0.1
    score_buckets: RwLock<[u64; 10]>,
    start_time: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            predictions: AtomicU64::new(0),
            fraud_decisions: AtomicU64::new(0),
            explanation_failures: AtomicU64::new(0),
            rejections: RwLock::new(BTreeMap::new()),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            score_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    /// Record a decision and how long it took
    pub fn record_decision(&self, processing_time: Duration, decision: &Decision) {
        self.predictions.fetch_add(1, Ordering::Relaxed);
        if decision.label == Label::Fraud {
            self.fraud_decisions.fetch_add(1, Ordering::Relaxed);
        }

        if let Ok(mut times) = self.processing_times.write() {
            times.push(processing_time.as_micros() as u64);
            if times.len() > MAX_RETAINED_TIMINGS {
                times.drain(0..MAX_RETAINED_TIMINGS / 2);
            }
        }

        let bucket = (decision.score * 10.0).clamp(0.0, 9.0) as usize;
        if let Ok(mut buckets) = self.score_buckets.write() {
            buckets[bucket] += 1;
        }
    }

    /// Record a request that failed before a decision was made
    pub fn record_rejection(&self, error: &ScoringError) {
        if let Ok(mut rejections) = self.rejections.write() {
            *rejections.entry(error.kind().to_string()).or_insert(0) += 1;
        }
    }

    pub fn record_explanation_failure(&self) {
        self.explanation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get processing time statistics
    pub fn get_processing_stats(&self) -> ProcessingStats {
        let times = self
            .processing_times
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if times.is_empty() {
            return ProcessingStats::default();
        }

        let mut sorted = times.clone();
        drop(times);
        sorted.sort_unstable();

        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();
        let at = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: at(0.50),
            p95_us: at(0.95),
            p99_us: at(0.99),
            max_us: sorted[count - 1],
        }
    }

    /// Decisions per second since startup
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.predictions.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn get_score_distribution(&self) -> [u64; 10] {
        *self
            .score_buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_rejections(&self) -> BTreeMap<String, u64> {
        self.rejections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Point-in-time copy served on `GET /metrics`
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            predictions: self.predictions.load(Ordering::Relaxed),
            fraud_decisions: self.fraud_decisions.load(Ordering::Relaxed),
            explanation_failures: self.explanation_failures.load(Ordering::Relaxed),
            rejections: self.get_rejections(),
            throughput: self.get_throughput(),
            processing: self.get_processing_stats(),
            score_distribution: self.get_score_distribution(),
        }
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let snapshot = self.snapshot();
        let fraud_rate = if snapshot.predictions > 0 {
            (snapshot.fraud_decisions as f64 / snapshot.predictions as f64) * 100.0
        } else {
            0.0
        };
        let processing = &snapshot.processing;

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║             FRAUD RISK SCORING - METRICS SUMMARY             ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Predictions:            {:>8}  │  Throughput: {:>6.1} tx/s ║",
            snapshot.predictions, snapshot.throughput
        );
        info!(
            "║ Fraud Decisions:        {:>8}  │  Fraud Rate: {:>6.1}%     ║",
            snapshot.fraud_decisions, fraud_rate
        );
        info!(
            "║ Explanations Unavailable: {:>6}                             ║",
            snapshot.explanation_failures
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Processing Time (μs): mean={:>5} p50={:>5} p95={:>5} p99={:>5} ║",
            processing.mean_us, processing.p50_us, processing.p95_us, processing.p99_us
        );
        if !snapshot.rejections.is_empty() {
            info!("╠══════════════════════════════════════════════════════════════╣");
            info!("║ Rejected Requests:                                           ║");
            for (kind, count) in &snapshot.rejections {
                info!("║   {:24}: {:>6}                           ║", kind, count);
            }
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Score Distribution:                                          ║");
        let total: u64 = snapshot.score_distribution.iter().sum();
        for (i, &count) in snapshot.score_distribution.iter().enumerate() {
            let pct = if total > 0 {
                (count as f64 / total as f64) * 100.0
            } else {
                0.0
            };
            let bar = "█".repeat(((pct / 2.0) as usize).min(20));
            info!(
                "║   {:.1}-{:.1}: {:>6} ({:>5.1}%) {}",
                i as f64 / 10.0,
                (i + 1) as f64 / 10.0,
                count,
                pct,
                bar
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Processing time statistics
#[derive(Debug, Default, Clone, Serialize)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub predictions: u64,
    pub fraud_decisions: u64,
    pub explanation_failures: u64,
    pub rejections: BTreeMap<String, u64>,
    pub throughput: f64,
    pub processing: ProcessingStats,
    pub score_distribution: [u64; 10],
}

/// Periodic summary logger
pub struct MetricsReporter {
    metrics: Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Run forever; call only with a non-zero interval.
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs.max(1)));
        // first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
