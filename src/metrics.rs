//! Performance metrics and statistics tracking for the risk scoring service.

use crate::ingest::IngestOutcome;
use crate::types::score::RiskTier;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Latency samples kept for percentile estimates
const LATENCY_WINDOW: usize = 10_000;

/// Metrics collector shared by the scoring and ingestion paths
pub struct ServiceMetrics {
    /// Successful score requests
    pub scores_total: AtomicU64,
    /// Score requests that hit the latency budget
    pub scoring_timeouts: AtomicU64,
    /// Failed score requests by error kind
    failures_by_kind: RwLock<BTreeMap<&'static str, u64>>,
    /// Successful scores by tier
    tiers: RwLock<BTreeMap<RiskTier, u64>>,
    /// End-to-end scoring latency (in microseconds)
    latencies: RwLock<Vec<u64>>,
    /// Scores per model version
    model_calls: RwLock<HashMap<String, u64>>,
    /// Score distribution buckets
    score_buckets: RwLock<[u64; 10]>,
    pub events_applied: AtomicU64,
    pub events_duplicate: AtomicU64,
    pub events_dead_lettered: AtomicU64,
    /// Dead letters lost because the dead-letter channel was full
    pub dead_letters_dropped: AtomicU64,
    /// Alerts lost because the alert channel was full
    pub alerts_dropped: AtomicU64,
    start_time: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            scores_total: AtomicU64::new(0),
            scoring_timeouts: AtomicU64::new(0),
            failures_by_kind: RwLock::new(BTreeMap::new()),
            tiers: RwLock::new(BTreeMap::new()),
            latencies: RwLock::new(Vec::with_capacity(1000)),
            model_calls: RwLock::new(HashMap::new()),
            score_buckets: RwLock::new([0; 10]),
            events_applied: AtomicU64::new(0),
            events_duplicate: AtomicU64::new(0),
            events_dead_lettered: AtomicU64::new(0),
            dead_letters_dropped: AtomicU64::new(0),
            alerts_dropped: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a successful score
    pub fn record_score(&self, model_version: &str, latency: Duration, score: f64, tier: RiskTier) {
        self.scores_total.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);

        let bucket = ((score * 10.0).max(0.0) as usize).min(9);
        self.score_buckets
            .write()
            .unwrap_or_else(PoisonError::into_inner)[bucket] += 1;

        *self
            .tiers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(tier)
            .or_insert(0) += 1;

        let mut calls = self.model_calls.write().unwrap_or_else(PoisonError::into_inner);
        match calls.get_mut(model_version) {
            Some(count) => *count += 1,
            None => {
                calls.insert(model_version.to_string(), 1);
            }
        }
    }

    /// Record a failed score request under its error kind
    pub fn record_failure(&self, kind: &'static str, latency: Duration) {
        if kind == "scoring_timeout" {
            self.scoring_timeouts.fetch_add(1, Ordering::Relaxed);
        }
        self.record_latency(latency);
        *self
            .failures_by_kind
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_insert(0) += 1;
    }

    fn record_latency(&self, latency: Duration) {
        let mut times = self.latencies.write().unwrap_or_else(PoisonError::into_inner);
        times.push(latency.as_micros() as u64);
        if times.len() > LATENCY_WINDOW {
            times.drain(0..LATENCY_WINDOW / 2);
        }
    }

    pub fn record_ingest(&self, outcome: IngestOutcome) {
        let counter = match outcome {
            IngestOutcome::Applied => &self.events_applied,
            IngestOutcome::Duplicate => &self.events_duplicate,
            IngestOutcome::DeadLettered => &self.events_dead_lettered,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_letter_dropped(&self) {
        self.dead_letters_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert_dropped(&self) {
        self.alerts_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Latency statistics over the recent window
    pub fn get_latency_stats(&self) -> LatencyStats {
        let mut sorted = self
            .latencies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if sorted.is_empty() {
            return LatencyStats::default();
        }
        sorted.sort_unstable();

        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();
        let at = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

        LatencyStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: at(0.50),
            p95_us: at(0.95),
            p99_us: at(0.99),
            max_us: sorted[count - 1],
        }
    }

    /// Successful scores per second since startup
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.scores_total.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn get_score_distribution(&self) -> [u64; 10] {
        *self.score_buckets.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut tiers: BTreeMap<RiskTier, u64> = RiskTier::ALL.iter().map(|t| (*t, 0)).collect();
        for (tier, count) in self.tiers.read().unwrap_or_else(PoisonError::into_inner).iter() {
            tiers.insert(*tier, *count);
        }

        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            scores_total: self.scores_total.load(Ordering::Relaxed),
            scoring_timeouts: self.scoring_timeouts.load(Ordering::Relaxed),
            throughput: self.get_throughput(),
            latency: self.get_latency_stats(),
            failures_by_kind: self
                .failures_by_kind
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            tiers,
            model_calls: self
                .model_calls
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            score_distribution: self.get_score_distribution(),
            events: EventCounters {
                applied: self.events_applied.load(Ordering::Relaxed),
                duplicate: self.events_duplicate.load(Ordering::Relaxed),
                dead_lettered: self.events_dead_lettered.load(Ordering::Relaxed),
                dead_letters_dropped: self.dead_letters_dropped.load(Ordering::Relaxed),
            },
            alerts_dropped: self.alerts_dropped.load(Ordering::Relaxed),
        }
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let snapshot = self.snapshot();
        let failures: u64 = snapshot.failures_by_kind.values().sum();
        let requests = snapshot.scores_total + failures;
        let failure_rate = if requests > 0 {
            (failures as f64 / requests as f64) * 100.0
        } else {
            0.0
        };
        let latency = &snapshot.latency;

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║            RISK SCORING SERVICE - METRICS SUMMARY            ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Scores:    {:>8}  │  Throughput: {:>6.1} req/s              ║",
            snapshot.scores_total, snapshot.throughput
        );
        info!(
            "║ Failures:  {:>8}  │  Failure Rate: {:>5.1}%  Timeouts: {:>6} ║",
            failures, failure_rate, snapshot.scoring_timeouts
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Latency (μs): mean={:>5} p50={:>5} p95={:>5} p99={:>5}        ║",
            latency.mean_us, latency.p50_us, latency.p95_us, latency.p99_us
        );
        info!(
            "║ Events: applied={:>7} duplicate={:>6} dead-lettered={:>6}  ║",
            snapshot.events.applied, snapshot.events.duplicate, snapshot.events.dead_lettered
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Scores by Tier:                                              ║");
        for (tier, count) in &snapshot.tiers {
            let pct = if snapshot.scores_total > 0 {
                (*count as f64 / snapshot.scores_total as f64) * 100.0
            } else {
                0.0
            };
            info!("║   {:10}: {:>6} ({:>5.1}%)                                ║", tier, count, pct);
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Risk Score Distribution:                                     ║");
        let total: u64 = snapshot.score_distribution.iter().sum();
        for (i, &count) in snapshot.score_distribution.iter().enumerate() {
            let pct = if total > 0 { (count as f64 / total as f64) * 100.0 } else { 0.0 };
            let bar: String = "█".repeat(((pct / 2.0) as usize).min(20));
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

        if !snapshot.failures_by_kind.is_empty() {
            info!("Scoring failures by kind:");
            for (kind, count) in &snapshot.failures_by_kind {
                info!("  {}: {}", kind, count);
            }
        }
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Latency statistics
#[derive(Debug, Default, Clone, Serialize)]
pub struct LatencyStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventCounters {
    pub applied: u64,
    pub duplicate: u64,
    pub dead_lettered: u64,
    pub dead_letters_dropped: u64,
}

/// Point-in-time view served by `GET /metrics`
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub scores_total: u64,
    pub scoring_timeouts: u64,
    pub throughput: f64,
    pub latency: LatencyStats,
    pub failures_by_kind: BTreeMap<String, u64>,
    pub tiers: BTreeMap<RiskTier, u64>,
    pub model_calls: BTreeMap<String, u64>,
    pub score_distribution: [u64; 10],
    pub events: EventCounters,
    pub alerts_dropped: u64,
}

/// Periodic metrics summary logger
pub struct MetricsReporter {
    metrics: Arc<ServiceMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<ServiceMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = ServiceMetrics::new();

        metrics.record_score("v1", Duration::from_micros(100), 0.25, RiskTier::Low);
        metrics.record_score("v1", Duration::from_micros(300), 0.95, RiskTier::Critical);
        metrics.record_failure("scoring_timeout", Duration::from_millis(100));
        metrics.record_failure("schema_mismatch", Duration::from_micros(50));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.scores_total, 2);
        assert_eq!(snapshot.scoring_timeouts, 1);
        assert_eq!(snapshot.failures_by_kind["schema_mismatch"], 1);
        assert_eq!(snapshot.tiers[&RiskTier::Critical], 1);
        assert_eq!(snapshot.tiers[&RiskTier::High], 0);
        assert_eq!(snapshot.model_calls["v1"], 2);
        assert_eq!(snapshot.score_distribution[2], 1);
        assert_eq!(snapshot.score_distribution[9], 1);
    }

    #[test]
    fn test_latency_percentiles() {
        let metrics = ServiceMetrics::new();
        for us in 1..=100 {
            metrics.record_score("v1", Duration::from_micros(us), 0.5, RiskTier::Medium);
        }

        let stats = metrics.get_latency_stats();
        assert_eq!(stats.count, 100);
        assert_eq!(stats.p50_us, 51);
        assert_eq!(stats.p99_us, 100);
        assert_eq!(stats.max_us, 100);
    }

    #[test]
    fn test_ingest_counters() {
        let metrics = ServiceMetrics::new();
        metrics.record_ingest(IngestOutcome::Applied);
        metrics.record_ingest(IngestOutcome::Applied);
        metrics.record_ingest(IngestOutcome::Duplicate);
        metrics.record_ingest(IngestOutcome::DeadLettered);

        let events = metrics.snapshot().events;
        assert_eq!(events.applied, 2);
        assert_eq!(events.duplicate, 1);
        assert_eq!(events.dead_lettered, 1);
    }
}
