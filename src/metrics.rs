//! Performance metrics and statistics tracking for the risk scoring pipeline.

use crate::error::FailureStage;
use crate::types::prediction::Decision;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

const MAX_LATENCY_SAMPLES: usize = 10_000;

/// Metrics collector for pipeline performance
pub struct PipelineMetrics {
    /// Successful assessments
    pub assessments: AtomicU64,
    /// Assessments whose optimized decision differs from the scorer's
    pub overrides: AtomicU64,
    /// Failed assessments
    pub failures: AtomicU64,
    decisions: RwLock<HashMap<Decision, u64>>,
    failures_by_stage: RwLock<HashMap<FailureStage, u64>>,
    /// Processing times (in microseconds)
    processing_times: RwLock<Vec<u64>>,
    /// Risk score distribution buckets
    score_buckets: RwLock<[u64; 10]>,
    start_time: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            assessments: AtomicU64::new(0),
            overrides: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            decisions: RwLock::new(HashMap::new()),
            failures_by_stage: RwLock::new(HashMap::new()),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            score_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    /// Record a completed assessment
    pub fn record_assessment(
        &self,
        processing_time: Duration,
        risk_score: u8,
        decision: Decision,
        overridden: bool,
    ) {
        self.assessments.fetch_add(1, Ordering::Relaxed);
        if overridden {
            self.overrides.fetch_add(1, Ordering::Relaxed);
        }

        if let Ok(mut times) = self.processing_times.write() {
            times.push(processing_time.as_micros() as u64);
            if times.len() > MAX_LATENCY_SAMPLES {
                times.drain(0..MAX_LATENCY_SAMPLES / 2);
            }
        }

        if let Ok(mut decisions) = self.decisions.write() {
            *decisions.entry(decision).or_insert(0) += 1;
        }

        let bucket = (risk_score as usize / 10).min(9);
        if let Ok(mut buckets) = self.score_buckets.write() {
            buckets[bucket] += 1;
        }
    }

    /// Record a failed assessment
    pub fn record_failure(&self, stage: FailureStage) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut by_stage) = self.failures_by_stage.write() {
            *by_stage.entry(stage).or_insert(0) += 1;
        }
    }

    /// Get processing time statistics
    pub fn get_processing_stats(&self) -> ProcessingStats {
        let mut sorted: Vec<u64> = match self.processing_times.read() {
            Ok(times) if !times.is_empty() => times.clone(),
            _ => return ProcessingStats::default(),
        };
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();
        let at = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: at(0.95),
            p99_us: at(0.99),
            max_us: sorted[count - 1],
        }
    }

    /// Get current throughput (assessments per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.assessments.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn get_score_distribution(&self) -> [u64; 10] {
        self.score_buckets.read().map(|b| *b).unwrap_or([0; 10])
    }

    pub fn get_decisions(&self) -> HashMap<Decision, u64> {
        self.decisions.read().map(|d| d.clone()).unwrap_or_default()
    }

    pub fn get_failures_by_stage(&self) -> HashMap<FailureStage, u64> {
        self.failures_by_stage
            .read()
            .map(|f| f.clone())
            .unwrap_or_default()
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let count = self.assessments.load(Ordering::Relaxed);
        let overrides = self.overrides.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let override_rate = if count > 0 {
            (overrides as f64 / count as f64) * 100.0
        } else {
            0.0
        };

        let processing = self.get_processing_stats();
        let throughput = self.get_throughput();
        let decisions = self.get_decisions();
        let failures_by_stage = self.get_failures_by_stage();
        let score_dist = self.get_score_distribution();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║          RISK SCORING PIPELINE - METRICS SUMMARY             ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Assessments:  {:>8}  │  Throughput: {:>6.1} tx/s           ║",
            count, throughput
        );
        info!(
            "║ Overrides:    {:>8}  │  Override Rate: {:>5.1}%             ║",
            overrides, override_rate
        );
        info!("║ Failures:     {:>8}                                       ║", failures);
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Processing Time (μs): mean={:>5} p50={:>5} p95={:>5} p99={:>5} ║",
            processing.mean_us, processing.p50_us, processing.p95_us, processing.p99_us
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Final Decisions:                                             ║");
        for decision in [Decision::Approve, Decision::Review, Decision::Decline] {
            let n = decisions.get(&decision).copied().unwrap_or(0);
            let pct = if count > 0 {
                (n as f64 / count as f64) * 100.0
            } else {
                0.0
            };
            info!("║   {:10}: {:>6} ({:>5.1}%)                                ║", decision, n, pct);
        }
        if !failures_by_stage.is_empty() {
            info!("╠══════════════════════════════════════════════════════════════╣");
            info!("║ Failures by Stage:                                           ║");
            for (stage, n) in &failures_by_stage {
                info!("║   {:18}: {:>6}                                 ║", stage.as_str(), n);
            }
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Risk Score Distribution:                                     ║");
        let total: u64 = score_dist.iter().sum();
        for (i, &n) in score_dist.iter().enumerate() {
            let pct = if total > 0 { (n as f64 / total as f64) * 100.0 } else { 0.0 };
            let bar: String = "█".repeat(((pct / 2.0) as usize).min(20));
            info!("║   {:>2}-{:<3}: {:>6} ({:>5.1}%) {}", i * 10, (i + 1) * 10, n, pct, bar);
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
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Prints a metrics summary at a fixed interval
pub struct MetricsReporter {
    metrics: Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs: interval_secs.max(1),
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
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
        let metrics = PipelineMetrics::new();

        metrics.record_assessment(Duration::from_micros(100), 12, Decision::Approve, false);
        metrics.record_assessment(Duration::from_micros(300), 100, Decision::Approve, true);
        metrics.record_failure(FailureStage::Validation);

        assert_eq!(metrics.assessments.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.overrides.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.failures.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.get_decisions().get(&Decision::Approve), Some(&2));
        assert_eq!(
            metrics.get_failures_by_stage().get(&FailureStage::Validation),
            Some(&1)
        );

        let dist = metrics.get_score_distribution();
        assert_eq!(dist[1], 1);
        assert_eq!(dist[9], 1);
    }

    #[test]
    fn test_processing_stats() {
        let metrics = PipelineMetrics::new();
        assert_eq!(metrics.get_processing_stats().count, 0);

        for us in [100, 200, 300, 400] {
            metrics.record_assessment(Duration::from_micros(us), 10, Decision::Review, false);
        }
        let stats = metrics.get_processing_stats();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.mean_us, 250);
        assert_eq!(stats.p50_us, 300);
        assert_eq!(stats.p99_us, 400);
        assert_eq!(stats.max_us, 400);
    }
}
