//! Metrics collection utilities.
//!
//! Aggregated global and per-tier statistics with latency percentiles, so
//! operators can see where queries resolve and how much each escalation
//! level costs.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::escalation::Tier;

/// Aggregated metrics across all tiers.
#[derive(Debug, Clone)]
pub struct GlobalStats {
    pub started_at: DateTime<Utc>,
    pub total_attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub queries_finished: u64,
    pub queries_exhausted: u64,
    pub average_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
}

impl Default for GlobalStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            total_attempts: 0,
            successes: 0,
            failures: 0,
            queries_finished: 0,
            queries_exhausted: 0,
            average_latency: None,
            p95_latency: None,
        }
    }
}

/// Tier-scoped metrics snapshot.
#[derive(Debug, Clone)]
pub struct TierStats {
    pub tier: Tier,
    pub total_attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub average_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
}

impl TierStats {
    fn from_accumulator(tier: Tier, acc: &TierAccumulator) -> Self {
        let (avg, p95) = acc.latency_stats();
        Self {
            tier,
            total_attempts: acc.total_attempts,
            successes: acc.successes,
            failures: acc.failures,
            average_latency: avg,
            p95_latency: p95,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub global: GlobalStats,
    pub tiers: Vec<TierStats>,
}

#[derive(Debug)]
struct TierAccumulator {
    total_attempts: u64,
    successes: u64,
    failures: u64,
    latencies: VecDeque<Duration>,
    max_window: usize,
}

impl TierAccumulator {
    fn new(max_window: usize) -> Self {
        Self {
            total_attempts: 0,
            successes: 0,
            failures: 0,
            latencies: VecDeque::with_capacity(max_window),
            max_window,
        }
    }

    fn record(&mut self, success: bool, latency: Duration) {
        self.total_attempts += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        if self.latencies.len() == self.max_window {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
    }

    fn latency_stats(&self) -> (Option<Duration>, Option<Duration>) {
        if self.latencies.is_empty() {
            return (None, None);
        }
        let mut samples: Vec<_> = self.latencies.iter().cloned().collect();
        samples.sort_unstable();
        let avg = samples.iter().map(|d| d.as_secs_f64()).sum::<f64>() / samples.len() as f64;
        let p95_index = ((samples.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
        (Some(Duration::from_secs_f64(avg)), Some(samples[p95_index]))
    }
}

#[derive(Debug)]
struct MetricsState {
    global: GlobalStats,
    max_window: usize,
    tiers: HashMap<Tier, TierAccumulator>,
}

impl MetricsState {
    fn new(max_window: usize) -> Self {
        Self {
            global: GlobalStats::default(),
            max_window,
            tiers: HashMap::new(),
        }
    }

    fn accumulator_mut(&mut self, tier: Tier) -> &mut TierAccumulator {
        self.tiers
            .entry(tier)
            .or_insert_with(|| TierAccumulator::new(self.max_window))
    }
}

/// Thread-safe metrics collector shared across concurrent queries.
#[derive(Clone, Debug)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsState::new(128))),
        }
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsState::new(window.max(16)))),
        }
    }

    pub fn record_attempt(&self, tier: Tier, success: bool, latency: Duration) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.global.total_attempts += 1;
        if success {
            guard.global.successes += 1;
        } else {
            guard.global.failures += 1;
        }

        if let Some(avg) = guard.global.average_latency {
            let blended = (avg.as_secs_f64() * 0.9) + (latency.as_secs_f64() * 0.1);
            guard.global.average_latency = Some(Duration::from_secs_f64(blended));
        } else {
            guard.global.average_latency = Some(latency);
        }

        guard.accumulator_mut(tier).record(success, latency);

        let mut percentile_samples: Vec<_> = guard
            .tiers
            .values()
            .flat_map(|tier| tier.latencies.iter())
            .cloned()
            .collect();
        percentile_samples.sort_unstable();
        if !percentile_samples.is_empty() {
            let idx = ((percentile_samples.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
            guard.global.p95_latency = Some(percentile_samples[idx]);
        }
    }

    pub fn record_query_finished(&self, exhausted: bool) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.global.queries_finished += 1;
        if exhausted {
            guard.global.queries_exhausted += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let guard = self.inner.lock().expect("metrics lock poisoned");
        let mut tiers: Vec<_> = guard
            .tiers
            .iter()
            .map(|(tier, acc)| TierStats::from_accumulator(*tier, acc))
            .collect();
        tiers.sort_by_key(|stats| stats.tier as u8);
        MetricsSnapshot {
            global: guard.global.clone(),
            tiers,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn records_attempts_per_tier() {
        let metrics = MetricsCollector::new();
        metrics.record_attempt(Tier::Direct, false, Duration::from_millis(150));
        metrics.record_attempt(Tier::ProxiedHttp, true, Duration::from_millis(800));
        metrics.record_query_finished(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.global.total_attempts, 2);
        assert_eq!(snapshot.global.successes, 1);
        assert_eq!(snapshot.global.queries_finished, 1);

        let direct = snapshot
            .tiers
            .iter()
            .find(|stats| stats.tier == Tier::Direct)
            .unwrap();
        assert_eq!(direct.failures, 1);
        assert_eq!(direct.successes, 0);
    }

    #[test]
    fn latency_window_is_bounded() {
        let metrics = MetricsCollector::with_window(16);
        for i in 0..100 {
            metrics.record_attempt(Tier::Direct, true, Duration::from_millis(i));
        }
        let snapshot = metrics.snapshot();
        let direct = &snapshot.tiers[0];
        assert_eq!(direct.total_attempts, 100);
        // Percentiles come from the bounded window, so they track recent
        // attempts rather than the whole history.
        assert!(direct.p95_latency.unwrap() >= Duration::from_millis(84));
    }
}
