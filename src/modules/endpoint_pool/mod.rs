//! Outbound endpoint pool with health tracking.
//!
//! Tracks success/failure per egress path, applies exponential cooldowns to
//! failing endpoints, retires endpoints that keep failing or outlive their
//! lease, and selects the least-recently-used healthy path with a preference
//! for residential proxies over datacenter proxies over direct egress.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of outbound path. Direct egress is the most exposed to blocking, so
/// selection prefers the proxied kinds when several endpoints are healthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    Direct,
    DatacenterProxy,
    ResidentialProxy,
}

impl TransportKind {
    /// Lower rank is preferred.
    fn preference_rank(self) -> u8 {
        match self {
            TransportKind::ResidentialProxy => 0,
            TransportKind::DatacenterProxy => 1,
            TransportKind::Direct => 2,
        }
    }
}

/// Public descriptor of one outbound path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub kind: TransportKind,
    /// Geographic tag, e.g. an ISO country code.
    pub geo: Option<String>,
    /// Proxy URL for proxied kinds, `None` for direct egress.
    pub proxy_url: Option<String>,
}

impl Endpoint {
    pub fn direct(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: TransportKind::Direct,
            geo: None,
            proxy_url: None,
        }
    }

    pub fn datacenter(id: impl Into<String>, proxy_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: TransportKind::DatacenterProxy,
            geo: None,
            proxy_url: Some(proxy_url.into()),
        }
    }

    pub fn residential(id: impl Into<String>, proxy_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: TransportKind::ResidentialProxy,
            geo: None,
            proxy_url: Some(proxy_url.into()),
        }
    }

    pub fn with_geo(mut self, geo: impl Into<String>) -> Self {
        self.geo = Some(geo.into());
        self
    }
}

/// Outcome reported back after using an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    Success,
    Failure,
}

/// Pool tuning knobs. The numeric defaults are starting points, not
/// invariants; operators tune them against the live target.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Consecutive failures before an endpoint enters cooldown.
    pub failure_streak_threshold: u32,
    /// First cooldown duration; doubles on each subsequent cooldown.
    pub cooldown_base: Duration,
    pub cooldown_max: Duration,
    /// Lifetime failures before an endpoint is retired permanently.
    pub retire_after_failures: u64,
    /// Endpoints older than this are retired on the next `refresh`.
    pub max_lease: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            failure_streak_threshold: 3,
            cooldown_base: Duration::from_secs(30),
            cooldown_max: Duration::from_secs(900),
            retire_after_failures: 12,
            max_lease: Duration::from_secs(6 * 3600),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EndpointStats {
    pub successes: u64,
    pub failures: u64,
    pub failure_streak: u32,
    pub cooldowns_served: u32,
}

#[derive(Debug)]
struct EndpointEntry {
    descriptor: Endpoint,
    stats: EndpointStats,
    created_at: Instant,
    last_used: Option<Instant>,
    cooldown_until: Option<Instant>,
    retired: bool,
}

impl EndpointEntry {
    fn new(descriptor: Endpoint) -> Self {
        Self {
            descriptor,
            stats: EndpointStats::default(),
            created_at: Instant::now(),
            last_used: None,
            cooldown_until: None,
            retired: false,
        }
    }

    fn is_selectable(&self, now: Instant) -> bool {
        !self.retired && self.cooldown_until.is_none_or(|until| until <= now)
    }
}

/// Source of replacement endpoints consulted by `refresh`.
pub trait EndpointSource: Send + Sync {
    fn endpoints(&self) -> Vec<Endpoint>;
}

/// Fixed seed list, the common case for configured proxy inventories.
#[derive(Debug, Clone)]
pub struct StaticEndpointSource(pub Vec<Endpoint>);

impl EndpointSource for StaticEndpointSource {
    fn endpoints(&self) -> Vec<Endpoint> {
        self.0.clone()
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    /// No healthy endpoint of an acceptable kind. The escalation controller
    /// treats this as "cannot proceed at this tier".
    #[error("endpoint pool exhausted for kinds {0:?}")]
    Exhausted(Vec<TransportKind>),
}

/// Pool-level health snapshot.
#[derive(Debug, Clone)]
pub struct PoolHealthReport {
    pub total: usize,
    pub selectable: usize,
    pub cooling: usize,
    pub retired: usize,
    pub details: HashMap<String, EndpointStats>,
}

/// Owner of the outbound paths. Not internally locked; the engine wraps it
/// in a mutex and never holds the lock across a network call.
#[derive(Debug)]
pub struct EndpointPool {
    config: PoolConfig,
    entries: Vec<EndpointEntry>,
    sources: Vec<StaticEndpointSource>,
}

impl EndpointPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
            sources: Vec::new(),
        }
    }

    pub fn add_source(&mut self, source: StaticEndpointSource) {
        for endpoint in source.endpoints() {
            self.add_endpoint(endpoint);
        }
        self.sources.push(source);
    }

    pub fn add_endpoint(&mut self, endpoint: Endpoint) {
        if self
            .entries
            .iter()
            .any(|entry| entry.descriptor.id == endpoint.id)
        {
            return;
        }
        self.entries.push(EndpointEntry::new(endpoint));
    }

    /// Select the least-recently-used healthy endpoint among the requested
    /// kinds, preferring residential over datacenter over direct.
    pub fn acquire(&mut self, kinds: &[TransportKind]) -> Result<Endpoint, PoolError> {
        let now = Instant::now();
        let selected = self
            .entries
            .iter_mut()
            .filter(|entry| {
                kinds.contains(&entry.descriptor.kind) && entry.is_selectable(now)
            })
            .min_by_key(|entry| {
                (
                    entry.descriptor.kind.preference_rank(),
                    // Never-used entries sort first, then oldest use first.
                    entry.last_used.map_or(Duration::ZERO, |ts| {
                        Duration::MAX - now.saturating_duration_since(ts)
                    }),
                )
            });

        match selected {
            Some(entry) => {
                entry.last_used = Some(now);
                Ok(entry.descriptor.clone())
            }
            None => Err(PoolError::Exhausted(kinds.to_vec())),
        }
    }

    /// Update rolling counters after an attempt. A success clears the
    /// failure streak; reaching the streak threshold starts an
    /// exponential-backoff cooldown; crossing the lifetime failure
    /// threshold retires the endpoint for good. Returns `true` when this
    /// report retired the endpoint.
    pub fn report(&mut self, endpoint_id: &str, outcome: ReportOutcome) -> bool {
        let config = self.config.clone();
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.descriptor.id == endpoint_id)
        else {
            return false;
        };

        match outcome {
            ReportOutcome::Success => {
                entry.stats.successes += 1;
                entry.stats.failure_streak = 0;
                entry.cooldown_until = None;
            }
            ReportOutcome::Failure => {
                entry.stats.failures += 1;
                entry.stats.failure_streak += 1;

                if entry.stats.failures >= config.retire_after_failures {
                    entry.retired = true;
                    log::info!("endpoint {} retired after {} failures", endpoint_id, entry.stats.failures);
                    return true;
                }

                if entry.stats.failure_streak >= config.failure_streak_threshold {
                    let exponent = entry.stats.cooldowns_served.min(5);
                    let cooldown = config
                        .cooldown_base
                        .saturating_mul(1u32 << exponent)
                        .min(config.cooldown_max);
                    entry.cooldown_until = Some(Instant::now() + cooldown);
                    entry.stats.cooldowns_served += 1;
                    entry.stats.failure_streak = 0;
                    log::debug!("endpoint {} cooling down for {:?}", endpoint_id, cooldown);
                }
            }
        }

        false
    }

    /// Drop retired and lease-expired endpoints, then pull replacements
    /// from the configured sources.
    pub fn refresh(&mut self) {
        let now = Instant::now();
        let max_lease = self.config.max_lease;
        self.entries.retain(|entry| {
            !entry.retired && now.saturating_duration_since(entry.created_at) < max_lease
        });

        let sources = self.sources.clone();
        for source in &sources {
            for endpoint in source.endpoints() {
                self.add_endpoint(endpoint);
            }
        }
    }

    pub fn health_report(&self) -> PoolHealthReport {
        let now = Instant::now();
        let mut selectable = 0;
        let mut cooling = 0;
        let mut retired = 0;
        let mut details = HashMap::new();

        for entry in &self.entries {
            if entry.retired {
                retired += 1;
            } else if entry.is_selectable(now) {
                selectable += 1;
            } else {
                cooling += 1;
            }
            details.insert(entry.descriptor.id.clone(), entry.stats.clone());
        }

        PoolHealthReport {
            total: self.entries.len(),
            selectable,
            cooling,
            retired,
            details,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for EndpointPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(endpoints: Vec<Endpoint>) -> EndpointPool {
        let mut pool = EndpointPool::default();
        for endpoint in endpoints {
            pool.add_endpoint(endpoint);
        }
        pool
    }

    #[test]
    fn prefers_residential_over_datacenter_over_direct() {
        let mut pool = pool_with(vec![
            Endpoint::direct("direct-1"),
            Endpoint::datacenter("dc-1", "http://10.0.0.1:8080"),
            Endpoint::residential("res-1", "http://10.0.0.2:8080"),
        ]);

        let all = [
            TransportKind::Direct,
            TransportKind::DatacenterProxy,
            TransportKind::ResidentialProxy,
        ];
        let endpoint = pool.acquire(&all).unwrap();
        assert_eq!(endpoint.id, "res-1");
    }

    #[test]
    fn rotates_least_recently_used_within_kind() {
        let mut pool = pool_with(vec![
            Endpoint::residential("res-1", "http://10.0.0.1:8080"),
            Endpoint::residential("res-2", "http://10.0.0.2:8080"),
        ]);

        let kinds = [TransportKind::ResidentialProxy];
        let first = pool.acquire(&kinds).unwrap();
        let second = pool.acquire(&kinds).unwrap();
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn three_consecutive_failures_trigger_cooldown() {
        let mut pool = pool_with(vec![Endpoint::direct("direct-1")]);
        let kinds = [TransportKind::Direct];

        for _ in 0..3 {
            pool.report("direct-1", ReportOutcome::Failure);
        }

        assert!(matches!(
            pool.acquire(&kinds),
            Err(PoolError::Exhausted(_))
        ));
        let report = pool.health_report();
        assert_eq!(report.cooling, 1);
    }

    #[test]
    fn cooled_endpoint_becomes_selectable_after_window() {
        let mut pool = EndpointPool::new(PoolConfig {
            cooldown_base: Duration::from_millis(20),
            ..PoolConfig::default()
        });
        pool.add_endpoint(Endpoint::direct("direct-1"));
        let kinds = [TransportKind::Direct];

        for _ in 0..3 {
            pool.report("direct-1", ReportOutcome::Failure);
        }
        assert!(pool.acquire(&kinds).is_err());

        std::thread::sleep(Duration::from_millis(30));
        assert!(pool.acquire(&kinds).is_ok());
    }

    #[test]
    fn success_resets_failure_streak() {
        let mut pool = pool_with(vec![Endpoint::direct("direct-1")]);
        pool.report("direct-1", ReportOutcome::Failure);
        pool.report("direct-1", ReportOutcome::Failure);
        pool.report("direct-1", ReportOutcome::Success);
        pool.report("direct-1", ReportOutcome::Failure);
        pool.report("direct-1", ReportOutcome::Failure);

        // Never hit three in a row, so still selectable.
        assert!(pool.acquire(&[TransportKind::Direct]).is_ok());
    }

    #[test]
    fn report_flags_only_the_retiring_failure() {
        let mut pool = EndpointPool::new(PoolConfig {
            retire_after_failures: 3,
            ..PoolConfig::default()
        });
        pool.add_endpoint(Endpoint::direct("direct-1"));

        assert!(!pool.report("direct-1", ReportOutcome::Failure));
        assert!(!pool.report("direct-1", ReportOutcome::Success));
        assert!(!pool.report("direct-1", ReportOutcome::Failure));
        assert!(!pool.report("missing", ReportOutcome::Failure));
        assert!(pool.report("direct-1", ReportOutcome::Failure));
    }

    #[test]
    fn retired_endpoints_are_dropped_on_refresh_and_never_revived() {
        let mut pool = EndpointPool::new(PoolConfig {
            retire_after_failures: 2,
            ..PoolConfig::default()
        });
        pool.add_endpoint(Endpoint::direct("direct-1"));

        pool.report("direct-1", ReportOutcome::Failure);
        pool.report("direct-1", ReportOutcome::Failure);

        assert!(pool.acquire(&[TransportKind::Direct]).is_err());
        pool.refresh();
        assert!(pool.is_empty());
    }

    #[test]
    fn refresh_pulls_replacements_from_sources() {
        let mut pool = EndpointPool::new(PoolConfig {
            retire_after_failures: 1,
            ..PoolConfig::default()
        });
        pool.add_source(StaticEndpointSource(vec![
            Endpoint::datacenter("dc-1", "http://10.0.0.1:8080"),
        ]));

        pool.report("dc-1", ReportOutcome::Failure);
        pool.refresh();

        // The seed source re-supplies the endpoint as a fresh entry.
        assert_eq!(pool.len(), 1);
        assert!(pool.acquire(&[TransportKind::DatacenterProxy]).is_ok());
    }
}
