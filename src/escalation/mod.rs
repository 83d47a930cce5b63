//! Escalation state machine.
//!
//! A query walks through transport tiers from cheapest to most human-like.
//! The transition logic is a pure function over [`AttemptState`] so it can be
//! tested without any network I/O; the async driver lives in
//! [`controller`].

pub mod controller;
pub mod detectors;
pub mod transports;

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One escalation level. Ordered from cheapest to most expensive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    Direct,
    ProxiedHttp,
    BrowserAutomated,
}

impl Tier {
    /// The tier a blocked request escalates to, if any.
    pub fn next(self) -> Option<Tier> {
        match self {
            Tier::Direct => Some(Tier::ProxiedHttp),
            Tier::ProxiedHttp => Some(Tier::BrowserAutomated),
            Tier::BrowserAutomated => None,
        }
    }

    pub fn is_last(self) -> bool {
        self.next().is_none()
    }

    pub const ALL: [Tier; 3] = [Tier::Direct, Tier::ProxiedHttp, Tier::BrowserAutomated];
}

/// Terminal result of one query's walk through the tiers.
///
/// `Exhausted` is deliberately distinct from `NotFound`: failing to evade
/// detection must never read as a confirmed negative result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    NotFound,
    Exhausted,
    Error,
}

/// Signal classified from one attempt, fed into the transition function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationSignal {
    Success,
    NotFound,
    /// Timeout or connection reset. Retried in place, no tier change.
    TransientNetwork,
    /// Blocking status or block-page signature. Advances the tier.
    Detected,
    /// Interactive verification required. Routed to the solving
    /// collaborator at the browser tier, otherwise advances.
    Challenged,
    /// No healthy endpoint available for this tier.
    PoolExhausted,
}

/// Decision produced by one transition step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDecision {
    /// Try again at the current tier after a jittered backoff.
    RetrySameTier,
    /// Move to the given tier and reset the in-tier attempt counter.
    AdvanceTier(Tier),
    /// The attempt is over.
    Finish(Outcome),
}

/// Per-tier retry budgets and backoff bounds.
#[derive(Debug, Clone)]
pub struct TierPolicy {
    /// Attempts allowed per tier before forced advancement.
    pub direct_attempts: u32,
    pub proxied_attempts: u32,
    pub browser_attempts: u32,
    /// Backoff applied between same-tier retries.
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub backoff_variance_pct: f64,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            direct_attempts: 2,
            proxied_attempts: 3,
            browser_attempts: 2,
            backoff_base: Duration::from_millis(1_500),
            backoff_max: Duration::from_secs(20),
            backoff_variance_pct: 0.25,
        }
    }
}

impl TierPolicy {
    pub fn attempts_for(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Direct => self.direct_attempts,
            Tier::ProxiedHttp => self.proxied_attempts,
            Tier::BrowserAutomated => self.browser_attempts,
        }
    }
}

/// Attempts issued per tier, reported back to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptCounts {
    pub direct: u32,
    pub proxied: u32,
    pub browser: u32,
}

impl AttemptCounts {
    pub fn get(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Direct => self.direct,
            Tier::ProxiedHttp => self.proxied,
            Tier::BrowserAutomated => self.browser,
        }
    }

    fn bump(&mut self, tier: Tier) {
        match tier {
            Tier::Direct => self.direct += 1,
            Tier::ProxiedHttp => self.proxied += 1,
            Tier::BrowserAutomated => self.browser += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.direct + self.proxied + self.browser
    }
}

/// Mutable state of one query's escalation walk.
///
/// Invariant: the tier only ever moves forward. `advance` upholds this by
/// construction; there is no path that assigns an earlier tier.
#[derive(Debug, Clone)]
pub struct AttemptState {
    tier: Tier,
    attempts_in_tier: u32,
    counts: AttemptCounts,
    finished: Option<Outcome>,
}

impl AttemptState {
    /// A fresh query always starts at `Direct`; prior exhaustion elsewhere
    /// never poisons a new walk.
    pub fn new() -> Self {
        Self {
            tier: Tier::Direct,
            attempts_in_tier: 0,
            counts: AttemptCounts::default(),
            finished: None,
        }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn counts(&self) -> AttemptCounts {
        self.counts
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.finished
    }

    /// Record that an attempt is being issued at the current tier.
    pub fn record_attempt(&mut self) {
        self.attempts_in_tier += 1;
        self.counts.bump(self.tier);
    }

    /// Pure transition function: classify the attempt's signal into the next
    /// step. Does not sleep, does not touch the network.
    pub fn advance(&mut self, signal: EscalationSignal, policy: &TierPolicy) -> StepDecision {
        if let Some(outcome) = self.finished {
            return StepDecision::Finish(outcome);
        }

        let budget = policy.attempts_for(self.tier);
        let decision = match signal {
            EscalationSignal::Success => StepDecision::Finish(Outcome::Success),
            EscalationSignal::NotFound => StepDecision::Finish(Outcome::NotFound),
            EscalationSignal::TransientNetwork => {
                if self.attempts_in_tier < budget {
                    StepDecision::RetrySameTier
                } else {
                    self.next_tier_or_exhausted()
                }
            }
            // A block means this tier's disguise is burned; retrying the
            // same shape only feeds the target's classifier.
            EscalationSignal::Detected | EscalationSignal::PoolExhausted => {
                self.next_tier_or_exhausted()
            }
            EscalationSignal::Challenged => {
                if self.tier == Tier::BrowserAutomated {
                    // The controller already routed the challenge to the
                    // solver; an unsolved challenge burns one browser retry.
                    if self.attempts_in_tier < budget {
                        StepDecision::RetrySameTier
                    } else {
                        StepDecision::Finish(Outcome::Exhausted)
                    }
                } else {
                    self.next_tier_or_exhausted()
                }
            }
        };

        match decision {
            StepDecision::AdvanceTier(next) => {
                self.tier = next;
                self.attempts_in_tier = 0;
            }
            StepDecision::Finish(outcome) => {
                self.finished = Some(outcome);
            }
            StepDecision::RetrySameTier => {}
        }

        decision
    }

    /// Force a terminal outcome, used for timeouts and cancellation.
    pub fn finish(&mut self, outcome: Outcome) {
        if self.finished.is_none() {
            self.finished = Some(outcome);
        }
    }

    fn next_tier_or_exhausted(&self) -> StepDecision {
        match self.tier.next() {
            Some(next) => StepDecision::AdvanceTier(next),
            None => StepDecision::Finish(Outcome::Exhausted),
        }
    }
}

impl Default for AttemptState {
    fn default() -> Self {
        Self::new()
    }
}

/// Jittered backoff between same-tier retries, with failure feedback.
#[derive(Debug, Clone)]
pub struct BackoffStrategy {
    base: Duration,
    max: Duration,
    variance_pct: f64,
    streak: u32,
}

impl BackoffStrategy {
    pub fn from_policy(policy: &TierPolicy) -> Self {
        Self {
            base: policy.backoff_base,
            max: policy.backoff_max,
            variance_pct: policy.backoff_variance_pct,
            streak: 0,
        }
    }

    pub fn register_failure(&mut self) {
        self.streak = self.streak.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.streak = 0;
    }

    pub fn next_delay(&self) -> Duration {
        use rand::Rng;

        let mut delay = self.base.as_secs_f64() * f64::from(1u32 << self.streak.min(5));
        let variance = delay * self.variance_pct;
        let jitter = rand::thread_rng().gen_range(-variance..=variance.max(f64::EPSILON));
        delay = (delay + jitter).clamp(0.0, self.max.as_secs_f64());
        Duration::from_secs_f64(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> TierPolicy {
        TierPolicy::default()
    }

    #[test]
    fn detected_walks_forward_through_all_tiers() {
        let mut state = AttemptState::new();
        state.record_attempt();
        assert_eq!(
            state.advance(EscalationSignal::Detected, &policy()),
            StepDecision::AdvanceTier(Tier::ProxiedHttp)
        );
        state.record_attempt();
        assert_eq!(
            state.advance(EscalationSignal::Detected, &policy()),
            StepDecision::AdvanceTier(Tier::BrowserAutomated)
        );
        state.record_attempt();
        assert_eq!(
            state.advance(EscalationSignal::Detected, &policy()),
            StepDecision::Finish(Outcome::Exhausted)
        );
        assert_eq!(
            state.counts(),
            AttemptCounts {
                direct: 1,
                proxied: 1,
                browser: 1
            }
        );
    }

    #[test]
    fn tier_never_regresses() {
        let mut state = AttemptState::new();
        state.record_attempt();
        state.advance(EscalationSignal::Detected, &policy());
        let tier_after_advance = state.tier();

        state.record_attempt();
        state.advance(EscalationSignal::TransientNetwork, &policy());
        assert!(state.tier() >= tier_after_advance);
    }

    #[test]
    fn transient_errors_retry_within_budget_then_escalate() {
        let policy = TierPolicy {
            direct_attempts: 2,
            ..TierPolicy::default()
        };
        let mut state = AttemptState::new();

        state.record_attempt();
        assert_eq!(
            state.advance(EscalationSignal::TransientNetwork, &policy),
            StepDecision::RetrySameTier
        );
        state.record_attempt();
        assert_eq!(
            state.advance(EscalationSignal::TransientNetwork, &policy),
            StepDecision::AdvanceTier(Tier::ProxiedHttp)
        );
    }

    #[test]
    fn walk_terminates_within_retry_budgets() {
        let policy = TierPolicy::default();
        let mut state = AttemptState::new();
        let mut steps = 0u32;

        loop {
            state.record_attempt();
            match state.advance(EscalationSignal::TransientNetwork, &policy) {
                StepDecision::Finish(outcome) => {
                    assert_eq!(outcome, Outcome::Exhausted);
                    break;
                }
                _ => {
                    steps += 1;
                    let bound = policy.direct_attempts
                        + policy.proxied_attempts
                        + policy.browser_attempts;
                    assert!(steps <= bound, "walk exceeded configured budgets");
                }
            }
        }
    }

    #[test]
    fn challenge_below_browser_tier_escalates() {
        let mut state = AttemptState::new();
        state.record_attempt();
        assert_eq!(
            state.advance(EscalationSignal::Challenged, &policy()),
            StepDecision::AdvanceTier(Tier::ProxiedHttp)
        );
    }

    #[test]
    fn pool_exhaustion_at_last_tier_is_exhausted_not_error() {
        let mut state = AttemptState::new();
        state.record_attempt();
        state.advance(EscalationSignal::PoolExhausted, &policy());
        state.record_attempt();
        state.advance(EscalationSignal::PoolExhausted, &policy());
        state.record_attempt();
        assert_eq!(
            state.advance(EscalationSignal::PoolExhausted, &policy()),
            StepDecision::Finish(Outcome::Exhausted)
        );
    }

    #[test]
    fn backoff_grows_with_failures_and_stays_bounded() {
        let mut backoff = BackoffStrategy::from_policy(&TierPolicy::default());
        let first = backoff.next_delay();
        backoff.register_failure();
        backoff.register_failure();
        let later = backoff.next_delay();
        assert!(later >= first / 2);
        assert!(later <= TierPolicy::default().backoff_max);
    }
}
