//! Human-plausible delay generation for multi-step interactions.
//!
//! Each interaction step draws from its own delay envelope; repeated errors
//! and rapid consecutive requests inflate the draw superlinearly, modelling
//! a cautious human slowing down rather than a bot hammering through.

use std::time::Duration;

use rand::Rng;

/// Interaction step being simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractionStep {
    Typing,
    PageRead,
    Navigation,
}

/// Rolling context of the session the step belongs to.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacingContext {
    /// Requests issued back-to-back without a natural pause.
    pub consecutive_requests: u32,
    /// Errors observed on this session so far.
    pub recent_errors: u32,
}

/// Delay envelopes per step plus the caution curve.
#[derive(Debug, Clone)]
pub struct TimingConfig {
    pub typing_range: (Duration, Duration),
    pub page_read_range: (Duration, Duration),
    pub navigation_range: (Duration, Duration),
    /// Consecutive requests tolerated before the caution multiplier kicks in.
    pub burst_tolerance: u32,
    /// Exponent applied to the error count; > 1 makes growth superlinear.
    pub caution_exponent: f64,
    /// No computed delay ever exceeds this, so a pathological context can
    /// never stall a query indefinitely.
    pub ceiling: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            typing_range: (Duration::from_millis(600), Duration::from_millis(2_400)),
            page_read_range: (Duration::from_millis(1_800), Duration::from_millis(7_000)),
            navigation_range: (Duration::from_millis(400), Duration::from_millis(1_600)),
            burst_tolerance: 3,
            caution_exponent: 1.6,
            ceiling: Duration::from_secs(25),
        }
    }
}

/// Generates delays for the escalation controller.
#[derive(Debug, Clone)]
pub struct BehavioralTiming {
    config: TimingConfig,
}

impl BehavioralTiming {
    pub fn new(config: TimingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TimingConfig {
        &self.config
    }

    /// Draw a delay for one interaction step under the given context.
    pub fn delay_for(&self, step: InteractionStep, ctx: &PacingContext) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(step, ctx, &mut rng)
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(
        &self,
        step: InteractionStep,
        ctx: &PacingContext,
        rng: &mut R,
    ) -> Duration {
        let (min, max) = match step {
            InteractionStep::Typing => self.config.typing_range,
            InteractionStep::PageRead => self.config.page_read_range,
            InteractionStep::Navigation => self.config.navigation_range,
        };
        let mut delay = rng.gen_range(min.as_secs_f64()..=max.as_secs_f64().max(min.as_secs_f64()));

        // Caution after errors: grows faster than linearly with the streak.
        if ctx.recent_errors > 0 {
            delay *= 1.0 + f64::from(ctx.recent_errors).powf(self.config.caution_exponent) * 0.5;
        }

        // A burst of back-to-back requests also slows the pace down.
        if ctx.consecutive_requests > self.config.burst_tolerance {
            let excess = f64::from(ctx.consecutive_requests - self.config.burst_tolerance);
            delay *= 1.0 + excess.powf(1.4) * 0.3;
        }

        Duration::from_secs_f64(delay.min(self.config.ceiling.as_secs_f64()))
    }
}

impl Default for BehavioralTiming {
    fn default() -> Self {
        Self::new(TimingConfig::default())
    }
}
