//! Fixed-rate session tick scheduler for Shardlink.
//!
//! The session core is tick-driven: once per simulation step something has
//! to call `SessionDispatcher::tick(now)`. This crate provides the clock for
//! that: a scheduler that wakes at a fixed rate (1–128 Hz) and hands back
//! the session-relative time in seconds.
//!
//! # Integration
//!
//! The scheduler is designed to sit inside a `tokio::select!` loop next to
//! a shutdown signal:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         _ = shutdown.changed() => break,
//!         info = scheduler.wait_for_tick() => {
//!             dispatcher.tick(info.now);
//!             scheduler.record_tick_end();
//!         }
//!     }
//! }
//! ```
//!
//! # Overruns
//!
//! If a tick fires late (the previous step took too long, or the runtime was
//! busy), missed ticks are skipped and the cadence restarts from "now". The
//! session core only needs monotonic time, never a fixed number of steps,
//! so catching up would just burn CPU.

use std::time::{Duration, Instant};

use rand::Rng;
use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the tick scheduler.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Tick rate in Hz, `1..=128`. Default: 30.
    pub tick_rate_hz: u32,
    /// Budget warning threshold (0.0–1.0). Default: 0.80 (80%).
    /// A tracing warning is emitted when one step takes longer than this
    /// fraction of the tick period.
    pub budget_warn_threshold: f64,
    /// Random jitter (0–max µs) added to the *first* tick, so several
    /// sessions started at the same instant don't tick in lockstep.
    pub initial_jitter_us: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 30,
            budget_warn_threshold: 0.80,
            initial_jitter_us: 2_000, // 0–2 ms default jitter
        }
    }
}

impl TickConfig {
    /// Minimum supported tick rate.
    pub const MIN_TICK_RATE_HZ: u32 = 1;
    /// Maximum supported tick rate.
    pub const MAX_TICK_RATE_HZ: u32 = 128;

    /// Create a config for a specific tick rate with default settings.
    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self {
            tick_rate_hz,
            ..Default::default()
        }
    }

    /// Clamp any out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`TickScheduler::new`]. Rules:
    /// - `tick_rate_hz` clamped to `1..=128`.
    /// - `budget_warn_threshold` clamped to `0.0..=1.0`.
    pub fn validated(mut self) -> Self {
        let clamped = self
            .tick_rate_hz
            .clamp(Self::MIN_TICK_RATE_HZ, Self::MAX_TICK_RATE_HZ);
        if clamped != self.tick_rate_hz {
            warn!(
                rate = self.tick_rate_hz,
                min = Self::MIN_TICK_RATE_HZ,
                max = Self::MAX_TICK_RATE_HZ,
                "tick_rate_hz out of range, clamping"
            );
            self.tick_rate_hz = clamped;
        }
        self.budget_warn_threshold = self.budget_warn_threshold.clamp(0.0, 1.0);
        self
    }

    /// Duration of a single tick.
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate_hz.max(1)))
    }
}

// ---------------------------------------------------------------------------
// Tick info (returned to caller each tick)
// ---------------------------------------------------------------------------

/// Information about one tick, returned by [`TickScheduler::wait_for_tick`].
#[derive(Debug, Clone)]
pub struct TickInfo {
    /// Monotonically increasing tick number (starts at 1).
    pub tick: u64,
    /// Session time in seconds: time elapsed since the scheduler was
    /// created. This is the `now` handed to the session core.
    pub now: f64,
    /// Nominal tick period (`1 / tick_rate`).
    pub dt: Duration,
    /// `true` if this tick fired late.
    pub overrun: bool,
    /// How many whole ticks were skipped because of the overrun.
    pub ticks_skipped: u64,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fixed-rate tick scheduler. One per session.
pub struct TickScheduler {
    config: TickConfig,
    tick_duration: Duration,
    tick_count: u64,
    total_overruns: u64,
    /// Origin of session time.
    started: TokioInstant,
    /// When the next tick should fire.
    next_tick: TokioInstant,
    /// Wall-clock instant when the current step started.
    /// Set by `wait_for_tick`, consumed by `record_tick_end`.
    tick_start: Option<Instant>,
}

impl TickScheduler {
    /// Create a new scheduler from config.
    ///
    /// The first tick is scheduled one period out, plus optional jitter.
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let tick_duration = config.tick_duration();

        let jitter = if config.initial_jitter_us > 0 {
            let us = rand::rng().random_range(0..config.initial_jitter_us);
            Duration::from_micros(us)
        } else {
            Duration::ZERO
        };
        let started = TokioInstant::now();

        debug!(
            rate_hz = config.tick_rate_hz,
            budget_ms = tick_duration.as_secs_f64() * 1000.0,
            "tick scheduler created"
        );

        Self {
            config,
            tick_duration,
            tick_count: 0,
            total_overruns: 0,
            started,
            next_tick: started + tick_duration + jitter,
            tick_start: None,
        }
    }

    /// Create a scheduler for a specific tick rate with default settings.
    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self::new(TickConfig::with_rate(tick_rate_hz))
    }

    /// Wait until the next tick is due.
    ///
    /// Cancel-safe: dropping the future (for example when another
    /// `select!` branch wins) leaves the schedule untouched.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let next = self.next_tick;
        time::sleep_until(next).await;

        let now = TokioInstant::now();
        self.tick_count += 1;
        self.tick_start = Some(Instant::now());

        let late_by = now.saturating_duration_since(next);
        let overrun = late_by > self.tick_duration / 10; // >10% late = overrun
        let mut ticks_skipped = 0u64;

        if overrun {
            self.total_overruns += 1;
            ticks_skipped =
                (late_by.as_nanos() / self.tick_duration.as_nanos().max(1)) as u64;
            if ticks_skipped > 0 {
                warn!(
                    tick = self.tick_count,
                    skipped = ticks_skipped,
                    late_ms = late_by.as_secs_f64() * 1000.0,
                    "tick overrun, skipping ahead"
                );
            }
        }
        // Always schedule from now, not from the missed deadline.
        self.next_tick = now + self.tick_duration;

        trace!(tick = self.tick_count, overrun, "tick fired");

        TickInfo {
            tick: self.tick_count,
            now: now.duration_since(self.started).as_secs_f64(),
            dt: self.tick_duration,
            overrun,
            ticks_skipped,
        }
    }

    /// Record that the work for the current tick has finished.
    ///
    /// Emits a warning when the step used more than the configured share of
    /// the tick period. A no-op if no tick is in progress.
    pub fn record_tick_end(&mut self) {
        let Some(start) = self.tick_start.take() else {
            return;
        };
        let elapsed = start.elapsed();
        let utilization = elapsed.as_secs_f64() / self.tick_duration.as_secs_f64();

        if utilization >= self.config.budget_warn_threshold {
            warn!(
                tick = self.tick_count,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = self.tick_duration.as_secs_f64() * 1000.0,
                utilization_pct = format!("{:.1}", utilization * 100.0),
                "session tick approaching budget limit"
            );
        }
    }

    /// Current tick count.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Number of ticks that fired late.
    pub fn total_overruns(&self) -> u64 {
        self.total_overruns
    }

    /// The configured tick rate in Hz.
    pub fn tick_rate_hz(&self) -> u32 {
        self.config.tick_rate_hz
    }

    /// The fixed tick period.
    pub fn tick_duration(&self) -> Duration {
        self.tick_duration
    }
}
