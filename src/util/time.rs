//! Time utilities for the simulation clock

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Number of whole ticks needed to cover `duration` at `rate_hz`, rounded up.
/// Saturates at `u64::MAX` for durations no tick count can cover.
pub fn ticks_for(duration: Duration, rate_hz: u32) -> u64 {
    let scaled = duration.as_micros().saturating_mul(u128::from(rate_hz));
    u64::try_from(scaled.div_ceil(1_000_000)).unwrap_or(u64::MAX)
}

/// Fixed-timestep accumulator.
///
/// Wall-clock time goes in, whole simulation steps of exactly `step` come
/// out. The remainder carries over to the next call, so a late wake-up
/// produces extra steps instead of a longer one.
#[derive(Debug, Clone)]
pub struct FixedStep {
    step: Duration,
    accumulated: Duration,
}

impl FixedStep {
    pub fn new(rate_hz: u32) -> Self {
        Self {
            step: Duration::from_micros(1_000_000 / rate_hz.max(1) as u64),
            accumulated: Duration::ZERO,
        }
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    /// Feed elapsed wall-clock time, returns how many steps to run now.
    pub fn advance(&mut self, elapsed: Duration) -> u32 {
        self.accumulated += elapsed;
        let mut steps = 0;
        while self.accumulated >= self.step {
            self.accumulated -= self.step;
            steps += 1;
        }
        steps
    }
}

/// A simple timer for measuring durations
#[derive(Debug, Clone)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
