//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Malformed messages tolerated per second before a connection counts as abusive
pub const MALFORMED_RATE_LIMIT: u32 = 5;

/// Per-connection rate limiter state
#[derive(Clone)]
pub struct PlayerRateLimiter {
    input_limiter: Arc<Limiter>,
    malformed_limiter: Arc<Limiter>,
}

impl PlayerRateLimiter {
    pub fn new(input_per_second: u32) -> Self {
        Self {
            input_limiter: create_limiter(input_per_second),
            malformed_limiter: create_limiter(MALFORMED_RATE_LIMIT),
        }
    }

    /// Check if an input message is allowed (returns true if allowed)
    pub fn check_input(&self) -> bool {
        self.input_limiter.check().is_ok()
    }

    /// Record a malformed message. Returns false once the abuse budget is spent.
    pub fn record_malformed(&self) -> bool {
        self.malformed_limiter.check().is_ok()
    }
}
