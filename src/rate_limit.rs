use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Upstream quote request budget
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    /// Maximum upstream requests per minute
    pub requests_per_minute: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 120,
        }
    }
}

/// Process-wide limiter shared by every quote lookup
pub type UpstreamRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Create a new rate limiter; a zero budget is raised to one request per minute
pub fn create_rate_limiter(config: RateLimiterConfig) -> UpstreamRateLimiter {
    let per_minute = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
    if config.requests_per_minute == 0 {
        tracing::warn!("Upstream rate limit of 0/min is unusable, using 1/min");
    }
    Arc::new(RateLimiter::direct(Quota::per_minute(per_minute)))
}

/// Wait until the limiter grants a permit
pub async fn acquire(limiter: &UpstreamRateLimiter) {
    if limiter.check().is_err() {
        tracing::debug!("Upstream rate limit reached, waiting for a permit");
        limiter.until_ready().await;
    }
}
