use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota};

pub const DEFAULT_CALLS_PER_MINUTE: u32 = 30;

/// Outbound throttle for a single provider client.
///
/// Allows at most `limit` calls in any `window`-long span. Admissions are
/// spaced `window / limit` apart with no burst allowance. `acquire` waits for
/// capacity instead of rejecting. Clones share the same budget, so one limiter
/// can be handed to every in-flight request of a client.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<DefaultDirectRateLimiter>,
    limit: u32,
    window: Duration,
}

/// Proof that a call was admitted by a [`RateLimiter`].
#[derive(Debug)]
#[must_use]
pub struct Permit(());

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        let limit = limit.max(1);
        Self {
            inner: Arc::new(governor::RateLimiter::direct(quota_from_window(window, limit))),
            limit,
            window,
        }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    pub async fn acquire(&self) -> Permit {
        self.inner.until_ready().await;
        Permit(())
    }

    /// Non-blocking variant of [`acquire`](Self::acquire).
    pub fn try_acquire(&self) -> Option<Permit> {
        self.inner.check().ok().map(|_| Permit(()))
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("limit", &self.limit)
            .field("window", &self.window)
            .finish()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::per_minute(DEFAULT_CALLS_PER_MINUTE)
    }
}

/// One cell every `window / limit`, burst of one. A larger burst would let the
/// burst and the refills land in the same window and exceed `limit`.
fn quota_from_window(window: Duration, limit: u32) -> Quota {
    let period = window.checked_div(limit.max(1)).unwrap_or(window);

    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MAX))
        .allow_burst(NonZeroU32::MIN)
}
