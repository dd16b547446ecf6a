use std::num::NonZeroU32;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio_util::sync::CancellationToken;

/// Returned by [`RateGate::acquire`] when the run was cancelled while
/// waiting for a token. The caller must stop without issuing a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Token bucket limiting queries per second.
///
/// Two gates are composed in practice: a global one shared by all workers
/// behind an `Arc` and an optional private per-worker one.
pub struct RateGate {
	limiter: DefaultDirectRateLimiter,
}

impl RateGate {
	/// Create a gate delivering `qps` tokens per second, or `None` when
	/// `qps` is 0 (unlimited).
	pub fn new(qps: u32) -> Option<Self> {
		let qps = NonZeroU32::new(qps)?;
		// burst of 1 keeps the issue rate smooth instead of frontloading a
		// full second worth of queries
		let quota = Quota::per_second(qps).allow_burst(NonZeroU32::MIN);
		Some(Self { limiter: RateLimiter::direct(quota) })
	}

	/// Wait for the next token, racing against cancellation.
	pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
		tokio::select! {
			_ = self.limiter.until_ready() => Ok(()),
			_ = cancel.cancelled() => Err(Cancelled),
		}
	}
}
