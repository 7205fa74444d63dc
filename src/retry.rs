//! Bounded retry chains and the single proactive refresh timer.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use tokio::{task::JoinHandle, time};
// self
use crate::_prelude::*;

/// Fixed-interval retry policy applied to every refresh chain, proactive and reactive alike.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Total attempts per chain; the first attempt counts.
	pub max_retries: u32,
	/// Fixed delay between consecutive attempts.
	pub retry_interval: StdDuration,
}
impl RetryPolicy {
	/// Default total attempts per chain.
	pub const DEFAULT_MAX_RETRIES: u32 = 3;
	/// Default fixed delay between attempts.
	pub const DEFAULT_RETRY_INTERVAL: StdDuration = StdDuration::from_secs(5);

	/// Creates a policy; `max_retries` is clamped to at least one attempt.
	pub fn new(max_retries: u32, retry_interval: StdDuration) -> Self {
		Self { max_retries: max_retries.max(1), retry_interval }
	}

	/// Runs `op` up to `max_retries` times, sleeping `retry_interval` between attempts.
	///
	/// The error of the final attempt is returned unwrapped so its classification survives
	/// for the caller to inspect.
	pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let mut attempt = 0_u32;

		loop {
			attempt += 1;

			match op().await {
				Ok(value) => return Ok(value),
				Err(e) if attempt < self.max_retries => {
					tracing::warn!(
						attempt,
						max_retries = self.max_retries,
						error = %e,
						"Refresh attempt failed; retrying after the configured interval.",
					);

					time::sleep(self.retry_interval).await;
				},
				Err(e) => return Err(e),
			}
		}
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self::new(Self::DEFAULT_MAX_RETRIES, Self::DEFAULT_RETRY_INTERVAL)
	}
}

/// Owner of the single proactive refresh timer.
///
/// At most one timer is armed at any instant; arming replaces and aborts the previous timer.
/// The epoch counter invalidates timers (and refresh chains) that were scheduled before a
/// session transition such as a logout or a clearing.
#[derive(Debug, Default)]
pub(crate) struct RefreshScheduler {
	task: Mutex<Option<JoinHandle<()>>>,
	epoch: AtomicU64,
}
impl RefreshScheduler {
	/// Current epoch; chains capture it and bail out when it has moved on.
	pub fn epoch(&self) -> u64 {
		self.epoch.load(Ordering::Acquire)
	}

	/// Invalidates every outstanding timer and refresh chain.
	pub fn advance_epoch(&self) -> u64 {
		self.epoch.fetch_add(1, Ordering::AcqRel) + 1
	}

	/// Arms the timer, aborting any previously armed one.
	pub fn arm<F>(&self, delay: StdDuration, future: F)
	where
		F: Future<Output = ()> + Send + 'static,
	{
		let handle = tokio::spawn(async move {
			time::sleep(delay).await;
			future.await;
		});

		if let Some(previous) = self.task.lock().replace(handle) {
			previous.abort();
		}
	}

	/// Disarms the timer without touching the epoch.
	pub fn disarm(&self) {
		if let Some(handle) = self.task.lock().take() {
			handle.abort();
		}
	}

	/// Detaches the stored handle at fire time.
	///
	/// The firing task must call this before any await point that re-arms the scheduler;
	/// otherwise the re-arm would abort the very task performing the refresh.
	pub fn begin_fire(&self) {
		drop(self.task.lock().take());
	}

	/// Whether a timer is currently armed.
	pub fn is_armed(&self) -> bool {
		self.task.lock().is_some()
	}
}
impl Drop for RefreshScheduler {
	fn drop(&mut self) {
		self.disarm();
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicU32, Ordering};
	// self
	use super::*;

	#[tokio::test(start_paused = true)]
	async fn run_stops_after_first_success() {
		let policy = RetryPolicy::new(3, StdDuration::from_secs(5));
		let attempts = AtomicU32::new(0);
		let result = policy
			.run(|| {
				attempts.fetch_add(1, Ordering::SeqCst);

				async { Ok(42_u32) }
			})
			.await
			.expect("Succeeding operation should not be retried.");

		assert_eq!(result, 42);
		assert_eq!(attempts.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn run_returns_the_last_error_after_exhaustion() {
		let policy = RetryPolicy::new(3, StdDuration::from_secs(5));
		let attempts = AtomicU32::new(0);
		let err = policy
			.run(|| {
				let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;

				async move {
					Err::<(), _>(Error::Server {
						status: Some(503),
						reason: format!("attempt {attempt}"),
					})
				}
			})
			.await
			.expect_err("Exhausted chain should surface the final error.");

		assert_eq!(attempts.load(Ordering::SeqCst), 3);
		assert!(matches!(err, Error::Server { status: Some(503), ref reason } if reason == "attempt 3"));
	}

	#[tokio::test(start_paused = true)]
	async fn run_recovers_midway_through_the_chain() {
		let policy = RetryPolicy::new(3, StdDuration::from_millis(50));
		let attempts = AtomicU32::new(0);
		let result = policy
			.run(|| {
				let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;

				async move {
					if attempt < 3 {
						Err(Error::Server { status: Some(500), reason: "transient".into() })
					} else {
						Ok("recovered")
					}
				}
			})
			.await
			.expect("Third attempt should succeed.");

		assert_eq!(result, "recovered");
		assert_eq!(attempts.load(Ordering::SeqCst), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn rearming_replaces_the_previous_timer() {
		let scheduler = Arc::new(RefreshScheduler::default());
		let fired = Arc::new(AtomicU32::new(0));
		let first = fired.clone();
		let second = fired.clone();

		scheduler.arm(StdDuration::from_secs(10), async move {
			first.fetch_add(1, Ordering::SeqCst);
		});
		scheduler.arm(StdDuration::from_secs(20), async move {
			second.fetch_add(1, Ordering::SeqCst);
		});

		assert!(scheduler.is_armed());

		time::sleep(StdDuration::from_secs(30)).await;

		assert_eq!(fired.load(Ordering::SeqCst), 1, "Only the replacing timer should fire.");
	}

	#[tokio::test(start_paused = true)]
	async fn disarm_cancels_a_pending_timer() {
		let scheduler = RefreshScheduler::default();
		let fired = Arc::new(AtomicU32::new(0));
		let flag = fired.clone();

		scheduler.arm(StdDuration::from_secs(10), async move {
			flag.fetch_add(1, Ordering::SeqCst);
		});
		scheduler.disarm();

		assert!(!scheduler.is_armed());

		time::sleep(StdDuration::from_secs(30)).await;

		assert_eq!(fired.load(Ordering::SeqCst), 0);
	}

	#[test]
	fn epoch_moves_forward_monotonically() {
		let scheduler = RefreshScheduler::default();
		let initial = scheduler.epoch();

		assert_eq!(scheduler.advance_epoch(), initial + 1);
		assert_eq!(scheduler.advance_epoch(), initial + 2);
		assert_eq!(scheduler.epoch(), initial + 2);
	}
}
