//! Clock abstraction so expiry arithmetic and scheduling stay testable with a fixed time.

// self
use crate::_prelude::*;

/// Source of the current instant used for all expiry and scheduling decisions.
pub trait Clock
where
	Self: Send + Sync,
{
	/// Returns the current instant.
	fn now(&self) -> OffsetDateTime;
}

/// Wall-clock [`Clock`]; the default for production engines.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;
impl Clock for SystemClock {
	fn now(&self) -> OffsetDateTime {
		OffsetDateTime::now_utc()
	}
}

/// Manually advanced [`Clock`] for tests and simulations.
#[derive(Clone, Debug)]
pub struct ManualClock(Arc<Mutex<OffsetDateTime>>);
impl ManualClock {
	/// Creates a clock frozen at the provided instant.
	pub fn new(start: OffsetDateTime) -> Self {
		Self(Arc::new(Mutex::new(start)))
	}

	/// Moves the clock to an absolute instant.
	pub fn set(&self, to: OffsetDateTime) {
		*self.0.lock() = to;
	}

	/// Advances the clock by the provided duration.
	pub fn advance(&self, by: Duration) {
		*self.0.lock() += by;
	}
}
impl Clock for ManualClock {
	fn now(&self) -> OffsetDateTime {
		*self.0.lock()
	}
}
