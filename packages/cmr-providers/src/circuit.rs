use std::{
	sync::{Mutex, MutexGuard, PoisonError},
	time::Duration,
};

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CircuitState {
	pub failure_count: u32,
	pub open_until: Option<Instant>,
}

/// Counts consecutive upstream failures and rejects calls for a cooldown window once the
/// threshold is reached. There is no half-open state: the first `allow` after the window
/// elapses lets a probe through, and one more failure reopens the window.
#[derive(Debug)]
pub struct CircuitBreaker {
	failure_threshold: u32,
	recovery: Duration,
	state: Mutex<CircuitState>,
}
impl CircuitBreaker {
	pub fn new(cfg: &cmr_config::Circuit) -> Self {
		Self::with_settings(cfg.failure_threshold, Duration::from_secs(cfg.recovery_time_seconds))
	}

	pub fn with_settings(failure_threshold: u32, recovery: Duration) -> Self {
		Self { failure_threshold, recovery, state: Mutex::new(CircuitState::default()) }
	}

	pub fn allow(&self) -> bool {
		match self.lock().open_until {
			Some(open_until) => Instant::now() >= open_until,
			None => true,
		}
	}

	pub fn record_success(&self) {
		*self.lock() = CircuitState::default();
	}

	pub fn record_failure(&self) {
		let mut state = self.lock();

		state.failure_count = state.failure_count.saturating_add(1);

		if state.failure_count >= self.failure_threshold {
			state.open_until = Some(Instant::now() + self.recovery);

			tracing::warn!(
				failure_count = state.failure_count,
				recovery_secs = self.recovery.as_secs(),
				"Metadata search circuit opened."
			);
		}
	}

	pub fn state(&self) -> CircuitState {
		*self.lock()
	}

	fn lock(&self) -> MutexGuard<'_, CircuitState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test(start_paused = true)]
	async fn opens_after_threshold_and_recovers() {
		let breaker = CircuitBreaker::with_settings(2, Duration::from_secs(30));

		breaker.record_failure();

		assert!(breaker.allow());

		breaker.record_failure();

		assert!(!breaker.allow());

		tokio::time::advance(Duration::from_secs(29)).await;

		assert!(!breaker.allow());

		tokio::time::advance(Duration::from_secs(1)).await;

		assert!(breaker.allow());
	}

	#[tokio::test(start_paused = true)]
	async fn failed_probe_reopens_immediately() {
		let breaker = CircuitBreaker::with_settings(1, Duration::from_secs(5));

		breaker.record_failure();
		tokio::time::advance(Duration::from_secs(5)).await;

		assert!(breaker.allow());

		breaker.record_failure();

		assert!(!breaker.allow());
		assert_eq!(breaker.state().failure_count, 2);
	}

	#[tokio::test(start_paused = true)]
	async fn success_resets_state() {
		let breaker = CircuitBreaker::with_settings(3, Duration::from_secs(5));

		breaker.record_failure();
		breaker.record_failure();
		breaker.record_success();

		assert_eq!(breaker.state(), CircuitState::default());

		breaker.record_failure();
		breaker.record_failure();

		assert!(breaker.allow());
	}
}
