//! Consecutive-failure circuit breaker gating session creation.
//!
//! # State Transitions
//! ```text
//! Closed   → Open:     failure count reaches the threshold
//! Open     → HalfOpen: one-shot reset timer fires
//! HalfOpen → Closed:   next recorded success
//! ```
//!
//! The breaker never returns errors. Callers consult [`CircuitBreaker::is_open`]
//! and choose their own fallback.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
	Closed,
	Open,
	HalfOpen,
}

impl fmt::Display for BreakerState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			BreakerState::Closed => write!(f, "CLOSED"),
			BreakerState::Open => write!(f, "OPEN"),
			BreakerState::HalfOpen => write!(f, "HALF_OPEN"),
		}
	}
}

struct Inner {
	state: BreakerState,
	failures: u32,
	reset_timer: Option<JoinHandle<()>>,
}

/// Breaker owned by a single manager instance.
pub struct CircuitBreaker {
	threshold: u32,
	reset_timeout: Duration,
	inner: Arc<Mutex<Inner>>,
}

impl CircuitBreaker {
	pub fn new(config: &BreakerConfig) -> Self {
		Self {
			threshold: config.failure_threshold.max(1),
			reset_timeout: config.reset_timeout(),
			inner: Arc::new(Mutex::new(Inner {
				state: BreakerState::Closed,
				failures: 0,
				reset_timer: None,
			})),
		}
	}

	pub fn state(&self) -> BreakerState {
		self.inner.lock().state
	}

	pub fn failure_count(&self) -> u32 {
		self.inner.lock().failures
	}

	/// True only while strictly open; half-open admits a trial call.
	pub fn is_open(&self) -> bool {
		self.state() == BreakerState::Open
	}

	pub fn record_success(&self) {
		let mut inner = self.inner.lock();
		match inner.state {
			// A late success from a call started before the trip does not
			// shorten the open period.
			BreakerState::Open => {}
			BreakerState::HalfOpen => {
				inner.state = BreakerState::Closed;
				inner.failures = 0;
				info!(target = "edge_context.breaker", "trial call succeeded; breaker closed");
			}
			BreakerState::Closed => inner.failures = 0,
		}
	}

	/// Must be called from within a tokio runtime: tripping arms the reset timer.
	pub fn record_failure(&self) {
		let mut inner = self.inner.lock();
		inner.failures = inner.failures.saturating_add(1);

		if inner.state != BreakerState::Closed || inner.failures < self.threshold {
			return;
		}

		inner.state = BreakerState::Open;
		warn!(
			target = "edge_context.breaker",
			failures = inner.failures,
			reset_after_ms = self.reset_timeout.as_millis() as u64,
			"failure threshold reached; breaker open"
		);

		if let Some(previous) = inner.reset_timer.take() {
			previous.abort();
		}
		let shared = Arc::clone(&self.inner);
		let delay = self.reset_timeout;
		inner.reset_timer = Some(tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			let mut inner = shared.lock();
			inner.reset_timer = None;
			if inner.state == BreakerState::Open {
				inner.state = BreakerState::HalfOpen;
				info!(target = "edge_context.breaker", failures = inner.failures, "reset timeout elapsed; breaker half-open");
			}
		}));
	}

	/// Cancels a pending reset timer. Safe to call repeatedly.
	pub fn shutdown(&self) {
		if let Some(timer) = self.inner.lock().reset_timer.take() {
			timer.abort();
		}
	}

	#[cfg(test)]
	fn has_pending_timer(&self) -> bool {
		self.inner.lock().reset_timer.is_some()
	}
}

impl Drop for CircuitBreaker {
	fn drop(&mut self) {
		self.shutdown();
	}
}
