//! Background sweep of expired cache entries.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::cache::SessionCache;

/// Periodic sweeper. The first sweep runs one full period after start.
pub struct CleanupScheduler {
	cache: Arc<SessionCache>,
	period: Duration,
	task: Mutex<Option<JoinHandle<()>>>,
}

impl CleanupScheduler {
	/// Spawns the sweep loop on the current tokio runtime.
	pub fn start(cache: Arc<SessionCache>, period: Duration) -> Self {
		let loop_cache = Arc::clone(&cache);
		let task = tokio::spawn(async move {
			let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
			loop {
				ticker.tick().await;
				sweep(&loop_cache).await;
			}
		});
		debug!(target = "edge_context.cleanup", period_ms = period.as_millis() as u64, "cleanup scheduler started");

		Self {
			cache,
			period,
			task: Mutex::new(Some(task)),
		}
	}

	pub fn period(&self) -> Duration {
		self.period
	}

	pub fn is_running(&self) -> bool {
		self.task.lock().as_ref().is_some_and(|task| !task.is_finished())
	}

	/// Runs one sweep immediately, returning how many entries were removed.
	pub async fn run_once(&self) -> usize {
		sweep(&self.cache).await
	}

	/// Cancels the timer. Safe to call any number of times.
	pub fn stop(&self) {
		if let Some(task) = self.task.lock().take() {
			task.abort();
			debug!(target = "edge_context.cleanup", "cleanup scheduler stopped");
		}
	}
}

impl Drop for CleanupScheduler {
	fn drop(&mut self) {
		self.stop();
	}
}

/// Never fails: per-entry store errors are logged and the sweep continues.
async fn sweep(cache: &SessionCache) -> usize {
	let expired = cache.sweep_expired(Instant::now());
	for key in &expired {
		if let Err(err) = cache.mirror_delete(key).await {
			warn!(target = "edge_context.cleanup", %key, error = %err, "failed to delete expired snapshot from store");
		}
	}
	if !expired.is_empty() {
		debug!(target = "edge_context.cleanup", removed = expired.len(), "swept expired snapshots");
	}
	expired.len()
}

#[cfg(test)]
mod tests {
	use edge_context_protocol::ContextSnapshot;
	use serde_json::json;

	use super::*;
	use crate::testing::MemoryKeyValueStore;

	fn snapshot() -> ContextSnapshot {
		ContextSnapshot::from_value(json!({"k": 1})).unwrap()
	}

	#[tokio::test(start_paused = true)]
	async fn periodic_sweep_removes_expired_entries_from_memory_and_store() {
		let store = Arc::new(MemoryKeyValueStore::default());
		let cache = Arc::new(SessionCache::new(Duration::from_secs(10), Some(store.clone())));
		cache.put("u1", &snapshot()).await.unwrap();
		let scheduler = CleanupScheduler::start(Arc::clone(&cache), Duration::from_secs(60));

		tokio::time::sleep(Duration::from_secs(59)).await;
		assert_eq!(cache.len(), 1);

		tokio::time::sleep(Duration::from_secs(2)).await;
		assert!(cache.is_empty());
		assert!(store.get("ctx:u1").is_none());
		scheduler.stop();
	}

	#[tokio::test(start_paused = true)]
	async fn store_failures_do_not_abort_sweep() {
		let store = Arc::new(MemoryKeyValueStore::default());
		let cache = Arc::new(SessionCache::new(Duration::from_secs(1), Some(store.clone())));
		for user in ["a", "b", "c"] {
			cache.put(user, &snapshot()).await.unwrap();
		}
		store.fail_writes(true);
		tokio::time::advance(Duration::from_secs(2)).await;

		let scheduler = CleanupScheduler::start(Arc::clone(&cache), Duration::from_secs(60));
		assert_eq!(scheduler.run_once().await, 3);
		assert!(cache.is_empty());
		assert_eq!(store.write_attempts(), 6);
		assert!(scheduler.is_running());

		tokio::time::sleep(Duration::from_secs(61)).await;
		assert!(scheduler.is_running(), "loop survives failing deletes");
		scheduler.stop();
	}

	#[tokio::test(start_paused = true)]
	async fn stop_is_idempotent_and_halts_sweeps() {
		let cache = Arc::new(SessionCache::new(Duration::from_secs(1), None));
		let scheduler = CleanupScheduler::start(Arc::clone(&cache), Duration::from_secs(60));
		scheduler.stop();
		scheduler.stop();
		tokio::task::yield_now().await;
		assert!(!scheduler.is_running());

		cache.put("u1", &snapshot()).await.unwrap();
		tokio::time::sleep(Duration::from_secs(180)).await;
		assert_eq!(cache.len(), 1, "no sweep after stop");
	}

	#[tokio::test(start_paused = true)]
	async fn sweep_leaves_mirror_of_user_cached_mid_sweep() {
		let store = Arc::new(MemoryKeyValueStore::default());
		let cache = Arc::new(SessionCache::new(Duration::from_secs(1), Some(store.clone())));
		cache.put("u1", &snapshot()).await.unwrap();
		tokio::time::advance(Duration::from_secs(2)).await;
		store.delay_deletes(Duration::from_millis(20));

		let scheduler = Arc::new(CleanupScheduler::start(Arc::clone(&cache), Duration::from_secs(60)));
		let sweeping = tokio::spawn({
			let scheduler = Arc::clone(&scheduler);
			async move { scheduler.run_once().await }
		});
		tokio::task::yield_now().await;
		cache.put("u1", &snapshot()).await.unwrap();

		assert_eq!(sweeping.await.unwrap(), 1);
		assert!(cache.get("u1").is_some());
		assert!(store.get("ctx:u1").is_some(), "fresh mirror survives the sweep");
		scheduler.stop();
	}
}
