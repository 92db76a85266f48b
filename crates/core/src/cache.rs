//! In-memory snapshot cache keyed by user id, mirrored best-effort to an
//! external key-value store.
//!
//! Entries are immutable: a write always replaces the previous entry. Reads
//! check expiry lazily; expired entries are never returned but stay in the map
//! until the orchestrator overwrites them or the cleanup sweep removes them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use edge_context_protocol::{ContextSnapshot, StoredSnapshot};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::client::KeyValueStore;
use crate::error::{Error, Result};

/// Derives the cache/store key for a user.
pub fn cache_key(user_id: &str) -> String {
	format!("ctx:{user_id}")
}

/// Immutable cached snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedSnapshot {
	serialized_data: String,
	created_at: Instant,
	ttl: Duration,
}

impl CachedSnapshot {
	pub fn new(serialized_data: String, created_at: Instant, ttl: Duration) -> Self {
		Self {
			serialized_data,
			created_at,
			ttl,
		}
	}

	pub fn is_expired_at(&self, now: Instant) -> bool {
		self.created_at.checked_add(self.ttl).is_some_and(|expiry| now >= expiry)
	}

	/// Validates and decodes the stored payload. Anything that is not a JSON
	/// object is rejected.
	pub fn snapshot(&self) -> Result<ContextSnapshot> {
		serde_json::from_str(&self.serialized_data).map_err(|e| Error::CacheReconstruction(e.to_string()))
	}
}

pub struct SessionCache {
	entries: Mutex<HashMap<String, CachedSnapshot>>,
	ttl: Duration,
	store: Option<Arc<dyn KeyValueStore>>,
}

impl SessionCache {
	pub fn new(ttl: Duration, store: Option<Arc<dyn KeyValueStore>>) -> Self {
		Self {
			entries: Mutex::new(HashMap::new()),
			ttl,
			store,
		}
	}

	pub fn ttl(&self) -> Duration {
		self.ttl
	}

	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}

	/// Returns the entry for `user_id` unless it is missing or expired.
	pub fn get(&self, user_id: &str) -> Option<CachedSnapshot> {
		let now = Instant::now();
		let entries = self.entries.lock();
		let entry = entries.get(&cache_key(user_id))?;
		if entry.is_expired_at(now) {
			debug!(target = "edge_context.cache", user_id, "cached snapshot expired");
			return None;
		}
		Some(entry.clone())
	}

	/// Serializes and stores `snapshot`, replacing any previous entry, then
	/// mirrors it to the external store. Mirror failures are logged only.
	pub async fn put(&self, user_id: &str, snapshot: &ContextSnapshot) -> Result<()> {
		let key = cache_key(user_id);
		let serialized = serde_json::to_string(snapshot)?;
		let entry = CachedSnapshot::new(serialized, Instant::now(), self.ttl);
		self.entries.lock().insert(key.clone(), entry);
		debug!(target = "edge_context.cache", %key, ttl_ms = self.ttl.as_millis() as u64, "cached snapshot");

		if let Err(err) = self.mirror(&key, snapshot).await {
			warn!(target = "edge_context.cache", %key, error = %err, "failed to mirror snapshot to store");
		}
		Ok(())
	}

	/// Drops the entry for `user_id` from memory and the external store.
	pub async fn remove(&self, user_id: &str) {
		let key = cache_key(user_id);
		self.entries.lock().remove(&key);
		if let Err(err) = self.mirror_delete(&key).await {
			warn!(target = "edge_context.cache", %key, error = %err, "failed to delete snapshot from store");
		}
	}

	/// Removes every entry expired at `now` from memory and returns their keys.
	pub fn sweep_expired(&self, now: Instant) -> Vec<String> {
		let mut entries = self.entries.lock();
		let expired: Vec<String> = entries
			.iter()
			.filter(|(_, entry)| entry.is_expired_at(now))
			.map(|(key, _)| key.clone())
			.collect();
		for key in &expired {
			entries.remove(key);
		}
		expired
	}

	/// Deletes `key` from the external store once its memory entry is gone.
	///
	/// Skipped when the key has been cached again. If a write for the key
	/// lands while the delete is in flight, the fresh entry is mirrored again
	/// so the store never ends up behind memory.
	pub async fn mirror_delete(&self, key: &str) -> anyhow::Result<()> {
		let Some(store) = &self.store else {
			return Ok(());
		};
		if self.entries.lock().contains_key(key) {
			debug!(target = "edge_context.cache", %key, "key cached again; keeping mirrored snapshot");
			return Ok(());
		}

		store.set(key, None).await?;

		let recached = self.entries.lock().get(key).cloned();
		if let Some(entry) = recached {
			debug!(target = "edge_context.cache", %key, "key cached during delete; restoring mirror");
			self.mirror(key, &entry.snapshot()?).await?;
		}
		Ok(())
	}

	async fn mirror(&self, key: &str, snapshot: &ContextSnapshot) -> anyhow::Result<()> {
		let Some(store) = &self.store else {
			return Ok(());
		};
		let record = StoredSnapshot {
			data: snapshot.clone(),
			created_at_ms: unix_millis(),
			ttl_ms: self.ttl.as_millis() as u64,
		};
		store.set(key, Some(serde_json::to_string(&record)?)).await
	}

	pub fn clear(&self) {
		self.entries.lock().clear();
	}

	#[cfg(test)]
	pub(crate) fn insert_raw(&self, user_id: &str, entry: CachedSnapshot) {
		self.entries.lock().insert(cache_key(user_id), entry);
	}
}

fn unix_millis() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}
