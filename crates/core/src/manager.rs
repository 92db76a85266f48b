//! Context orchestration: cache reuse, breaker-gated creation, and degraded
//! fallback composed behind one entry point.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use edge_context_protocol::{ExperimentRecord, UnitIds};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::breaker::{BreakerState, CircuitBreaker};
use crate::cache::{CachedSnapshot, SessionCache};
use crate::cleanup::CleanupScheduler;
use crate::client::{AssignmentClient, KeyValueStore, Session, SessionHandle};
use crate::config::{ClientConfig, ContextManagerConfig};
use crate::error::{Error, Result};
use crate::extract;
use crate::factory::{CreateContextRequest, SessionFactory};
use crate::fallback::FallbackSession;
use crate::publish::PublishQueue;

/// Where an acquired session came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextSource {
	/// Rebuilt from an unexpired cached snapshot.
	Cached,
	/// Created upstream and cached.
	Fresh,
	/// Degraded session with no experiments; the breaker is open.
	Fallback,
}

/// Acquired session tagged with its source.
pub struct ContextHandle {
	pub session: SessionHandle,
	pub source: ContextSource,
}

impl ContextHandle {
	pub fn is_fallback(&self) -> bool {
		self.source == ContextSource::Fallback
	}
}

/// Resilient front door to the assignment service for one process.
///
/// Owns its breaker, cache, cleanup timer and publish queue; none of these are
/// shared with other instances. Must be constructed inside a tokio runtime.
pub struct ContextManager {
	config: ContextManagerConfig,
	client: Arc<dyn AssignmentClient>,
	breaker: Arc<CircuitBreaker>,
	cache: Arc<SessionCache>,
	factory: SessionFactory,
	cleanup: CleanupScheduler,
	publisher: PublishQueue,
	destroyed: AtomicBool,
}

impl ContextManager {
	pub fn new(config: ContextManagerConfig, client: Arc<dyn AssignmentClient>, store: Option<Arc<dyn KeyValueStore>>) -> Self {
		let breaker = Arc::new(CircuitBreaker::new(&config.breaker));
		let cache = Arc::new(SessionCache::new(config.cache_ttl(), store));
		let factory = SessionFactory::new(Arc::clone(&client), Arc::clone(&breaker), config.creation_timeout());
		let cleanup = CleanupScheduler::start(Arc::clone(&cache), config.cleanup_interval());

		info!(
			target = "edge_context.manager",
			ttl_ms = config.cache_ttl().as_millis() as u64,
			timeout_ms = config.creation_timeout_ms,
			threshold = config.breaker.failure_threshold,
			"context manager started"
		);

		Self {
			config,
			client,
			breaker,
			cache,
			factory,
			cleanup,
			publisher: PublishQueue::new(),
			destroyed: AtomicBool::new(false),
		}
	}

	/// Builds the client from the configured connection identifiers.
	pub fn connect<F>(config: ContextManagerConfig, build_client: F, store: Option<Arc<dyn KeyValueStore>>) -> Result<Self>
	where
		F: FnOnce(&ClientConfig) -> anyhow::Result<Arc<dyn AssignmentClient>>,
	{
		let client = build_client(&config.client).map_err(|e| Error::Config(format!("assignment client: {e}")))?;
		Ok(Self::new(config, client, store))
	}

	pub fn config(&self) -> &ContextManagerConfig {
		&self.config
	}

	pub fn breaker_state(&self) -> BreakerState {
		self.breaker.state()
	}

	pub fn failure_count(&self) -> u32 {
		self.breaker.failure_count()
	}

	/// Returns a ready session for the request's user.
	///
	/// Falls back to a session without experiments when creation fails and the
	/// breaker has opened; otherwise creation errors propagate.
	pub async fn get_or_create_context(&self, request: &CreateContextRequest) -> Result<SessionHandle> {
		self.acquire(request).await.map(|handle| handle.session)
	}

	/// Like [`Self::get_or_create_context`], reporting where the session came from.
	pub async fn acquire(&self, request: &CreateContextRequest) -> Result<ContextHandle> {
		if request.user_id.is_empty() {
			return Err(Error::InvalidInput("user id must not be empty".to_string()));
		}
		let unit_ids = request.unit_ids();

		if let Some(entry) = self.cache.get(&request.user_id) {
			match self.reconstruct(&entry, &unit_ids) {
				Ok(session) => {
					debug!(target = "edge_context.manager", user_id = %request.user_id, "reusing cached snapshot");
					return Ok(ContextHandle {
						session,
						source: ContextSource::Cached,
					});
				}
				Err(err) if err.is_recoverable_locally() => {
					warn!(target = "edge_context.manager", user_id = %request.user_id, error = %err, "discarding cached snapshot");
					self.cache.remove(&request.user_id).await;
				}
				Err(err) => return Err(err),
			}
		}

		match self.factory.create_context(request).await {
			Ok(session) => {
				self.cache_snapshot(&request.user_id, session.as_ref()).await;
				Ok(ContextHandle {
					session,
					source: ContextSource::Fresh,
				})
			}
			Err(err) if self.breaker.is_open() => {
				warn!(
					target = "edge_context.manager",
					user_id = %request.user_id,
					error = %err,
					"breaker open; serving fallback session"
				);
				Ok(ContextHandle {
					session: Arc::new(FallbackSession::new(unit_ids)),
					source: ContextSource::Fallback,
				})
			}
			Err(err) => Err(err),
		}
	}

	pub fn extract_experiment_data(&self, session: &dyn Session, track_immediately: bool) -> Vec<ExperimentRecord> {
		extract::extract_experiment_data(session, track_immediately)
	}

	/// Publishes through the instance-wide serialized queue.
	pub async fn publish_context(&self, session: SessionHandle) -> Result<()> {
		self.publisher.publish_context(session).await
	}

	pub fn publisher(&self) -> &PublishQueue {
		&self.publisher
	}

	/// Structured snapshot of manager health.
	pub fn status(&self) -> serde_json::Value {
		json!({
			"destroyed": self.destroyed.load(Ordering::SeqCst),
			"breaker": {
				"state": self.breaker.state(),
				"failures": self.breaker.failure_count(),
				"threshold": self.config.breaker.failure_threshold,
			},
			"cache": {
				"entries": self.cache.len(),
				"ttl_ms": self.cache.ttl().as_millis() as u64,
			},
			"cleanup": {
				"running": self.cleanup.is_running(),
				"period_ms": self.cleanup.period().as_millis() as u64,
			},
			"publish": {
				"pending": self.publisher.pending(),
				"draining": self.publisher.is_draining(),
			},
		})
	}

	/// Stops the cleanup timer and breaker reset timer and clears the cache.
	/// Safe to call repeatedly.
	pub fn destroy(&self) {
		self.cleanup.stop();
		self.breaker.shutdown();
		self.cache.clear();
		if !self.destroyed.swap(true, Ordering::SeqCst) {
			info!(target = "edge_context.manager", "context manager destroyed");
		}
	}

	fn reconstruct(&self, entry: &CachedSnapshot, unit_ids: &UnitIds) -> Result<SessionHandle> {
		let snapshot = entry.snapshot()?;
		self.client
			.session_from_snapshot(unit_ids, &snapshot)
			.map_err(|e| Error::CacheReconstruction(e.to_string()))
	}

	async fn cache_snapshot(&self, user_id: &str, session: &dyn Session) {
		let cached = match session.snapshot() {
			Ok(snapshot) => self.cache.put(user_id, &snapshot).await,
			Err(err) => Err(Error::Upstream(err)),
		};
		if let Err(err) = cached {
			warn!(target = "edge_context.manager", user_id, error = %err, "failed to cache session snapshot");
		}
	}
}
