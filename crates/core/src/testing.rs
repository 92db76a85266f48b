//! In-memory collaborators for exercising the context layer without an
//! assignment service.
//!
//! # Example
//!
//! ```ignore
//! let client = Arc::new(FakeAssignmentClient::new());
//! client.set_experiments(data);
//! client.assign("hero", 1);
//!
//! let manager = ContextManager::new(config, client.clone(), None);
//! let session = manager.get_or_create_context(&CreateContextRequest::new("u1")).await?;
//! assert_eq!(client.create_calls(), 1);
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use edge_context_protocol::{ContextSnapshot, ExperimentData, UnitIds};
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::client::{AssignmentClient, KeyValueStore, Session, SessionHandle};

/// How a fake session's `ready()` behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadyBehavior {
	#[default]
	Immediate,
	Delay(Duration),
	Fail,
}

/// Publish lifecycle event, recorded in call order across all sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishEvent {
	Started(String),
	Finished(String),
}

/// Shared, ordered record of publish calls.
#[derive(Debug, Clone, Default)]
pub struct PublishJournal {
	events: Arc<Mutex<Vec<PublishEvent>>>,
}

impl PublishJournal {
	pub fn events(&self) -> Vec<PublishEvent> {
		self.events.lock().clone()
	}

	/// Largest number of publishes observed in flight at the same time.
	pub fn max_in_flight(&self) -> usize {
		let mut current = 0usize;
		let mut max = 0usize;
		for event in self.events.lock().iter() {
			match event {
				PublishEvent::Started(_) => {
					current += 1;
					max = max.max(current);
				}
				PublishEvent::Finished(_) => current = current.saturating_sub(1),
			}
		}
		max
	}

	/// User ids in the order their publishes started.
	pub fn start_order(&self) -> Vec<String> {
		self.events
			.lock()
			.iter()
			.filter_map(|event| match event {
				PublishEvent::Started(user) => Some(user.clone()),
				PublishEvent::Finished(_) => None,
			})
			.collect()
	}

	fn push(&self, event: PublishEvent) {
		self.events.lock().push(event);
	}
}

/// Scriptable in-memory session.
pub struct FakeSession {
	unit_ids: UnitIds,
	data: ExperimentData,
	assignments: Mutex<HashMap<String, i64>>,
	overrides: Mutex<Vec<(String, i64)>>,
	attributes: Mutex<Option<BTreeMap<String, Value>>>,
	exposures: Mutex<Vec<String>>,
	peeks: AtomicUsize,
	failing_experiments: HashSet<String>,
	ready: ReadyBehavior,
	restored: bool,
	publish_delay: Duration,
	publish_fails: AtomicBool,
	publish_calls: AtomicUsize,
	journal: PublishJournal,
}

impl FakeSession {
	pub fn new(unit_ids: UnitIds, data: ExperimentData) -> Self {
		Self {
			unit_ids,
			data,
			assignments: Mutex::new(HashMap::new()),
			overrides: Mutex::new(Vec::new()),
			attributes: Mutex::new(None),
			exposures: Mutex::new(Vec::new()),
			peeks: AtomicUsize::new(0),
			failing_experiments: HashSet::new(),
			ready: ReadyBehavior::Immediate,
			restored: false,
			publish_delay: Duration::ZERO,
			publish_fails: AtomicBool::new(false),
			publish_calls: AtomicUsize::new(0),
			journal: PublishJournal::default(),
		}
	}

	/// A ready session for `user_id` with no experiments.
	pub fn for_user(user_id: &str) -> Self {
		Self::new(UnitIds::new(user_id, format!("sess-{user_id}")), ExperimentData::default())
	}

	pub fn with_assignment(self, experiment: &str, variant: i64) -> Self {
		self.assignments.lock().insert(experiment.to_string(), variant);
		self
	}

	/// Makes `peek`/`treatment` fail for `experiment`.
	pub fn with_failing_experiment(mut self, experiment: &str) -> Self {
		self.failing_experiments.insert(experiment.to_string());
		self
	}

	pub fn with_ready(mut self, ready: ReadyBehavior) -> Self {
		self.ready = ready;
		self
	}

	pub fn with_publish_delay(mut self, delay: Duration) -> Self {
		self.publish_delay = delay;
		self
	}

	pub fn with_publish_failure(self) -> Self {
		self.publish_fails.store(true, Ordering::SeqCst);
		self
	}

	pub fn with_journal(mut self, journal: PublishJournal) -> Self {
		self.journal = journal;
		self
	}

	pub fn overrides(&self) -> Vec<(String, i64)> {
		self.overrides.lock().clone()
	}

	pub fn attributes(&self) -> Option<BTreeMap<String, Value>> {
		self.attributes.lock().clone()
	}

	/// Experiments for which exposure was recorded, in call order.
	pub fn exposures(&self) -> Vec<String> {
		self.exposures.lock().clone()
	}

	pub fn peek_count(&self) -> usize {
		self.peeks.load(Ordering::SeqCst)
	}

	pub fn publish_calls(&self) -> usize {
		self.publish_calls.load(Ordering::SeqCst)
	}

	pub fn was_restored(&self) -> bool {
		self.restored
	}

	fn assignment(&self, experiment: &str) -> anyhow::Result<Option<i64>> {
		if self.failing_experiments.contains(experiment) {
			bail!("assignment lookup failed for {experiment}");
		}
		Ok(self.assignments.lock().get(experiment).copied())
	}
}

#[async_trait]
impl Session for FakeSession {
	fn unit_ids(&self) -> &UnitIds {
		&self.unit_ids
	}

	fn set_override(&self, experiment: &str, variant: i64) -> anyhow::Result<()> {
		self.overrides.lock().push((experiment.to_string(), variant));
		self.assignments.lock().insert(experiment.to_string(), variant);
		Ok(())
	}

	fn set_attributes(&self, attributes: &BTreeMap<String, Value>) -> anyhow::Result<()> {
		*self.attributes.lock() = Some(attributes.clone());
		Ok(())
	}

	async fn ready(&self) -> anyhow::Result<()> {
		match self.ready {
			ReadyBehavior::Immediate => Ok(()),
			ReadyBehavior::Delay(delay) => {
				tokio::time::sleep(delay).await;
				Ok(())
			}
			ReadyBehavior::Fail => Err(anyhow!("assignment service unavailable")),
		}
	}

	fn peek(&self, experiment: &str) -> anyhow::Result<Option<i64>> {
		self.peeks.fetch_add(1, Ordering::SeqCst);
		self.assignment(experiment)
	}

	fn treatment(&self, experiment: &str) -> anyhow::Result<i64> {
		let variant = self.assignment(experiment)?.unwrap_or(0);
		self.exposures.lock().push(experiment.to_string());
		Ok(variant)
	}

	fn experiment_data(&self) -> anyhow::Result<ExperimentData> {
		Ok(self.data.clone())
	}

	fn snapshot(&self) -> anyhow::Result<ContextSnapshot> {
		let value = json!({
			"experiments": self.data,
			"assignments": *self.assignments.lock(),
		});
		Ok(ContextSnapshot::from_value(value)?)
	}

	async fn publish(&self) -> anyhow::Result<()> {
		self.publish_calls.fetch_add(1, Ordering::SeqCst);
		self.journal.push(PublishEvent::Started(self.unit_ids.user_id.clone()));
		if !self.publish_delay.is_zero() {
			tokio::time::sleep(self.publish_delay).await;
		}
		self.journal.push(PublishEvent::Finished(self.unit_ids.user_id.clone()));
		if self.publish_fails.load(Ordering::SeqCst) {
			bail!("event collector rejected batch for {}", self.unit_ids.user_id);
		}
		Ok(())
	}
}

/// Fake assignment service counting creations and restorations.
#[derive(Default)]
pub struct FakeAssignmentClient {
	data: Mutex<ExperimentData>,
	assignments: Mutex<HashMap<String, i64>>,
	ready: Mutex<ReadyBehavior>,
	create_fails: AtomicBool,
	restore_fails: AtomicBool,
	snapshot_fails: AtomicBool,
	create_calls: AtomicUsize,
	restore_calls: AtomicUsize,
	sessions: Mutex<Vec<Arc<FakeSession>>>,
}

impl FakeAssignmentClient {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_experiments(&self, data: ExperimentData) {
		*self.data.lock() = data;
	}

	pub fn assign(&self, experiment: &str, variant: i64) {
		self.assignments.lock().insert(experiment.to_string(), variant);
	}

	pub fn set_ready_behavior(&self, ready: ReadyBehavior) {
		*self.ready.lock() = ready;
	}

	/// Makes `create_session` itself fail.
	pub fn set_create_fails(&self, fails: bool) {
		self.create_fails.store(fails, Ordering::SeqCst);
	}

	pub fn set_restore_fails(&self, fails: bool) {
		self.restore_fails.store(fails, Ordering::SeqCst);
	}

	/// Makes sessions produced from now on fail to capture snapshots.
	pub fn set_snapshot_fails(&self, fails: bool) {
		self.snapshot_fails.store(fails, Ordering::SeqCst);
	}

	pub fn create_calls(&self) -> usize {
		self.create_calls.load(Ordering::SeqCst)
	}

	pub fn restore_calls(&self) -> usize {
		self.restore_calls.load(Ordering::SeqCst)
	}

	/// Most recent session handed out, created or restored.
	pub fn last_session(&self) -> Option<Arc<FakeSession>> {
		self.sessions.lock().last().cloned()
	}

	fn remember(&self, session: FakeSession) -> SessionHandle {
		let session = Arc::new(session);
		self.sessions.lock().push(Arc::clone(&session));
		if self.snapshot_fails.load(Ordering::SeqCst) {
			return Arc::new(SnapshotlessSession(session));
		}
		session
	}
}

#[async_trait]
impl AssignmentClient for FakeAssignmentClient {
	async fn create_session(&self, unit_ids: &UnitIds) -> anyhow::Result<SessionHandle> {
		self.create_calls.fetch_add(1, Ordering::SeqCst);
		if self.create_fails.load(Ordering::SeqCst) {
			bail!("connection refused");
		}
		let mut session = FakeSession::new(unit_ids.clone(), self.data.lock().clone()).with_ready(*self.ready.lock());
		for (experiment, variant) in self.assignments.lock().iter() {
			session = session.with_assignment(experiment, *variant);
		}
		Ok(self.remember(session))
	}

	fn session_from_snapshot(&self, unit_ids: &UnitIds, snapshot: &ContextSnapshot) -> anyhow::Result<SessionHandle> {
		self.restore_calls.fetch_add(1, Ordering::SeqCst);
		if self.restore_fails.load(Ordering::SeqCst) {
			bail!("snapshot rejected");
		}
		let map = snapshot.as_map();
		let data: ExperimentData = serde_json::from_value(map.get("experiments").cloned().ok_or_else(|| anyhow!("snapshot missing experiments"))?)?;
		let assignments: HashMap<String, i64> = serde_json::from_value(map.get("assignments").cloned().unwrap_or_else(|| json!({})))?;

		let mut session = FakeSession::new(unit_ids.clone(), data);
		session.restored = true;
		for (experiment, variant) in assignments {
			session = session.with_assignment(&experiment, variant);
		}
		Ok(self.remember(session))
	}
}

/// Wraps a fake session whose snapshot capture always fails.
struct SnapshotlessSession(Arc<FakeSession>);

#[async_trait]
impl Session for SnapshotlessSession {
	fn unit_ids(&self) -> &UnitIds {
		self.0.unit_ids()
	}

	fn set_override(&self, experiment: &str, variant: i64) -> anyhow::Result<()> {
		self.0.set_override(experiment, variant)
	}

	fn set_attributes(&self, attributes: &BTreeMap<String, Value>) -> anyhow::Result<()> {
		self.0.set_attributes(attributes)
	}

	async fn ready(&self) -> anyhow::Result<()> {
		self.0.ready().await
	}

	fn peek(&self, experiment: &str) -> anyhow::Result<Option<i64>> {
		self.0.peek(experiment)
	}

	fn treatment(&self, experiment: &str) -> anyhow::Result<i64> {
		self.0.treatment(experiment)
	}

	fn experiment_data(&self) -> anyhow::Result<ExperimentData> {
		self.0.experiment_data()
	}

	fn snapshot(&self) -> anyhow::Result<ContextSnapshot> {
		bail!("session state is not serializable")
	}

	async fn publish(&self) -> anyhow::Result<()> {
		self.0.publish().await
	}
}

/// Key-value store backed by a map, with switchable write failures.
#[derive(Default)]
pub struct MemoryKeyValueStore {
	values: Mutex<HashMap<String, String>>,
	fail_writes: AtomicBool,
	write_attempts: AtomicUsize,
	delete_delay: Mutex<Duration>,
}

impl MemoryKeyValueStore {
	pub fn get(&self, key: &str) -> Option<String> {
		self.values.lock().get(key).cloned()
	}

	pub fn fail_writes(&self, fail: bool) {
		self.fail_writes.store(fail, Ordering::SeqCst);
	}

	/// Holds every delete for `delay` before it is applied.
	pub fn delay_deletes(&self, delay: Duration) {
		*self.delete_delay.lock() = delay;
	}

	/// Every `set` call, successful or not.
	pub fn write_attempts(&self) -> usize {
		self.write_attempts.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
	async fn set(&self, key: &str, value: Option<String>) -> anyhow::Result<()> {
		self.write_attempts.fetch_add(1, Ordering::SeqCst);
		if self.fail_writes.load(Ordering::SeqCst) {
			bail!("store unavailable");
		}
		let delay = *self.delete_delay.lock();
		if value.is_none() && !delay.is_zero() {
			tokio::time::sleep(delay).await;
		}
		let mut values = self.values.lock();
		match value {
			Some(value) => values.insert(key.to_string(), value),
			None => values.remove(key),
		};
		Ok(())
	}
}
