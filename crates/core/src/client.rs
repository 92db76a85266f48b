//! Contracts for the external collaborators this layer drives.
//!
//! The assignment service and the key-value store are owned elsewhere; the
//! context layer only depends on these traits. Collaborator failures are
//! reported as [`anyhow::Error`] and wrapped into typed [`crate::Error`]
//! variants at the crate boundary.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use edge_context_protocol::{ContextSnapshot, ExperimentData, UnitIds};
use serde_json::Value;

/// Shared handle to a live session. The manager never keeps one across calls.
pub type SessionHandle = Arc<dyn Session>;

/// A resolved or resolving set of experiment assignments for one unit.
#[async_trait]
pub trait Session: Send + Sync {
	/// Unit identifiers this session is bound to.
	fn unit_ids(&self) -> &UnitIds;

	/// Forces `experiment` to `variant` for this session.
	fn set_override(&self, experiment: &str, variant: i64) -> anyhow::Result<()>;

	/// Attaches targeting attributes.
	fn set_attributes(&self, attributes: &BTreeMap<String, Value>) -> anyhow::Result<()>;

	/// Resolves once assignments are available.
	async fn ready(&self) -> anyhow::Result<()>;

	/// Reads the assigned variant without recording exposure.
	fn peek(&self, experiment: &str) -> anyhow::Result<Option<i64>>;

	/// Reads the assigned variant and records an exposure event.
	fn treatment(&self, experiment: &str) -> anyhow::Result<i64>;

	/// Experiments in assignment-service order.
	fn experiment_data(&self) -> anyhow::Result<ExperimentData>;

	/// Captures serializable state sufficient to rebuild this session.
	fn snapshot(&self) -> anyhow::Result<ContextSnapshot>;

	/// Flushes buffered exposure/goal events upstream.
	async fn publish(&self) -> anyhow::Result<()>;
}

/// Client for the external experiment-assignment service.
#[async_trait]
pub trait AssignmentClient: Send + Sync {
	/// Starts a new session; readiness is awaited separately via [`Session::ready`].
	async fn create_session(&self, unit_ids: &UnitIds) -> anyhow::Result<SessionHandle>;

	/// Rebuilds a ready session from a snapshot, bound to `unit_ids`, without
	/// an upstream call.
	fn session_from_snapshot(&self, unit_ids: &UnitIds, snapshot: &ContextSnapshot) -> anyhow::Result<SessionHandle>;
}

/// Best-effort external key-value store that mirrors cached snapshots.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
	/// Writes `value` under `key`; `None` deletes.
	async fn set(&self, key: &str, value: Option<String>) -> anyhow::Result<()>;
}
