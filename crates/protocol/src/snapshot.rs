//! Serialized session state used to rehydrate a session without a new
//! upstream call.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque session snapshot.
///
/// The contents belong to the assignment service; this layer only requires
/// that a snapshot is a JSON object. Anything else fails to deserialize, so a
/// malformed cache entry is treated as a miss rather than handed to the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextSnapshot(pub Map<String, Value>);

impl ContextSnapshot {
	/// Validates an arbitrary JSON value as a snapshot.
	pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
		serde_json::from_value(value)
	}

	pub fn as_map(&self) -> &Map<String, Value> {
		&self.0
	}
}

/// Record mirrored to the external key-value store for each cached snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSnapshot {
	pub data: ContextSnapshot,
	/// Unix epoch milliseconds at which the snapshot was captured.
	pub created_at_ms: u64,
	pub ttl_ms: u64,
}
