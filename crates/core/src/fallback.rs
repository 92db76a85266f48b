//! Degraded session substituted while the assignment service is unavailable.

use std::collections::BTreeMap;

use async_trait::async_trait;
use edge_context_protocol::{ContextSnapshot, ExperimentData, UnitIds};
use serde_json::Value;

use crate::client::Session;

/// Session bound to the caller's unit ids that carries no experiments.
///
/// Every experiment reads as unassigned, so callers render the control
/// experience. Publishing has nothing to flush and always succeeds.
#[derive(Debug, Clone)]
pub struct FallbackSession {
	unit_ids: UnitIds,
}

impl FallbackSession {
	pub fn new(unit_ids: UnitIds) -> Self {
		Self { unit_ids }
	}
}

#[async_trait]
impl Session for FallbackSession {
	fn unit_ids(&self) -> &UnitIds {
		&self.unit_ids
	}

	fn set_override(&self, _experiment: &str, _variant: i64) -> anyhow::Result<()> {
		Ok(())
	}

	fn set_attributes(&self, _attributes: &BTreeMap<String, Value>) -> anyhow::Result<()> {
		Ok(())
	}

	async fn ready(&self) -> anyhow::Result<()> {
		Ok(())
	}

	fn peek(&self, _experiment: &str) -> anyhow::Result<Option<i64>> {
		Ok(None)
	}

	fn treatment(&self, _experiment: &str) -> anyhow::Result<i64> {
		Ok(0)
	}

	fn experiment_data(&self) -> anyhow::Result<ExperimentData> {
		Ok(ExperimentData::default())
	}

	fn snapshot(&self) -> anyhow::Result<ContextSnapshot> {
		Ok(ContextSnapshot::default())
	}

	async fn publish(&self) -> anyhow::Result<()> {
		Ok(())
	}
}
