//! Experiment data as reported by a resolved session, and the extracted
//! per-experiment record handed to the mutation engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::changes::{CHANGES_CONFIG_KEY, DeclarativeChange};

/// Experiment listing reported by a ready session, in assignment-service order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentData {
	#[serde(default)]
	pub experiments: Vec<ExperimentInfo>,
}

impl ExperimentData {
	pub fn is_empty(&self) -> bool {
		self.experiments.is_empty()
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentInfo {
	pub name: String,
	#[serde(default)]
	pub variants: Vec<VariantInfo>,
}

/// A single variant of an experiment.
///
/// `config` arrives either as a JSON object or as a JSON-encoded string of
/// one; both forms are accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantInfo {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub config: Option<Value>,
}

impl VariantInfo {
	/// Parses the declarative changes carried in this variant's configuration.
	///
	/// Absent configuration, an empty string, or a configuration without the
	/// changes key all yield an empty list. Malformed JSON is an error.
	pub fn changes(&self) -> Result<Vec<DeclarativeChange>, serde_json::Error> {
		let config = match &self.config {
			None | Some(Value::Null) => return Ok(Vec::new()),
			Some(Value::String(raw)) if raw.trim().is_empty() => return Ok(Vec::new()),
			Some(Value::String(raw)) => serde_json::from_str::<Value>(raw)?,
			Some(other) => other.clone(),
		};

		match config.get(CHANGES_CONFIG_KEY) {
			None | Some(Value::Null) => Ok(Vec::new()),
			Some(changes) => serde_json::from_value(changes.clone()),
		}
	}
}

/// Extracted assignment for one experiment, ready for the mutation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentRecord {
	pub name: String,
	pub treatment: i64,
	pub variant_label: String,
	#[serde(default)]
	pub changes: Vec<DeclarativeChange>,
}
