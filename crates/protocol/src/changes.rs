//! Declarative change shape consumed by the downstream mutation engine.
//!
//! The context layer never applies changes; it only reads them from variant
//! configuration and inspects `trigger_on_view` for the exposure policy.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key under which a variant's configuration carries its declarative changes.
pub const CHANGES_CONFIG_KEY: &str = "__dom_changes";

/// One declarative change attached to a variant.
///
/// Fields this layer does not interpret are kept in `extra` so they reach the
/// mutation engine untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclarativeChange {
	pub selector: String,
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub value: Value,
	#[serde(default, alias = "triggerOnView", skip_serializing_if = "Option::is_none")]
	pub trigger_on_view: Option<bool>,
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

impl DeclarativeChange {
	/// Returns true when exposure for this change is deferred until the
	/// target element is viewed. Absent flag means immediate.
	pub fn deferred_until_view(&self) -> bool {
		self.trigger_on_view == Some(true)
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn accepts_camel_case_trigger_flag() {
		let change: DeclarativeChange = serde_json::from_value(json!({
			"selector": ".hero",
			"type": "text",
			"value": "Hello",
			"triggerOnView": true
		}))
		.unwrap();
		assert_eq!(change.kind, "text");
		assert!(change.deferred_until_view());
	}

	#[test]
	fn missing_trigger_flag_is_immediate() {
		let change: DeclarativeChange = serde_json::from_value(json!({
			"selector": ".hero",
			"type": "style",
			"value": {"color": "red"}
		}))
		.unwrap();
		assert_eq!(change.trigger_on_view, None);
		assert!(!change.deferred_until_view());
	}

	#[test]
	fn unknown_fields_survive_round_trip() {
		let change: DeclarativeChange = serde_json::from_value(json!({
			"selector": "#cta",
			"type": "attribute",
			"value": "x",
			"waitForElement": true
		}))
		.unwrap();
		assert_eq!(change.extra["waitForElement"], true);
		let out = serde_json::to_value(&change).unwrap();
		assert_eq!(out["waitForElement"], true);
		assert!(out.get("trigger_on_view").is_none());
	}
}
