#![allow(dead_code)]

use std::sync::{Arc, Once};

use edge_context::protocol::{ExperimentData, ExperimentInfo, VariantInfo};
use edge_context::testing::FakeAssignmentClient;
use edge_context::{ContextManager, ContextManagerConfig};
use serde_json::{Value, json};

static LOGGING: Once = Once::new();

/// Routes crate logs to the test harness; honours `RUST_LOG`.
pub fn init_logging() {
	LOGGING.call_once(|| {
		let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
		let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
	});
}

pub fn change(selector: &str, trigger_on_view: Option<bool>) -> Value {
	let mut change = json!({"selector": selector, "type": "text", "value": "changed"});
	if let Some(flag) = trigger_on_view {
		change["trigger_on_view"] = json!(flag);
	}
	change
}

pub fn variant(name: &str, changes: Vec<Value>) -> VariantInfo {
	VariantInfo {
		name: Some(name.to_string()),
		config: Some(Value::String(json!({ "__dom_changes": changes }).to_string())),
	}
}

/// Three experiments: one immediate, one deferred until view, one without variants.
pub fn catalog() -> ExperimentData {
	ExperimentData {
		experiments: vec![
			ExperimentInfo {
				name: "headline".into(),
				variants: vec![variant("control", vec![]), variant("bold", vec![change("h1", None)])],
			},
			ExperimentInfo {
				name: "footer".into(),
				variants: vec![
					variant("control", vec![change("footer", Some(true))]),
					variant("compact", vec![change("footer", Some(true))]),
				],
			},
			ExperimentInfo {
				name: "server_only".into(),
				variants: vec![],
			},
		],
	}
}

pub fn client() -> Arc<FakeAssignmentClient> {
	let client = Arc::new(FakeAssignmentClient::new());
	client.set_experiments(catalog());
	client.assign("headline", 1);
	client.assign("footer", 1);
	client
}

pub fn config() -> ContextManagerConfig {
	ContextManagerConfig::from_json_str(
		r#"{
			"cacheTtlSecs": 300,
			"creationTimeoutMs": 2000,
			"breaker": { "failureThreshold": 3, "resetTimeoutMs": 60000 }
		}"#,
	)
	.expect("test config should parse")
}

pub fn manager(client: &Arc<FakeAssignmentClient>) -> ContextManager {
	init_logging();
	ContextManager::new(config(), client.clone(), None)
}
