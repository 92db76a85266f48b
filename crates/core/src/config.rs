//! Tunables for the context manager.
//!
//! Values load from JSON (camelCase keys, every field optional) or from
//! `EDGE_CONTEXT_*` environment variables. Non-positive cache TTLs fall back
//! to [`DEFAULT_CACHE_TTL_SECS`]; larger ones are capped at [`MAX_CACHE_TTL_SECS`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_CACHE_TTL_SECS: i64 = 300;
/// Upper bound on snapshot lifetime (30 days); keeps deadline arithmetic finite.
pub const MAX_CACHE_TTL_SECS: i64 = 30 * 24 * 60 * 60;
pub const DEFAULT_CREATION_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_RESET_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_CLEANUP_INTERVAL_FLOOR_MS: u64 = 60_000;

const ENV_PREFIX: &str = "EDGE_CONTEXT_";

/// Connection identifiers handed to the assignment-service client as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
	#[serde(default)]
	pub endpoint: String,
	#[serde(default)]
	pub api_key: String,
	#[serde(default)]
	pub environment: String,
	#[serde(default)]
	pub application: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerConfig {
	/// Consecutive failures that trip the breaker.
	#[serde(default = "default_failure_threshold")]
	pub failure_threshold: u32,
	/// Delay before an open breaker permits a trial call.
	#[serde(default = "default_reset_timeout_ms")]
	pub reset_timeout_ms: u64,
}

impl Default for BreakerConfig {
	fn default() -> Self {
		Self {
			failure_threshold: DEFAULT_FAILURE_THRESHOLD,
			reset_timeout_ms: DEFAULT_RESET_TIMEOUT_MS,
		}
	}
}

impl BreakerConfig {
	pub fn reset_timeout(&self) -> Duration {
		Duration::from_millis(self.reset_timeout_ms)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextManagerConfig {
	#[serde(default)]
	pub client: ClientConfig,
	#[serde(default = "default_cache_ttl_secs")]
	pub cache_ttl_secs: i64,
	#[serde(default = "default_creation_timeout_ms")]
	pub creation_timeout_ms: u64,
	#[serde(default)]
	pub breaker: BreakerConfig,
	#[serde(default = "default_cleanup_interval_floor_ms")]
	pub cleanup_interval_floor_ms: u64,
}

impl Default for ContextManagerConfig {
	fn default() -> Self {
		Self {
			client: ClientConfig::default(),
			cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
			creation_timeout_ms: DEFAULT_CREATION_TIMEOUT_MS,
			breaker: BreakerConfig::default(),
			cleanup_interval_floor_ms: DEFAULT_CLEANUP_INTERVAL_FLOOR_MS,
		}
	}
}

impl ContextManagerConfig {
	pub fn from_json_str(raw: &str) -> Result<Self> {
		serde_json::from_str(raw).map_err(|e| Error::Config(e.to_string()))
	}

	/// Reads the process environment.
	pub fn from_env() -> Result<Self> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	/// Builds a config from `EDGE_CONTEXT_*` keys resolved through `lookup`.
	pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
		let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty());
		let mut config = Self::default();

		if let Some(v) = get("ENDPOINT") {
			config.client.endpoint = v;
		}
		if let Some(v) = get("API_KEY") {
			config.client.api_key = v;
		}
		if let Some(v) = get("ENVIRONMENT") {
			config.client.environment = v;
		}
		if let Some(v) = get("APPLICATION") {
			config.client.application = v;
		}
		if let Some(v) = get("CACHE_TTL_SECS") {
			config.cache_ttl_secs = parse_number("CACHE_TTL_SECS", &v)?;
		}
		if let Some(v) = get("CREATION_TIMEOUT_MS") {
			config.creation_timeout_ms = parse_number("CREATION_TIMEOUT_MS", &v)?;
		}
		if let Some(v) = get("FAILURE_THRESHOLD") {
			config.breaker.failure_threshold = parse_number("FAILURE_THRESHOLD", &v)?;
		}
		if let Some(v) = get("RESET_TIMEOUT_MS") {
			config.breaker.reset_timeout_ms = parse_number("RESET_TIMEOUT_MS", &v)?;
		}
		if let Some(v) = get("CLEANUP_INTERVAL_FLOOR_MS") {
			config.cleanup_interval_floor_ms = parse_number("CLEANUP_INTERVAL_FLOOR_MS", &v)?;
		}

		Ok(config)
	}

	/// Effective snapshot lifetime.
	pub fn cache_ttl(&self) -> Duration {
		let secs = if self.cache_ttl_secs > 0 { self.cache_ttl_secs.min(MAX_CACHE_TTL_SECS) } else { DEFAULT_CACHE_TTL_SECS };
		Duration::from_secs(secs as u64)
	}

	pub fn creation_timeout(&self) -> Duration {
		Duration::from_millis(self.creation_timeout_ms)
	}

	/// Sweep period: the TTL, but never shorter than the configured floor.
	pub fn cleanup_interval(&self) -> Duration {
		self.cache_ttl().max(Duration::from_millis(self.cleanup_interval_floor_ms))
	}
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T>
where
	T::Err: std::fmt::Display,
{
	raw.trim()
		.parse()
		.map_err(|e| Error::Config(format!("{ENV_PREFIX}{name}={raw:?}: {e}")))
}

fn default_cache_ttl_secs() -> i64 {
	DEFAULT_CACHE_TTL_SECS
}

fn default_creation_timeout_ms() -> u64 {
	DEFAULT_CREATION_TIMEOUT_MS
}

fn default_failure_threshold() -> u32 {
	DEFAULT_FAILURE_THRESHOLD
}

fn default_reset_timeout_ms() -> u64 {
	DEFAULT_RESET_TIMEOUT_MS
}

fn default_cleanup_interval_floor_ms() -> u64 {
	DEFAULT_CLEANUP_INTERVAL_FLOOR_MS
}
