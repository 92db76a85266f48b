//! Live session creation against the assignment service.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use edge_context_protocol::UnitIds;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::breaker::CircuitBreaker;
use crate::client::{AssignmentClient, SessionHandle};
use crate::error::{Error, Result};

/// Inputs for creating (or reusing) a session for one user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateContextRequest {
	pub user_id: String,
	/// Experiment name to forced variant index.
	pub overrides: BTreeMap<String, i64>,
	/// Targeting attributes.
	pub attributes: BTreeMap<String, Value>,
}

impl CreateContextRequest {
	pub fn new(user_id: impl Into<String>) -> Self {
		Self {
			user_id: user_id.into(),
			..Default::default()
		}
	}

	pub fn with_override(mut self, experiment: impl Into<String>, variant: i64) -> Self {
		self.overrides.insert(experiment.into(), variant);
		self
	}

	pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
		self.attributes.insert(name.into(), value.into());
		self
	}

	/// Unit identifiers for this request's user.
	pub fn unit_ids(&self) -> UnitIds {
		UnitIds::new(self.user_id.clone(), derive_session_id(&self.user_id))
	}
}

/// Stable session id for `user_id`: hex of the first 16 bytes of its SHA-256.
pub fn derive_session_id(user_id: &str) -> String {
	let digest = Sha256::digest(user_id.as_bytes());
	hex::encode(&digest[..16])
}

pub struct SessionFactory {
	client: Arc<dyn AssignmentClient>,
	breaker: Arc<CircuitBreaker>,
	timeout: Duration,
}

impl SessionFactory {
	pub fn new(client: Arc<dyn AssignmentClient>, breaker: Arc<CircuitBreaker>, timeout: Duration) -> Self {
		Self { client, breaker, timeout }
	}

	/// Creates a ready session or fails with `CircuitOpen`, `Timeout`,
	/// `Upstream` or `InvalidInput`. Only upstream failures and timeouts are
	/// recorded as breaker failures.
	///
	/// The readiness deadline drops the local wait only; whatever the client
	/// started upstream is left to finish or fail on its own.
	pub async fn create_context(&self, request: &CreateContextRequest) -> Result<SessionHandle> {
		if request.user_id.is_empty() {
			return Err(Error::InvalidInput("user id must not be empty".to_string()));
		}
		if self.breaker.is_open() {
			debug!(target = "edge_context.factory", user_id = %request.user_id, "breaker open; refusing upstream call");
			return Err(Error::CircuitOpen);
		}

		match self.build(request).await {
			Ok(session) => {
				self.breaker.record_success();
				Ok(session)
			}
			Err(err) => {
				warn!(target = "edge_context.factory", user_id = %request.user_id, error = %err, "session creation failed");
				if err.counts_as_upstream_failure() {
					self.breaker.record_failure();
				}
				Err(err)
			}
		}
	}

	async fn build(&self, request: &CreateContextRequest) -> Result<SessionHandle> {
		let unit_ids = request.unit_ids();
		let session = self.client.create_session(&unit_ids).await.map_err(Error::Upstream)?;

		for (experiment, variant) in &request.overrides {
			if *variant < 0 {
				return Err(Error::InvalidInput(format!("override for {experiment} must be a variant index, got {variant}")));
			}
			session.set_override(experiment, *variant).map_err(Error::Upstream)?;
		}
		if !request.attributes.is_empty() {
			session.set_attributes(&request.attributes).map_err(Error::Upstream)?;
		}

		match tokio::time::timeout(self.timeout, session.ready()).await {
			Ok(Ok(())) => {
				debug!(target = "edge_context.factory", user_id = %unit_ids.user_id, "session ready");
				Ok(session)
			}
			Ok(Err(err)) => Err(Error::Upstream(err)),
			Err(_) => Err(Error::Timeout {
				ms: self.timeout.as_millis() as u64,
			}),
		}
	}
}
