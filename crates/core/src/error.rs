use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	/// The breaker is open; no upstream call was attempted.
	#[error("circuit breaker is open")]
	CircuitOpen,

	#[error("session not ready after {ms}ms")]
	Timeout { ms: u64 },

	#[error("assignment service failed: {0}")]
	Upstream(#[source] anyhow::Error),

	/// Snapshot rehydration failed. Always recovered by creating a fresh session.
	#[error("cached snapshot could not be reconstructed: {0}")]
	CacheReconstruction(String),

	/// One experiment could not be extracted. Always recovered by skipping it.
	#[error("experiment extraction failed for {experiment}: {message}")]
	Extraction { experiment: String, message: String },

	#[error("publish failed: {0}")]
	Publish(#[source] anyhow::Error),

	#[error("invalid input: {0}")]
	InvalidInput(String),

	#[error("invalid configuration: {0}")]
	Config(String),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Whether this error is always handled inside the crate and never
	/// surfaces from the public entry points.
	pub fn is_recoverable_locally(&self) -> bool {
		matches!(self, Error::CacheReconstruction(_) | Error::Extraction { .. })
	}

	/// Whether this error should count against the circuit breaker.
	pub fn counts_as_upstream_failure(&self) -> bool {
		matches!(self, Error::Timeout { .. } | Error::Upstream(_))
	}

	pub(crate) fn extraction(experiment: &str, message: impl std::fmt::Display) -> Self {
		Error::Extraction {
			experiment: experiment.to_string(),
			message: message.to_string(),
		}
	}
}
