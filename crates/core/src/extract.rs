//! Per-experiment treatment and declarative-change extraction.
//!
//! Treatments are read with a non-counting peek. Exposure is only registered,
//! through the counting [`Session::treatment`] call, when the caller asks for
//! immediate tracking and the experiment's changes cannot wait for a view
//! trigger.

use edge_context_protocol::{ExperimentInfo, ExperimentRecord};
use tracing::{debug, warn};

use crate::client::Session;
use crate::error::{Error, Result};

/// Extracts records for every eligible experiment, in session order.
///
/// Failures are contained per experiment: the offending experiment is logged
/// and skipped, so the worst case is a shorter list.
pub fn extract_experiment_data(session: &dyn Session, track_immediately: bool) -> Vec<ExperimentRecord> {
	let data = match session.experiment_data() {
		Ok(data) => data,
		Err(err) => {
			warn!(target = "edge_context.extract", error = %err, "experiment data unavailable; nothing extracted");
			return Vec::new();
		}
	};

	if data.is_empty() {
		debug!(target = "edge_context.extract", "session carries no experiments");
		return Vec::new();
	}

	let mut records = Vec::with_capacity(data.experiments.len());
	for experiment in &data.experiments {
		match extract_one(session, experiment, track_immediately) {
			Ok(Some(record)) => records.push(record),
			Ok(None) => {}
			Err(err) => warn!(target = "edge_context.extract", experiment = %experiment.name, error = %err, "skipping experiment"),
		}
	}
	records
}

/// Whether exposure must be registered as soon as the treatment is applied.
///
/// True for experiments without variants, and for any experiment where some
/// variant carries a change not deferred until view.
pub fn requires_immediate_tracking(experiment: &ExperimentInfo) -> Result<bool> {
	if experiment.variants.is_empty() {
		return Ok(true);
	}
	for variant in &experiment.variants {
		let changes = variant.changes().map_err(|e| Error::extraction(&experiment.name, e))?;
		if changes.iter().any(|change| !change.deferred_until_view()) {
			return Ok(true);
		}
	}
	Ok(false)
}

fn extract_one(session: &dyn Session, experiment: &ExperimentInfo, track_immediately: bool) -> Result<Option<ExperimentRecord>> {
	let name = experiment.name.as_str();
	let treatment = match session.peek(name).map_err(|e| Error::extraction(name, e))? {
		Some(treatment) if treatment >= 0 => treatment,
		_ => {
			debug!(target = "edge_context.extract", experiment = name, "not eligible");
			return Ok(None);
		}
	};

	let Some(variant) = usize::try_from(treatment).ok().and_then(|index| experiment.variants.get(index)) else {
		warn!(
			target = "edge_context.extract",
			experiment = name,
			treatment,
			variants = experiment.variants.len(),
			"treatment out of range; skipping"
		);
		return Ok(None);
	};

	let changes = variant.changes().map_err(|e| Error::extraction(name, e))?;

	if track_immediately && requires_immediate_tracking(experiment)? {
		session.treatment(name).map_err(|e| Error::extraction(name, e))?;
		debug!(target = "edge_context.extract", experiment = name, treatment, "exposure registered");
	}

	Ok(Some(ExperimentRecord {
		name: experiment.name.clone(),
		treatment,
		variant_label: variant.name.clone().unwrap_or_else(|| treatment.to_string()),
		changes,
	}))
}
