//! Unit identifiers a session is bound to.

use serde::{Deserialize, Serialize};

/// Composite unit identifiers attached to every assignment session.
///
/// `session_id` is derived from `user_id` by the context layer so that
/// repeated sessions for the same user bucket identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitIds {
	pub user_id: String,
	pub session_id: String,
}

impl UnitIds {
	pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
		Self {
			user_id: user_id.into(),
			session_id: session_id.into(),
		}
	}
}
