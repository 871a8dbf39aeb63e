use serde::{Deserialize, Serialize};

use intelli_domain::stages;

use crate::rate_limit::QuotaStatus;

/// Caller identity as asserted by the upstream auth layer.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Identity {
	pub user_id: String,
	pub email: Option<String>,
	pub role: String,
	pub current_stage: i32,
}

/// Where the learner was when they asked.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PageContext {
	#[serde(default)]
	pub page_path: Option<String>,
	#[serde(default)]
	pub course_id: Option<String>,
	#[serde(default)]
	pub stage_id: Option<i32>,
	/// Text the learner highlighted before asking.
	#[serde(default)]
	pub selected_text: Option<String>,
}
impl PageContext {
	pub fn selected_text(&self) -> Option<&str> {
		self.selected_text.as_deref().map(str::trim).filter(|text| !text.is_empty())
	}
}

#[derive(Clone, Debug)]
pub struct RequestContext {
	pub identity: Identity,
	pub accessible_stage_ids: Vec<i32>,
	pub page: PageContext,
	/// Filled in once the rate limiter has been consulted.
	pub quota: Option<QuotaStatus>,
}
impl RequestContext {
	pub fn new(identity: Identity, page: PageContext) -> Self {
		let accessible_stage_ids = stages::accessible_stage_ids(identity.current_stage);

		Self { identity, accessible_stage_ids, page, quota: None }
	}

	pub fn user_id(&self) -> &str {
		&self.identity.user_id
	}

	pub fn role(&self) -> &str {
		&self.identity.role
	}
}
