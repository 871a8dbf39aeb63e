use serde::Serialize;
use time::OffsetDateTime;

use intelli_domain::quota::{self, QuotaWindow};
use intelli_storage::{models::RateLimitRecord, time_serde};

use crate::{Result, TutorService};

/// Outcome of a quota check. `limit`, `remaining` and `reset_at` are `None` for exempt roles.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QuotaStatus {
	pub allowed: bool,
	pub exempt: bool,
	pub remaining: Option<u32>,
	pub limit: Option<u32>,
	#[serde(with = "time_serde::option")]
	pub reset_at: Option<OffsetDateTime>,
	pub message: Option<String>,
}
impl QuotaStatus {
	fn unlimited() -> Self {
		Self { allowed: true, exempt: true, remaining: None, limit: None, reset_at: None, message: None }
	}
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UsageStats {
	pub used: u32,
	pub limit: Option<u32>,
	pub remaining: Option<u32>,
	#[serde(with = "time_serde::option")]
	pub reset_at: Option<OffsetDateTime>,
	pub is_limited: bool,
}

impl TutorService {
	pub async fn check_rate_limit(&self, user_id: &str, role: &str) -> Result<QuotaStatus> {
		self.check_rate_limit_at(user_id, role, OffsetDateTime::now_utc()).await
	}

	/// Loads or creates the user's window and resets it when it has elapsed. Exempt roles never
	/// get a record.
	pub async fn check_rate_limit_at(
		&self,
		user_id: &str,
		role: &str,
		now: OffsetDateTime,
	) -> Result<QuotaStatus> {
		let cfg = &self.cfg.rate_limit;

		if quota::is_exempt(role, &cfg.exempt_roles) {
			return Ok(QuotaStatus::unlimited());
		}

		let window = self.load_window(user_id, now).await?;

		Ok(self.status_for(&window, now))
	}

	pub async fn increment_rate_limit(&self, user_id: &str, role: &str) -> Result<QuotaStatus> {
		self.increment_rate_limit_at(user_id, role, OffsetDateTime::now_utc()).await
	}

	/// Counts one delivered message. Read-modify-write without a lock: two concurrent turns of
	/// the same user can both pass the check and both be counted.
	pub async fn increment_rate_limit_at(
		&self,
		user_id: &str,
		role: &str,
		now: OffsetDateTime,
	) -> Result<QuotaStatus> {
		let cfg = &self.cfg.rate_limit;

		if quota::is_exempt(role, &cfg.exempt_roles) {
			return Ok(QuotaStatus::unlimited());
		}

		let mut window = self.load_window(user_id, now).await?;

		window.record_message(cfg.daily_quota);

		self.stores.rate_limits.put(&to_record(user_id, &window, now)).await?;

		tracing::debug!(
			user_id = %user_id,
			message_count = window.message_count,
			is_limited = window.is_limited,
			"Rate limit incremented."
		);

		let mut status = self.status_for(&window, now);

		// The message that exhausted the quota was still delivered.
		status.allowed = true;
		status.message = None;

		Ok(status)
	}

	pub async fn usage(&self, user_id: &str, role: &str) -> Result<UsageStats> {
		let now = OffsetDateTime::now_utc();
		let cfg = &self.cfg.rate_limit;

		if quota::is_exempt(role, &cfg.exempt_roles) {
			return Ok(UsageStats {
				used: 0,
				limit: None,
				remaining: None,
				reset_at: None,
				is_limited: false,
			});
		}

		let window = self.load_window(user_id, now).await?;

		Ok(UsageStats {
			used: u32::try_from(window.message_count.max(0)).unwrap_or(u32::MAX),
			limit: Some(cfg.daily_quota),
			remaining: Some(window.remaining(cfg.daily_quota)),
			reset_at: Some(window.reset_at(quota::window_length(cfg))),
			is_limited: window.is_exhausted(cfg.daily_quota),
		})
	}

	/// Returns the current window, persisting it when it was created or reset.
	async fn load_window(&self, user_id: &str, now: OffsetDateTime) -> Result<QuotaWindow> {
		let length = quota::window_length(&self.cfg.rate_limit);
		let (mut window, created) = match self.stores.rate_limits.get(user_id).await? {
			Some(record) => (from_record(&record), false),
			None => (QuotaWindow::fresh(now), true),
		};
		let reset = window.refresh(length, now);

		if created || reset {
			self.stores.rate_limits.put(&to_record(user_id, &window, now)).await?;

			if reset {
				tracing::info!(user_id = %user_id, "Rate limit window reset.");
			}
		}

		Ok(window)
	}

	fn status_for(&self, window: &QuotaWindow, now: OffsetDateTime) -> QuotaStatus {
		let cfg = &self.cfg.rate_limit;
		let reset_at = window.reset_at(quota::window_length(cfg));
		let allowed = !window.is_exhausted(cfg.daily_quota);

		QuotaStatus {
			allowed,
			exempt: false,
			remaining: Some(window.remaining(cfg.daily_quota)),
			limit: Some(cfg.daily_quota),
			reset_at: Some(reset_at),
			message: (!allowed).then(|| quota::exhausted_message(cfg.daily_quota, reset_at, now)),
		}
	}
}

fn from_record(record: &RateLimitRecord) -> QuotaWindow {
	QuotaWindow {
		message_count: record.message_count,
		window_start: record.window_start,
		last_reset: record.last_reset,
		is_limited: record.is_limited,
	}
}

fn to_record(user_id: &str, window: &QuotaWindow, now: OffsetDateTime) -> RateLimitRecord {
	RateLimitRecord {
		user_id: user_id.to_string(),
		message_count: window.message_count,
		window_start: window.window_start,
		last_reset: window.last_reset,
		is_limited: window.is_limited,
		updated_at: now,
	}
}
