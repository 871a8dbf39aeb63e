use time::{Duration, OffsetDateTime};

/// Per-user message window. The window is anchored at `window_start` and never aligned to
/// calendar days.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaWindow {
	pub message_count: i32,
	pub window_start: OffsetDateTime,
	pub last_reset: OffsetDateTime,
	pub is_limited: bool,
}
impl QuotaWindow {
	pub fn fresh(now: OffsetDateTime) -> Self {
		Self { message_count: 0, window_start: now, last_reset: now, is_limited: false }
	}

	pub fn reset_at(&self, window: Duration) -> OffsetDateTime {
		self.window_start + window
	}

	/// Starts a new window when the stored one has elapsed. Returns whether a reset happened.
	pub fn refresh(&mut self, window: Duration, now: OffsetDateTime) -> bool {
		if now < self.reset_at(window) {
			return false;
		}

		self.message_count = 0;
		self.window_start = now;
		self.last_reset = now;
		self.is_limited = false;

		true
	}

	pub fn remaining(&self, limit: u32) -> u32 {
		let used = u32::try_from(self.message_count.max(0)).unwrap_or(u32::MAX);

		limit.saturating_sub(used)
	}

	pub fn is_exhausted(&self, limit: u32) -> bool {
		i64::from(self.message_count) >= i64::from(limit)
	}

	pub fn record_message(&mut self, limit: u32) {
		self.message_count = self.message_count.saturating_add(1);
		self.is_limited = self.is_exhausted(limit);
	}
}

pub fn window_length(cfg: &intelli_config::RateLimit) -> Duration {
	Duration::hours(cfg.window_hours.clamp(1, intelli_config::MAX_WINDOW_HOURS))
}

pub fn is_exempt(role: &str, exempt_roles: &[String]) -> bool {
	let role = role.trim();

	exempt_roles.iter().any(|exempt| exempt.eq_ignore_ascii_case(role))
}

pub fn exhausted_message(limit: u32, reset_at: OffsetDateTime, now: OffsetDateTime) -> String {
	let wait = (reset_at - now).max(Duration::ZERO);
	let hours = wait.whole_hours();
	let minutes = wait.whole_minutes() - hours * 60;

	format!(
		"You have used all {limit} tutor messages for this 24-hour window. Your quota resets in {hours} hours and {minutes} minutes; until then, review your stage material or ask your instructor."
	)
}
