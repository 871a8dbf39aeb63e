use time::{Duration, OffsetDateTime};

use intelli_service::RateLimitStore;
use intelli_storage::models::RateLimitRecord;

use super::suite;

fn record(user_id: &str, message_count: i32, window_start: OffsetDateTime) -> RateLimitRecord {
	RateLimitRecord {
		user_id: user_id.to_string(),
		message_count,
		window_start,
		last_reset: window_start,
		is_limited: message_count >= 20,
		updated_at: window_start,
	}
}

#[tokio::test]
async fn elapsed_window_is_reset_on_check() {
	let h = suite::harness(&[]);
	let now = OffsetDateTime::now_utc();

	h.store.put(&record("learner-1", 20, now - Duration::hours(25))).await.expect("Seed failed.");

	let status =
		h.service.check_rate_limit_at("learner-1", "student", now).await.expect("Check failed.");

	assert!(status.allowed);
	assert_eq!(status.remaining, Some(20));
	assert_eq!(status.reset_at, Some(now + Duration::hours(24)));

	let stored = h.store.rate_limit_record("learner-1").expect("Lock failed.").expect("Record missing.");

	assert_eq!(stored.message_count, 0);
	assert_eq!(stored.window_start, now);
	assert_eq!(stored.last_reset, now);
	assert!(!stored.is_limited);
}

#[tokio::test]
async fn twentieth_message_is_the_last_one_allowed() {
	let h = suite::harness(&[]);
	let now = OffsetDateTime::now_utc();
	let start = now - Duration::hours(1);

	h.store.put(&record("learner-2", 19, start)).await.expect("Seed failed.");

	let before =
		h.service.check_rate_limit_at("learner-2", "student", now).await.expect("Check failed.");

	assert!(before.allowed);
	assert_eq!(before.remaining, Some(1));

	let after =
		h.service.increment_rate_limit_at("learner-2", "student", now).await.expect("Increment failed.");

	assert!(after.allowed);
	assert_eq!(after.remaining, Some(0));

	let denied =
		h.service.check_rate_limit_at("learner-2", "student", now).await.expect("Check failed.");

	assert!(!denied.allowed);
	assert_eq!(denied.remaining, Some(0));
	assert_eq!(denied.reset_at, Some(start + Duration::hours(24)));
	assert!(denied.message.is_some_and(|message| message.contains("resets in 23 hours")));
}

#[tokio::test]
async fn exempt_roles_are_never_counted() {
	let h = suite::harness(&[]);
	let now = OffsetDateTime::now_utc();

	h.store.put(&record("teacher-1", 500, now)).await.expect("Seed failed.");

	let status =
		h.service.check_rate_limit_at("teacher-1", "Instructor", now).await.expect("Check failed.");

	assert!(status.allowed);
	assert!(status.exempt);
	assert_eq!(status.remaining, None);
	assert_eq!(status.limit, None);

	h.service.increment_rate_limit_at("teacher-1", "admin", now).await.expect("Increment failed.");

	let stored = h.store.rate_limit_record("teacher-1").expect("Lock failed.").expect("Record missing.");

	assert_eq!(stored.message_count, 500);
}

#[tokio::test]
async fn usage_reports_the_current_window() {
	let h = suite::harness(&[]);

	for _ in 0..3 {
		h.service.increment_rate_limit("learner-3", "student").await.expect("Increment failed.");
	}

	let usage = h.service.usage("learner-3", "student").await.expect("Usage failed.");

	assert_eq!(usage.used, 3);
	assert_eq!(usage.limit, Some(20));
	assert_eq!(usage.remaining, Some(17));
	assert!(!usage.is_limited);

	let exempt = h.service.usage("teacher-1", "instructor").await.expect("Usage failed.");

	assert_eq!(exempt.limit, None);
	assert!(h.store.rate_limit_record("teacher-1").expect("Lock failed.").is_none());
}
