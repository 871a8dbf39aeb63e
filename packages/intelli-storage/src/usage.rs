use sqlx::PgExecutor;
use time::{Date, OffsetDateTime};

use crate::{Result, models::UsageDay};

/// Counts one answered message and folds `response_ms` into the day's running average.
pub async fn record_message<'e, E>(
	executor: E,
	day: Date,
	response_ms: f64,
	now: OffsetDateTime,
) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO tutor_usage_daily (usage_day, message_count, avg_response_ms, error_count, updated_at)
VALUES ($1, 1, $2, 0, $3)
ON CONFLICT (usage_day) DO UPDATE
SET
	avg_response_ms = (tutor_usage_daily.avg_response_ms * tutor_usage_daily.message_count + $2)
		/ (tutor_usage_daily.message_count + 1),
	message_count = tutor_usage_daily.message_count + 1,
	updated_at = $3",
	)
	.bind(day)
	.bind(response_ms)
	.bind(now)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn record_error<'e, E>(executor: E, day: Date, now: OffsetDateTime) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO tutor_usage_daily (usage_day, message_count, avg_response_ms, error_count, updated_at)
VALUES ($1, 0, 0, 1, $2)
ON CONFLICT (usage_day) DO UPDATE
SET
	error_count = tutor_usage_daily.error_count + 1,
	updated_at = $2",
	)
	.bind(day)
	.bind(now)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn get_day<'e, E>(executor: E, day: Date) -> Result<Option<UsageDay>>
where
	E: PgExecutor<'e>,
{
	let row = sqlx::query_as::<_, UsageDay>(
		"\
SELECT usage_day, message_count, avg_response_ms, error_count, updated_at
FROM tutor_usage_daily
WHERE usage_day = $1",
	)
	.bind(day)
	.fetch_optional(executor)
	.await?;

	Ok(row)
}
