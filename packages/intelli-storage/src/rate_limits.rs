use sqlx::PgExecutor;

use crate::{Result, models::RateLimitRecord};

pub async fn get<'e, E>(executor: E, user_id: &str) -> Result<Option<RateLimitRecord>>
where
	E: PgExecutor<'e>,
{
	let record = sqlx::query_as::<_, RateLimitRecord>(
		"\
SELECT user_id, message_count, window_start, last_reset, is_limited, updated_at
FROM rate_limits
WHERE user_id = $1",
	)
	.bind(user_id)
	.fetch_optional(executor)
	.await?;

	Ok(record)
}

/// Last writer wins. Two concurrent increments for one user may both read the same count.
pub async fn upsert<'e, E>(executor: E, record: &RateLimitRecord) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO rate_limits (user_id, message_count, window_start, last_reset, is_limited, updated_at)
VALUES ($1, $2, $3, $4, $5, $6)
ON CONFLICT (user_id) DO UPDATE
SET
	message_count = EXCLUDED.message_count,
	window_start = EXCLUDED.window_start,
	last_reset = EXCLUDED.last_reset,
	is_limited = EXCLUDED.is_limited,
	updated_at = EXCLUDED.updated_at",
	)
	.bind(record.user_id.as_str())
	.bind(record.message_count)
	.bind(record.window_start)
	.bind(record.last_reset)
	.bind(record.is_limited)
	.bind(record.updated_at)
	.execute(executor)
	.await?;

	Ok(())
}
