use sqlx::PgExecutor;

use crate::{Result, models::GuardrailEvent};

pub async fn insert_event<'e, E>(executor: E, event: &GuardrailEvent) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO guardrail_events (event_id, user_id, thread_id, kind, detail, created_at)
VALUES ($1, $2, $3, $4, $5, $6)",
	)
	.bind(event.event_id)
	.bind(event.user_id.as_str())
	.bind(event.thread_id)
	.bind(event.kind.as_str())
	.bind(&event.detail)
	.bind(event.created_at)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn list_for_user<'e, E>(executor: E, user_id: &str, limit: i64) -> Result<Vec<GuardrailEvent>>
where
	E: PgExecutor<'e>,
{
	let events = sqlx::query_as::<_, GuardrailEvent>(
		"\
SELECT event_id, user_id, thread_id, kind, detail, created_at
FROM guardrail_events
WHERE user_id = $1
ORDER BY created_at DESC
LIMIT $2",
	)
	.bind(user_id)
	.bind(limit)
	.fetch_all(executor)
	.await?;

	Ok(events)
}
