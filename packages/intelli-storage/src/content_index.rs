use sqlx::PgExecutor;
use uuid::Uuid;

use crate::{Result, models::ContentIndexState};

pub async fn get<'e, E>(executor: E, content_id: Uuid) -> Result<Option<ContentIndexState>>
where
	E: PgExecutor<'e>,
{
	let state = sqlx::query_as::<_, ContentIndexState>(
		"\
SELECT content_id, stage_id, content_hash, chunk_count, indexed_at
FROM content_index_state
WHERE content_id = $1",
	)
	.bind(content_id)
	.fetch_optional(executor)
	.await?;

	Ok(state)
}

pub async fn upsert<'e, E>(executor: E, state: &ContentIndexState) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO content_index_state (content_id, stage_id, content_hash, chunk_count, indexed_at)
VALUES ($1, $2, $3, $4, $5)
ON CONFLICT (content_id) DO UPDATE
SET
	stage_id = EXCLUDED.stage_id,
	content_hash = EXCLUDED.content_hash,
	chunk_count = EXCLUDED.chunk_count,
	indexed_at = EXCLUDED.indexed_at",
	)
	.bind(state.content_id)
	.bind(state.stage_id)
	.bind(state.content_hash.as_str())
	.bind(state.chunk_count)
	.bind(state.indexed_at)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn delete<'e, E>(executor: E, content_id: Uuid) -> Result<bool>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query("DELETE FROM content_index_state WHERE content_id = $1")
		.bind(content_id)
		.execute(executor)
		.await?;

	Ok(result.rows_affected() > 0)
}
