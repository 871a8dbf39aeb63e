use sqlx::{PgExecutor, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Result,
	models::{ConversationThread, ThreadItem, ThreadPatch},
};

const THREAD_COLUMNS: &str = "\
thread_id,
	user_id,
	course_id,
	stage_id,
	title,
	status,
	metadata,
	retention_marked_at,
	created_at,
	updated_at";

pub async fn insert_thread<'e, E>(executor: E, thread: &ConversationThread) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO conversation_threads (
	thread_id,
	user_id,
	course_id,
	stage_id,
	title,
	status,
	metadata,
	retention_marked_at,
	created_at,
	updated_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
	)
	.bind(thread.thread_id)
	.bind(thread.user_id.as_str())
	.bind(thread.course_id.as_deref())
	.bind(thread.stage_id)
	.bind(thread.title.as_deref())
	.bind(thread.status.as_str())
	.bind(&thread.metadata)
	.bind(thread.retention_marked_at)
	.bind(thread.created_at)
	.bind(thread.updated_at)
	.execute(executor)
	.await?;

	Ok(())
}

/// Returns the thread only when `user_id` owns it.
pub async fn get_owned_thread<'e, E>(
	executor: E,
	thread_id: Uuid,
	user_id: &str,
) -> Result<Option<ConversationThread>>
where
	E: PgExecutor<'e>,
{
	let sql = format!(
		"SELECT {THREAD_COLUMNS}\nFROM conversation_threads\nWHERE thread_id = $1 AND user_id = $2"
	);
	let thread = sqlx::query_as::<_, ConversationThread>(&sql)
		.bind(thread_id)
		.bind(user_id)
		.fetch_optional(executor)
		.await?;

	Ok(thread)
}

pub async fn list_threads<'e, E>(
	executor: E,
	user_id: &str,
	status: Option<&str>,
	limit: i64,
	offset: i64,
) -> Result<Vec<ConversationThread>>
where
	E: PgExecutor<'e>,
{
	let sql = format!(
		"\
SELECT {THREAD_COLUMNS}
FROM conversation_threads
WHERE user_id = $1
	AND ($2::text IS NULL OR status = $2)
ORDER BY updated_at DESC, thread_id
LIMIT $3
OFFSET $4"
	);
	let threads = sqlx::query_as::<_, ConversationThread>(&sql)
		.bind(user_id)
		.bind(status)
		.bind(limit)
		.bind(offset)
		.fetch_all(executor)
		.await?;

	Ok(threads)
}

pub async fn update_thread<'e, E>(
	executor: E,
	thread_id: Uuid,
	user_id: &str,
	patch: &ThreadPatch,
	now: OffsetDateTime,
) -> Result<Option<ConversationThread>>
where
	E: PgExecutor<'e>,
{
	let sql = format!(
		"\
UPDATE conversation_threads
SET
	title = COALESCE($3, title),
	status = COALESCE($4, status),
	metadata = metadata || COALESCE($5, '{{}}'::jsonb),
	updated_at = $6
WHERE thread_id = $1 AND user_id = $2
RETURNING {THREAD_COLUMNS}"
	);
	let thread = sqlx::query_as::<_, ConversationThread>(&sql)
		.bind(thread_id)
		.bind(user_id)
		.bind(patch.title.as_deref())
		.bind(patch.status.as_deref())
		.bind(patch.metadata.as_ref())
		.bind(now)
		.fetch_optional(executor)
		.await?;

	Ok(thread)
}

pub async fn delete_thread<'e, E>(executor: E, thread_id: Uuid, user_id: &str) -> Result<bool>
where
	E: PgExecutor<'e>,
{
	let result =
		sqlx::query("DELETE FROM conversation_threads WHERE thread_id = $1 AND user_id = $2")
			.bind(thread_id)
			.bind(user_id)
			.execute(executor)
			.await?;

	Ok(result.rows_affected() > 0)
}

/// Inserts the item, bumps the thread's `updated_at` and fills an empty title with
/// `auto_title`. Returns the thread as stored afterwards, or `None` without inserting anything
/// when the thread does not exist.
pub async fn append_item(
	tx: &mut Transaction<'_, Postgres>,
	item: &ThreadItem,
	auto_title: Option<&str>,
) -> Result<Option<ConversationThread>> {
	// The row lock keeps a concurrent delete from landing between this check and the insert.
	let locked: Option<Uuid> = sqlx::query_scalar(
		"SELECT thread_id FROM conversation_threads WHERE thread_id = $1 FOR UPDATE",
	)
	.bind(item.thread_id)
	.fetch_optional(&mut **tx)
	.await?;

	if locked.is_none() {
		return Ok(None);
	}

	sqlx::query(
		"\
INSERT INTO thread_items (item_id, thread_id, role, content, metadata, created_at)
VALUES ($1, $2, $3, $4, $5, $6)",
	)
	.bind(item.item_id)
	.bind(item.thread_id)
	.bind(item.role.as_str())
	.bind(item.content.as_str())
	.bind(&item.metadata)
	.bind(item.created_at)
	.execute(&mut **tx)
	.await?;

	let sql = format!(
		"\
UPDATE conversation_threads
SET
	updated_at = $2,
	title = COALESCE(NULLIF(title, ''), $3)
WHERE thread_id = $1
RETURNING {THREAD_COLUMNS}"
	);
	let thread = sqlx::query_as::<_, ConversationThread>(&sql)
		.bind(item.thread_id)
		.bind(item.created_at)
		.bind(auto_title)
		.fetch_optional(&mut **tx)
		.await?;

	Ok(thread)
}

/// Page of items older than `before_id` (or the newest ones), returned oldest first.
pub async fn list_items<'e, E>(
	executor: E,
	thread_id: Uuid,
	limit: i64,
	before_id: Option<Uuid>,
) -> Result<Vec<ThreadItem>>
where
	E: PgExecutor<'e>,
{
	let mut items = sqlx::query_as::<_, ThreadItem>(
		"\
SELECT item_id, thread_id, role, content, metadata, created_at
FROM thread_items
WHERE thread_id = $1
	AND (
		$2::uuid IS NULL
		OR item_seq < (SELECT item_seq FROM thread_items WHERE item_id = $2 AND thread_id = $1)
	)
ORDER BY item_seq DESC
LIMIT $3",
	)
	.bind(thread_id)
	.bind(before_id)
	.bind(limit)
	.fetch_all(executor)
	.await?;

	items.reverse();

	Ok(items)
}

pub async fn count_items<'e, E>(executor: E, thread_id: Uuid, role: &str) -> Result<i64>
where
	E: PgExecutor<'e>,
{
	let count: i64 =
		sqlx::query_scalar("SELECT count(*) FROM thread_items WHERE thread_id = $1 AND role = $2")
			.bind(thread_id)
			.bind(role)
			.fetch_one(executor)
			.await?;

	Ok(count)
}

pub async fn mark_for_retention<'e, E>(
	executor: E,
	user_id: &str,
	course_id: Option<&str>,
	marked_at: OffsetDateTime,
) -> Result<u64>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query(
		"\
UPDATE conversation_threads
SET retention_marked_at = $3
WHERE user_id = $1
	AND ($2::text IS NULL OR course_id = $2)
	AND retention_marked_at IS NULL",
	)
	.bind(user_id)
	.bind(course_id)
	.bind(marked_at)
	.execute(executor)
	.await?;

	Ok(result.rows_affected())
}

/// Deletes threads whose retention marker is older than `cutoff`. Items follow by cascade.
pub async fn delete_expired<'e, E>(executor: E, cutoff: OffsetDateTime) -> Result<u64>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query(
		"DELETE FROM conversation_threads WHERE retention_marked_at IS NOT NULL AND retention_marked_at < $1",
	)
	.bind(cutoff)
	.execute(executor)
	.await?;

	Ok(result.rows_affected())
}
