//! Postgres and Qdrant backed stores used by the running services.

use std::sync::Arc;

use time::{Date, OffsetDateTime};
use uuid::Uuid;

use intelli_chunking::ContentChunk;
use intelli_config::Config;
use intelli_storage::{
	content_index, db::Db, guardrails,
	models::{
		ContentIndexState, ConversationThread, GuardrailEvent, RateLimitRecord, ThreadItem,
		ThreadPatch, UsageDay,
	},
	qdrant::{QdrantStore, ScoredChunk},
	rate_limits, threads, usage,
};

use crate::{
	AuditLog, BoxFuture, ContentIndexStore, RateLimitStore, Result, Stores, ThreadStore,
	VectorIndex,
};

#[derive(Clone)]
pub struct PgStore {
	pub db: Arc<Db>,
}
impl PgStore {
	pub fn new(db: Arc<Db>) -> Self {
		Self { db }
	}
}

impl ThreadStore for PgStore {
	fn insert_thread<'a>(&'a self, thread: &'a ConversationThread) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move { Ok(threads::insert_thread(&self.db.pool, thread).await?) })
	}

	fn get_thread<'a>(
		&'a self,
		thread_id: Uuid,
		user_id: &'a str,
	) -> BoxFuture<'a, Result<Option<ConversationThread>>> {
		Box::pin(async move {
			Ok(threads::get_owned_thread(&self.db.pool, thread_id, user_id).await?)
		})
	}

	fn list_threads<'a>(
		&'a self,
		user_id: &'a str,
		status: Option<&'a str>,
		limit: u32,
		offset: u32,
	) -> BoxFuture<'a, Result<Vec<ConversationThread>>> {
		Box::pin(async move {
			Ok(threads::list_threads(
				&self.db.pool,
				user_id,
				status,
				i64::from(limit),
				i64::from(offset),
			)
			.await?)
		})
	}

	fn update_thread<'a>(
		&'a self,
		thread_id: Uuid,
		user_id: &'a str,
		patch: &'a ThreadPatch,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<Option<ConversationThread>>> {
		Box::pin(async move {
			Ok(threads::update_thread(&self.db.pool, thread_id, user_id, patch, now).await?)
		})
	}

	fn delete_thread<'a>(&'a self, thread_id: Uuid, user_id: &'a str) -> BoxFuture<'a, Result<bool>> {
		Box::pin(async move { Ok(threads::delete_thread(&self.db.pool, thread_id, user_id).await?) })
	}

	fn append_item<'a>(
		&'a self,
		item: &'a ThreadItem,
		auto_title: Option<&'a str>,
	) -> BoxFuture<'a, Result<Option<ConversationThread>>> {
		Box::pin(async move {
			let mut tx = self.db.pool.begin().await?;
			let thread = threads::append_item(&mut tx, item, auto_title).await?;

			// Nothing was written when the thread is missing.
			if thread.is_none() {
				tx.rollback().await?;

				return Ok(None);
			}

			tx.commit().await?;

			Ok(thread)
		})
	}

	fn list_items(
		&self,
		thread_id: Uuid,
		limit: u32,
		before_id: Option<Uuid>,
	) -> BoxFuture<'_, Result<Vec<ThreadItem>>> {
		Box::pin(async move {
			Ok(threads::list_items(&self.db.pool, thread_id, i64::from(limit), before_id).await?)
		})
	}

	fn count_items<'a>(&'a self, thread_id: Uuid, role: &'a str) -> BoxFuture<'a, Result<i64>> {
		Box::pin(async move { Ok(threads::count_items(&self.db.pool, thread_id, role).await?) })
	}

	fn mark_for_retention<'a>(
		&'a self,
		user_id: &'a str,
		course_id: Option<&'a str>,
		marked_at: OffsetDateTime,
	) -> BoxFuture<'a, Result<u64>> {
		Box::pin(async move {
			Ok(threads::mark_for_retention(&self.db.pool, user_id, course_id, marked_at).await?)
		})
	}

	fn delete_expired(&self, cutoff: OffsetDateTime) -> BoxFuture<'_, Result<u64>> {
		Box::pin(async move { Ok(threads::delete_expired(&self.db.pool, cutoff).await?) })
	}
}

impl RateLimitStore for PgStore {
	fn get<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<Option<RateLimitRecord>>> {
		Box::pin(async move { Ok(rate_limits::get(&self.db.pool, user_id).await?) })
	}

	fn put<'a>(&'a self, record: &'a RateLimitRecord) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move { Ok(rate_limits::upsert(&self.db.pool, record).await?) })
	}
}

impl AuditLog for PgStore {
	fn record_guardrail<'a>(&'a self, event: &'a GuardrailEvent) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move { Ok(guardrails::insert_event(&self.db.pool, event).await?) })
	}

	fn record_response(
		&self,
		day: Date,
		response_ms: f64,
		now: OffsetDateTime,
	) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move { Ok(usage::record_message(&self.db.pool, day, response_ms, now).await?) })
	}

	fn record_error(&self, day: Date, now: OffsetDateTime) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move { Ok(usage::record_error(&self.db.pool, day, now).await?) })
	}

	fn usage_day(&self, day: Date) -> BoxFuture<'_, Result<Option<UsageDay>>> {
		Box::pin(async move { Ok(usage::get_day(&self.db.pool, day).await?) })
	}
}

impl ContentIndexStore for PgStore {
	fn get(&self, content_id: Uuid) -> BoxFuture<'_, Result<Option<ContentIndexState>>> {
		Box::pin(async move { Ok(content_index::get(&self.db.pool, content_id).await?) })
	}

	fn put<'a>(&'a self, state: &'a ContentIndexState) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move { Ok(content_index::upsert(&self.db.pool, state).await?) })
	}

	fn delete(&self, content_id: Uuid) -> BoxFuture<'_, Result<bool>> {
		Box::pin(async move { Ok(content_index::delete(&self.db.pool, content_id).await?) })
	}
}

impl VectorIndex for QdrantStore {
	fn search<'a>(
		&'a self,
		vector: Vec<f32>,
		stage_ids: &'a [i32],
		limit: u32,
		min_score: f32,
	) -> BoxFuture<'a, Result<Vec<ScoredChunk>>> {
		Box::pin(async move { Ok(QdrantStore::search(self, vector, stage_ids, limit, min_score).await?) })
	}

	fn upsert<'a>(
		&'a self,
		chunks: &'a [ContentChunk],
		vectors: &'a [Vec<f32>],
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move { Ok(self.upsert_chunks(chunks, vectors).await?) })
	}

	fn delete_content(&self, content_id: Uuid) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move { Ok(QdrantStore::delete_content(self, content_id).await?) })
	}
}

impl Stores {
	/// Connects to Postgres and Qdrant and makes sure the schema and collection exist.
	pub async fn connect(cfg: &Config) -> Result<Self> {
		let db = Db::connect(&cfg.storage.postgres).await?;

		db.ensure_schema().await?;

		let qdrant = QdrantStore::new(&cfg.storage.qdrant)?;

		qdrant.ensure_collection().await?;

		Ok(Self::postgres(Arc::new(db), Arc::new(qdrant)))
	}

	pub fn postgres(db: Arc<Db>, qdrant: Arc<QdrantStore>) -> Self {
		let store = Arc::new(PgStore::new(db));

		Self {
			threads: store.clone(),
			rate_limits: store.clone(),
			audit: store.clone(),
			content_index: store,
			vectors: qdrant,
		}
	}
}
