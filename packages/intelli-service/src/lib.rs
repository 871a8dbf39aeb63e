pub mod actions;
pub mod context;
pub mod ingest;
pub mod memory;
pub mod pg;
pub mod rate_limit;
pub mod retrieval;
pub mod sessions;
pub mod tutor;

mod error;

pub use actions::{ActionOutput, ThreadAction};
pub use context::{Identity, PageContext, RequestContext};
pub use error::{Error, Result};
pub use ingest::{IngestOutcome, IngestReport};
pub use rate_limit::{QuotaStatus, UsageStats};
pub use retrieval::{Retrieval, RetrievalResult};
pub use sessions::{NewThread, ThreadUpdate, ThreadWithItems};
pub use tutor::{GenerationOutcome, TutorEvent, TutorMessageRequest};

use std::{future::Future, pin::Pin, sync::Arc};

use time::{Date, OffsetDateTime};
use uuid::Uuid;

use intelli_chunking::{ContentChunk, TokenCodec};
use intelli_config::{Config, EmbeddingProviderConfig, LlmProviderConfig, ProviderConfig};
use intelli_providers::{
	chat::{self, ChatMessage, ChatStream},
	embedding,
	rerank::{self, RerankHit},
};
use intelli_storage::{
	models::{
		ContentIndexState, ConversationThread, GuardrailEvent, RateLimitRecord, ThreadItem,
		ThreadPatch, UsageDay,
	},
	qdrant::ScoredChunk,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type ProviderResult<T> = intelli_providers::Result<T>;

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, ProviderResult<Vec<Vec<f32>>>>;
}

pub trait RerankProvider
where
	Self: Send + Sync,
{
	fn rerank<'a>(
		&'a self,
		cfg: &'a ProviderConfig,
		query: &'a str,
		docs: &'a [String],
		top_n: usize,
	) -> BoxFuture<'a, ProviderResult<Vec<RerankHit>>>;
}

pub trait ChatProvider
where
	Self: Send + Sync,
{
	fn stream_chat<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [ChatMessage],
	) -> BoxFuture<'a, ProviderResult<ChatStream>>;
}

pub trait VectorIndex
where
	Self: Send + Sync,
{
	/// An empty `stage_ids` slice searches every stage.
	fn search<'a>(
		&'a self,
		vector: Vec<f32>,
		stage_ids: &'a [i32],
		limit: u32,
		min_score: f32,
	) -> BoxFuture<'a, Result<Vec<ScoredChunk>>>;

	fn upsert<'a>(
		&'a self,
		chunks: &'a [ContentChunk],
		vectors: &'a [Vec<f32>],
	) -> BoxFuture<'a, Result<()>>;

	fn delete_content(&self, content_id: Uuid) -> BoxFuture<'_, Result<()>>;
}

/// Thread persistence. Every lookup keyed by a thread id is also keyed by its owner.
pub trait ThreadStore
where
	Self: Send + Sync,
{
	fn insert_thread<'a>(&'a self, thread: &'a ConversationThread) -> BoxFuture<'a, Result<()>>;

	fn get_thread<'a>(
		&'a self,
		thread_id: Uuid,
		user_id: &'a str,
	) -> BoxFuture<'a, Result<Option<ConversationThread>>>;

	fn list_threads<'a>(
		&'a self,
		user_id: &'a str,
		status: Option<&'a str>,
		limit: u32,
		offset: u32,
	) -> BoxFuture<'a, Result<Vec<ConversationThread>>>;

	fn update_thread<'a>(
		&'a self,
		thread_id: Uuid,
		user_id: &'a str,
		patch: &'a ThreadPatch,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<Option<ConversationThread>>>;

	fn delete_thread<'a>(&'a self, thread_id: Uuid, user_id: &'a str) -> BoxFuture<'a, Result<bool>>;

	/// Stores the item, touches the thread and fills a missing title with `auto_title`.
	fn append_item<'a>(
		&'a self,
		item: &'a ThreadItem,
		auto_title: Option<&'a str>,
	) -> BoxFuture<'a, Result<Option<ConversationThread>>>;

	/// Newest `limit` items older than `before_id`, oldest first.
	fn list_items(
		&self,
		thread_id: Uuid,
		limit: u32,
		before_id: Option<Uuid>,
	) -> BoxFuture<'_, Result<Vec<ThreadItem>>>;

	fn count_items<'a>(&'a self, thread_id: Uuid, role: &'a str) -> BoxFuture<'a, Result<i64>>;

	fn mark_for_retention<'a>(
		&'a self,
		user_id: &'a str,
		course_id: Option<&'a str>,
		marked_at: OffsetDateTime,
	) -> BoxFuture<'a, Result<u64>>;

	fn delete_expired(&self, cutoff: OffsetDateTime) -> BoxFuture<'_, Result<u64>>;
}

pub trait RateLimitStore
where
	Self: Send + Sync,
{
	fn get<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<Option<RateLimitRecord>>>;

	fn put<'a>(&'a self, record: &'a RateLimitRecord) -> BoxFuture<'a, Result<()>>;
}

/// Guardrail audit trail and daily usage counters.
pub trait AuditLog
where
	Self: Send + Sync,
{
	fn record_guardrail<'a>(&'a self, event: &'a GuardrailEvent) -> BoxFuture<'a, Result<()>>;

	fn record_response(
		&self,
		day: Date,
		response_ms: f64,
		now: OffsetDateTime,
	) -> BoxFuture<'_, Result<()>>;

	fn record_error(&self, day: Date, now: OffsetDateTime) -> BoxFuture<'_, Result<()>>;

	fn usage_day(&self, day: Date) -> BoxFuture<'_, Result<Option<UsageDay>>>;
}

pub trait ContentIndexStore
where
	Self: Send + Sync,
{
	fn get(&self, content_id: Uuid) -> BoxFuture<'_, Result<Option<ContentIndexState>>>;

	fn put<'a>(&'a self, state: &'a ContentIndexState) -> BoxFuture<'a, Result<()>>;

	fn delete(&self, content_id: Uuid) -> BoxFuture<'_, Result<bool>>;
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub rerank: Arc<dyn RerankProvider>,
	pub chat: Arc<dyn ChatProvider>,
}
impl Providers {
	pub fn new(
		embedding: Arc<dyn EmbeddingProvider>,
		rerank: Arc<dyn RerankProvider>,
		chat: Arc<dyn ChatProvider>,
	) -> Self {
		Self { embedding, rerank, chat }
	}
}
impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self { embedding: provider.clone(), rerank: provider.clone(), chat: provider }
	}
}

#[derive(Clone)]
pub struct Stores {
	pub threads: Arc<dyn ThreadStore>,
	pub rate_limits: Arc<dyn RateLimitStore>,
	pub audit: Arc<dyn AuditLog>,
	pub content_index: Arc<dyn ContentIndexStore>,
	pub vectors: Arc<dyn VectorIndex>,
}

/// Everything a request handler needs, built once at startup.
pub struct TutorService {
	pub cfg: Config,
	pub providers: Providers,
	pub stores: Stores,
	pub tokenizer: Arc<dyn TokenCodec + Send + Sync>,
}
impl TutorService {
	pub fn new(cfg: Config, stores: Stores, tokenizer: Arc<dyn TokenCodec + Send + Sync>) -> Self {
		Self { cfg, providers: Providers::default(), stores, tokenizer }
	}

	pub fn with_providers(
		cfg: Config,
		stores: Stores,
		tokenizer: Arc<dyn TokenCodec + Send + Sync>,
		providers: Providers,
	) -> Self {
		Self { cfg, providers, stores, tokenizer }
	}
}

struct DefaultProviders;
impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, ProviderResult<Vec<Vec<f32>>>> {
		Box::pin(embedding::embed(cfg, texts))
	}
}
impl RerankProvider for DefaultProviders {
	fn rerank<'a>(
		&'a self,
		cfg: &'a ProviderConfig,
		query: &'a str,
		docs: &'a [String],
		top_n: usize,
	) -> BoxFuture<'a, ProviderResult<Vec<RerankHit>>> {
		Box::pin(rerank::rerank(cfg, query, docs, top_n))
	}
}
impl ChatProvider for DefaultProviders {
	fn stream_chat<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [ChatMessage],
	) -> BoxFuture<'a, ProviderResult<ChatStream>> {
		Box::pin(chat::stream_chat(cfg, messages))
	}
}
