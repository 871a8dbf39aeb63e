//! Process-local stores. They back the test suites and single-node trials without Postgres or
//! Qdrant, and follow the same ownership and ordering rules as the real backends.

use std::{
	collections::HashMap,
	sync::{Arc, Mutex, MutexGuard},
};

use serde_json::Value;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use intelli_chunking::ContentChunk;
use intelli_storage::{
	models::{
		ContentIndexState, ConversationThread, GuardrailEvent, RateLimitRecord, ThreadItem,
		ThreadPatch, UsageDay,
	},
	qdrant::ScoredChunk,
};

use crate::{
	AuditLog, BoxFuture, ContentIndexStore, Error, RateLimitStore, Result, Stores, ThreadStore,
	VectorIndex,
};

#[derive(Default)]
struct State {
	threads: HashMap<Uuid, ConversationThread>,
	/// Insertion order stands in for the `item_seq` column.
	items: Vec<ThreadItem>,
	rate_limits: HashMap<String, RateLimitRecord>,
	guardrails: Vec<GuardrailEvent>,
	usage: HashMap<Date, UsageDay>,
	content_index: HashMap<Uuid, ContentIndexState>,
}

#[derive(Default)]
pub struct MemoryStore {
	state: Mutex<State>,
}
impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn guardrail_events(&self) -> Result<Vec<GuardrailEvent>> {
		Ok(self.lock()?.guardrails.clone())
	}

	pub fn rate_limit_record(&self, user_id: &str) -> Result<Option<RateLimitRecord>> {
		Ok(self.lock()?.rate_limits.get(user_id).cloned())
	}

	pub fn thread_count(&self) -> Result<usize> {
		Ok(self.lock()?.threads.len())
	}

	pub fn item_count(&self) -> Result<usize> {
		Ok(self.lock()?.items.len())
	}

	fn lock(&self) -> Result<MutexGuard<'_, State>> {
		self.state
			.lock()
			.map_err(|_| Error::Internal { message: "In-memory store lock poisoned.".to_string() })
	}
}

impl ThreadStore for MemoryStore {
	fn insert_thread<'a>(&'a self, thread: &'a ConversationThread) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.lock()?.threads.insert(thread.thread_id, thread.clone());

			Ok(())
		})
	}

	fn get_thread<'a>(
		&'a self,
		thread_id: Uuid,
		user_id: &'a str,
	) -> BoxFuture<'a, Result<Option<ConversationThread>>> {
		Box::pin(async move {
			let state = self.lock()?;

			Ok(state.threads.get(&thread_id).filter(|t| t.user_id == user_id).cloned())
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
			let state = self.lock()?;
			let mut threads: Vec<ConversationThread> = state
				.threads
				.values()
				.filter(|t| t.user_id == user_id)
				.filter(|t| status.is_none_or(|status| t.status == status))
				.cloned()
				.collect();

			threads.sort_by(|a, b| {
				b.updated_at.cmp(&a.updated_at).then_with(|| a.thread_id.cmp(&b.thread_id))
			});

			Ok(threads.into_iter().skip(offset as usize).take(limit as usize).collect())
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
			let mut state = self.lock()?;
			let Some(thread) =
				state.threads.get_mut(&thread_id).filter(|t| t.user_id == user_id)
			else {
				return Ok(None);
			};

			if let Some(title) = patch.title.as_ref() {
				thread.title = Some(title.clone());
			}
			if let Some(status) = patch.status.as_ref() {
				thread.status = status.clone();
			}
			if let Some(Value::Object(changes)) = patch.metadata.as_ref() {
				if !thread.metadata.is_object() {
					thread.metadata = Value::Object(Default::default());
				}
				if let Value::Object(metadata) = &mut thread.metadata {
					for (key, value) in changes {
						metadata.insert(key.clone(), value.clone());
					}
				}
			}

			thread.updated_at = now;

			Ok(Some(thread.clone()))
		})
	}

	fn delete_thread<'a>(&'a self, thread_id: Uuid, user_id: &'a str) -> BoxFuture<'a, Result<bool>> {
		Box::pin(async move {
			let mut state = self.lock()?;
			let owned = state.threads.get(&thread_id).is_some_and(|t| t.user_id == user_id);

			if owned {
				state.threads.remove(&thread_id);
				state.items.retain(|item| item.thread_id != thread_id);
			}

			Ok(owned)
		})
	}

	fn append_item<'a>(
		&'a self,
		item: &'a ThreadItem,
		auto_title: Option<&'a str>,
	) -> BoxFuture<'a, Result<Option<ConversationThread>>> {
		Box::pin(async move {
			let mut state = self.lock()?;
			let Some(thread) = state.threads.get_mut(&item.thread_id) else {
				return Ok(None);
			};

			thread.updated_at = item.created_at;

			if thread.title.as_deref().is_none_or(str::is_empty)
				&& let Some(title) = auto_title
			{
				thread.title = Some(title.to_string());
			}

			let thread = thread.clone();

			state.items.push(item.clone());

			Ok(Some(thread))
		})
	}

	fn list_items(
		&self,
		thread_id: Uuid,
		limit: u32,
		before_id: Option<Uuid>,
	) -> BoxFuture<'_, Result<Vec<ThreadItem>>> {
		Box::pin(async move {
			let state = self.lock()?;
			let in_thread: Vec<&ThreadItem> =
				state.items.iter().filter(|item| item.thread_id == thread_id).collect();
			let end = match before_id {
				Some(before_id) => in_thread
					.iter()
					.position(|item| item.item_id == before_id)
					.unwrap_or(0),
				None => in_thread.len(),
			};
			let start = end.saturating_sub(limit as usize);

			Ok(in_thread[start..end].iter().map(|item| (*item).clone()).collect())
		})
	}

	fn count_items<'a>(&'a self, thread_id: Uuid, role: &'a str) -> BoxFuture<'a, Result<i64>> {
		Box::pin(async move {
			let state = self.lock()?;
			let count =
				state.items.iter().filter(|i| i.thread_id == thread_id && i.role == role).count();

			Ok(i64::try_from(count).unwrap_or(i64::MAX))
		})
	}

	fn mark_for_retention<'a>(
		&'a self,
		user_id: &'a str,
		course_id: Option<&'a str>,
		marked_at: OffsetDateTime,
	) -> BoxFuture<'a, Result<u64>> {
		Box::pin(async move {
			let mut state = self.lock()?;
			let mut marked = 0;

			for thread in state.threads.values_mut() {
				if thread.user_id == user_id
					&& course_id.is_none_or(|course| thread.course_id.as_deref() == Some(course))
					&& thread.retention_marked_at.is_none()
				{
					thread.retention_marked_at = Some(marked_at);
					marked += 1;
				}
			}

			Ok(marked)
		})
	}

	fn delete_expired(&self, cutoff: OffsetDateTime) -> BoxFuture<'_, Result<u64>> {
		Box::pin(async move {
			let mut state = self.lock()?;
			let expired: Vec<Uuid> = state
				.threads
				.values()
				.filter(|t| t.retention_marked_at.is_some_and(|marked| marked < cutoff))
				.map(|t| t.thread_id)
				.collect();

			for thread_id in &expired {
				state.threads.remove(thread_id);
			}

			state.items.retain(|item| !expired.contains(&item.thread_id));

			Ok(expired.len() as u64)
		})
	}
}

impl RateLimitStore for MemoryStore {
	fn get<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<Option<RateLimitRecord>>> {
		Box::pin(async move { Ok(self.lock()?.rate_limits.get(user_id).cloned()) })
	}

	fn put<'a>(&'a self, record: &'a RateLimitRecord) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.lock()?.rate_limits.insert(record.user_id.clone(), record.clone());

			Ok(())
		})
	}
}

impl AuditLog for MemoryStore {
	fn record_guardrail<'a>(&'a self, event: &'a GuardrailEvent) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.lock()?.guardrails.push(event.clone());

			Ok(())
		})
	}

	fn record_response(
		&self,
		day: Date,
		response_ms: f64,
		now: OffsetDateTime,
	) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move {
			let mut state = self.lock()?;
			let entry = state.usage.entry(day).or_insert_with(|| empty_day(day, now));
			let count = entry.message_count as f64;

			entry.avg_response_ms = (entry.avg_response_ms * count + response_ms) / (count + 1.0);
			entry.message_count += 1;
			entry.updated_at = now;

			Ok(())
		})
	}

	fn record_error(&self, day: Date, now: OffsetDateTime) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move {
			let mut state = self.lock()?;
			let entry = state.usage.entry(day).or_insert_with(|| empty_day(day, now));

			entry.error_count += 1;
			entry.updated_at = now;

			Ok(())
		})
	}

	fn usage_day(&self, day: Date) -> BoxFuture<'_, Result<Option<UsageDay>>> {
		Box::pin(async move { Ok(self.lock()?.usage.get(&day).cloned()) })
	}
}

impl ContentIndexStore for MemoryStore {
	fn get(&self, content_id: Uuid) -> BoxFuture<'_, Result<Option<ContentIndexState>>> {
		Box::pin(async move { Ok(self.lock()?.content_index.get(&content_id).cloned()) })
	}

	fn put<'a>(&'a self, state: &'a ContentIndexState) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.lock()?.content_index.insert(state.content_id, state.clone());

			Ok(())
		})
	}

	fn delete(&self, content_id: Uuid) -> BoxFuture<'_, Result<bool>> {
		Box::pin(async move { Ok(self.lock()?.content_index.remove(&content_id).is_some()) })
	}
}

/// Brute-force cosine search over every stored chunk.
#[derive(Default)]
pub struct MemoryVectorIndex {
	points: Mutex<Vec<(ContentChunk, Vec<f32>)>>,
}
impl MemoryVectorIndex {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> Result<usize> {
		Ok(self.lock()?.len())
	}

	pub fn is_empty(&self) -> Result<bool> {
		Ok(self.lock()?.is_empty())
	}

	fn lock(&self) -> Result<MutexGuard<'_, Vec<(ContentChunk, Vec<f32>)>>> {
		self.points
			.lock()
			.map_err(|_| Error::Internal { message: "In-memory index lock poisoned.".to_string() })
	}
}

impl VectorIndex for MemoryVectorIndex {
	fn search<'a>(
		&'a self,
		vector: Vec<f32>,
		stage_ids: &'a [i32],
		limit: u32,
		min_score: f32,
	) -> BoxFuture<'a, Result<Vec<ScoredChunk>>> {
		Box::pin(async move {
			let points = self.lock()?;
			let mut scored: Vec<ScoredChunk> = points
				.iter()
				.filter(|(chunk, _)| stage_ids.is_empty() || stage_ids.contains(&chunk.stage_id))
				.map(|(chunk, stored)| ScoredChunk {
					chunk: chunk.clone(),
					score: cosine(&vector, stored),
				})
				.filter(|scored| scored.score >= min_score)
				.collect();

			scored.sort_by(|a, b| b.score.total_cmp(&a.score));
			scored.truncate(limit as usize);

			Ok(scored)
		})
	}

	fn upsert<'a>(
		&'a self,
		chunks: &'a [ContentChunk],
		vectors: &'a [Vec<f32>],
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			if chunks.len() != vectors.len() {
				return Err(Error::invalid(format!(
					"{} chunks were given {} vectors.",
					chunks.len(),
					vectors.len()
				)));
			}

			let mut points = self.lock()?;

			for (chunk, vector) in chunks.iter().zip(vectors) {
				points.retain(|(existing, _)| existing.chunk_id != chunk.chunk_id);
				points.push((chunk.clone(), vector.clone()));
			}

			Ok(())
		})
	}

	fn delete_content(&self, content_id: Uuid) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move {
			self.lock()?.retain(|(chunk, _)| chunk.content_id != content_id);

			Ok(())
		})
	}
}

impl Stores {
	/// One shared `MemoryStore` behind every relational seam.
	pub fn in_memory(store: Arc<MemoryStore>, vectors: Arc<MemoryVectorIndex>) -> Self {
		Self {
			threads: store.clone(),
			rate_limits: store.clone(),
			audit: store.clone(),
			content_index: store,
			vectors,
		}
	}
}

fn empty_day(day: Date, now: OffsetDateTime) -> UsageDay {
	UsageDay { usage_day: day, message_count: 0, avg_response_ms: 0.0, error_count: 0, updated_at: now }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
	if a.len() != b.len() {
		return 0.0;
	}

	let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
	let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
	let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

	if norm_a == 0.0 || norm_b == 0.0 { 0.0 } else { dot / (norm_a * norm_b) }
}
