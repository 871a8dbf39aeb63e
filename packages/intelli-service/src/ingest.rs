use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use intelli_chunking::{ChunkingConfig, ContentSource};
use intelli_storage::models::ContentIndexState;

use crate::{Error, Result, TutorService};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum IngestOutcome {
	Indexed { chunks: u32 },
	/// The stored hash matched and no reindex was forced.
	Unchanged,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IngestReport {
	pub content_id: Uuid,
	pub content_hash: String,
	#[serde(flatten)]
	pub outcome: IngestOutcome,
}

impl TutorService {
	/// Chunks, embeds and indexes one curriculum document. Re-running with identical text is a
	/// no-op unless `force_reindex` is set.
	pub async fn ingest(&self, source: &ContentSource, force_reindex: bool) -> Result<IngestReport> {
		let content_hash = content_hash(source);
		let existing = self.stores.content_index.get(source.content_id).await?;

		if !force_reindex
			&& let Some(state) = existing.as_ref()
			&& state.content_hash == content_hash
		{
			tracing::info!(content_id = %source.content_id, "Content unchanged. Skipping reindex.");

			return Ok(IngestReport {
				content_id: source.content_id,
				content_hash,
				outcome: IngestOutcome::Unchanged,
			});
		}

		let chunking = ChunkingConfig::from(&self.cfg.chunking);
		let chunks = intelli_chunking::chunk_content(source, &chunking, self.tokenizer.as_ref())?;
		let embedding_cfg = &self.cfg.providers.embedding;
		let batch_size = embedding_cfg.batch_size.max(1) as usize;
		let mut vectors = Vec::with_capacity(chunks.len());

		for batch in chunks.chunks(batch_size) {
			let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
			let embedded = self.providers.embedding.embed(embedding_cfg, &texts).await?;

			if embedded.len() != texts.len() {
				return Err(Error::Provider {
					message: "Embedding provider returned an unexpected number of vectors."
						.to_string(),
				});
			}

			vectors.extend(embedded);
		}

		let dim = self.cfg.storage.qdrant.vector_dim as usize;

		if vectors.iter().any(|vector| vector.len() != dim) {
			return Err(Error::Provider { message: "Embedding vector dimension mismatch.".to_string() });
		}

		// The state row goes before any point changes and comes back only after the upsert, so a
		// failure in between leaves the document looking unindexed and the next run rebuilds it.
		if existing.is_some() {
			self.stores.content_index.delete(source.content_id).await?;
		}

		// Old points go first so a shorter document leaves no stale tail chunks behind.
		self.stores.vectors.delete_content(source.content_id).await?;
		self.stores.vectors.upsert(&chunks, &vectors).await?;

		let chunk_count = u32::try_from(chunks.len()).unwrap_or(u32::MAX);
		let state = ContentIndexState {
			content_id: source.content_id,
			stage_id: source.stage_id,
			content_hash: content_hash.clone(),
			chunk_count: i32::try_from(chunk_count).unwrap_or(i32::MAX),
			indexed_at: OffsetDateTime::now_utc(),
		};

		self.stores.content_index.put(&state).await?;

		tracing::info!(
			content_id = %source.content_id,
			stage_id = source.stage_id,
			chunks = chunk_count,
			forced = force_reindex,
			"Content indexed."
		);

		Ok(IngestReport {
			content_id: source.content_id,
			content_hash,
			outcome: IngestOutcome::Indexed { chunks: chunk_count },
		})
	}

	/// Drops a document from the vector index. Returns whether it had been indexed.
	pub async fn remove_content(&self, content_id: Uuid) -> Result<bool> {
		self.stores.vectors.delete_content(content_id).await?;

		let removed = self.stores.content_index.delete(content_id).await?;

		tracing::info!(content_id = %content_id, removed, "Content removed from index.");

		Ok(removed)
	}
}

/// Hash over everything that ends up in the indexed payload.
fn content_hash(source: &ContentSource) -> String {
	let mut hasher = blake3::Hasher::new();

	hasher.update(&source.stage_id.to_le_bytes());
	hasher.update(source.stage_name.as_bytes());
	hasher.update(&[0]);
	hasher.update(source.title.as_bytes());
	hasher.update(&[0]);
	hasher.update(source.text.as_bytes());

	hasher.finalize().to_hex().to_string()
}
