use serde::Serialize;
use serde_json::Value;

use intelli_chunking::ContentChunk;
use intelli_storage::qdrant::ScoredChunk;

use crate::{Error, Result, TutorService};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RetrievalResult {
	#[serde(flatten)]
	pub chunk: ContentChunk,
	/// Final relevance. Equals `rerank_score` when the reranker ran.
	pub score: f32,
	pub vector_score: f32,
	pub rerank_score: Option<f32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Retrieval {
	pub results: Vec<RetrievalResult>,
	/// Set when the reranker failed and vector order was kept.
	pub degraded: bool,
}
impl Retrieval {
	pub fn mean_score(&self) -> Option<f32> {
		if self.results.is_empty() {
			return None;
		}

		Some(self.results.iter().map(|r| r.score).sum::<f32>() / self.results.len() as f32)
	}
}

impl TutorService {
	/// Embeds `query`, searches the accessible stages and optionally reranks the candidates.
	pub async fn retrieve(
		&self,
		query: &str,
		stage_ids: &[i32],
		top_k: Option<u32>,
		use_reranking: bool,
	) -> Result<Retrieval> {
		let cfg = &self.cfg.retrieval;
		let final_top_k = top_k.unwrap_or(cfg.final_top_k).max(1) as usize;
		let vector = self.embed_query(query).await?;
		let candidates =
			self.stores.vectors.search(vector, stage_ids, cfg.initial_top_k, cfg.min_score).await?;

		if candidates.is_empty() {
			tracing::debug!(stage_count = stage_ids.len(), "Retrieval found no candidates.");

			return Ok(Retrieval::default());
		}

		let mut results: Vec<RetrievalResult> = candidates.into_iter().map(from_scored).collect();
		let mut degraded = false;

		if use_reranking
			&& cfg.rerank_enabled
			&& results.len() > 1
			&& let Some(rerank_cfg) = self.cfg.providers.rerank.as_ref()
		{
			match self.rerank(rerank_cfg, query, &results).await {
				Ok(reranked) => results = reranked,
				Err(err) => {
					tracing::warn!(
						error = %err,
						candidates = results.len(),
						"Rerank failed. Falling back to vector order."
					);

					degraded = true;
				},
			}
		}

		results.truncate(final_top_k);

		Ok(Retrieval { results, degraded })
	}

	/// Retrieval for a tutor turn. Highlighted text is prepended to the query and the passages
	/// are rendered as `[stage, title]: passage` blocks.
	pub async fn retrieve_with_context(
		&self,
		query: &str,
		stage_ids: &[i32],
		selected_text: Option<&str>,
	) -> Result<(Retrieval, String)> {
		let query = match selected_text {
			Some(selected) => format!("{selected}\n\n{query}"),
			None => query.to_string(),
		};
		let retrieval = self.retrieve(&query, stage_ids, None, true).await?;
		let context = format_context(&retrieval.results);

		Ok((retrieval, context))
	}

	async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
		let texts = [query.to_string()];
		let mut vectors = self.providers.embedding.embed(&self.cfg.providers.embedding, &texts).await?;
		let vector = vectors.pop().filter(|_| vectors.is_empty()).ok_or_else(|| Error::Provider {
			message: "Embedding provider returned an unexpected number of vectors.".to_string(),
		})?;

		if vector.len() != self.cfg.storage.qdrant.vector_dim as usize {
			return Err(Error::Provider { message: "Embedding vector dimension mismatch.".to_string() });
		}

		Ok(vector)
	}

	async fn rerank(
		&self,
		rerank_cfg: &intelli_config::ProviderConfig,
		query: &str,
		candidates: &[RetrievalResult],
	) -> Result<Vec<RetrievalResult>> {
		let top_n = (self.cfg.retrieval.rerank_top_n as usize).min(candidates.len());
		let docs: Vec<String> = candidates.iter().map(|c| c.chunk.text.clone()).collect();
		let hits = self.providers.rerank.rerank(rerank_cfg, query, &docs, top_n).await?;
		let mut reranked = Vec::with_capacity(top_n);

		for hit in hits.into_iter().take(top_n) {
			let Some(candidate) = candidates.get(hit.index) else {
				return Err(Error::Provider {
					message: format!("Rerank index {} is out of range.", hit.index),
				});
			};
			let mut result = candidate.clone();

			result.score = hit.score;
			result.rerank_score = Some(hit.score);
			result.chunk.metadata.insert("rerank_score".to_string(), Value::from(hit.score));

			reranked.push(result);
		}

		Ok(reranked)
	}
}

pub fn format_context(results: &[RetrievalResult]) -> String {
	results
		.iter()
		.map(|r| format!("[{}, {}]: {}", r.chunk.stage_name, r.chunk.title, r.chunk.text.trim()))
		.collect::<Vec<_>>()
		.join("\n\n")
}

fn from_scored(scored: ScoredChunk) -> RetrievalResult {
	RetrievalResult {
		chunk: scored.chunk,
		score: scored.score,
		vector_score: scored.score,
		rerank_score: None,
	}
}
