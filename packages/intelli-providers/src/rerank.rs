use std::cmp::Ordering;

use serde_json::Value;

use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RerankHit {
	/// Position in the `docs` slice passed to [`rerank`].
	pub index: usize,
	pub score: f32,
}

/// Scores `docs` against `query` and returns the best `top_n`, highest score first.
pub async fn rerank(
	cfg: &intelli_config::ProviderConfig,
	query: &str,
	docs: &[String],
	top_n: usize,
) -> Result<Vec<RerankHit>> {
	let client = crate::client(cfg.timeout_ms)?;
	let body = serde_json::json!({
		"model": cfg.model,
		"query": query,
		"documents": docs,
		"top_n": top_n,
	});
	let res = client
		.post(crate::endpoint(&cfg.api_base, &cfg.path))
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = crate::check_status(&cfg.provider_id, res).await?.json().await?;

	parse_rerank_response(json, docs.len(), top_n)
}

fn parse_rerank_response(json: Value, doc_count: usize, top_n: usize) -> Result<Vec<RerankHit>> {
	let results = json
		.get("results")
		.or_else(|| json.get("data"))
		.and_then(|v| v.as_array())
		.ok_or_else(|| Error::invalid_response("Rerank response is missing results array."))?;
	let mut hits = Vec::with_capacity(results.len());

	for item in results {
		let index = item
			.get("index")
			.and_then(|v| v.as_u64())
			.ok_or_else(|| Error::invalid_response("Rerank result is missing index."))?
			as usize;
		let score = item
			.get("relevance_score")
			.or_else(|| item.get("score"))
			.and_then(|v| v.as_f64())
			.ok_or_else(|| Error::invalid_response("Rerank result is missing score."))?
			as f32;

		if index >= doc_count {
			return Err(Error::invalid_response(format!(
				"Rerank result index {index} is out of range for {doc_count} documents."
			)));
		}

		hits.push(RerankHit { index, score });
	}

	hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
	hits.truncate(top_n.min(doc_count));

	Ok(hits)
}
