pub mod error;

pub use error::{Error, Result};
pub use tokenizers::Tokenizer;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Encodes text to token ids and back. Counting and windowing must use the same codec.
pub trait TokenCodec {
	fn encode(&self, text: &str) -> Result<Vec<u32>>;

	fn decode(&self, ids: &[u32]) -> Result<String>;
}
impl TokenCodec for Tokenizer {
	fn encode(&self, text: &str) -> Result<Vec<u32>> {
		let encoding = (**self).encode(text, false)
			.map_err(|err| Error::Codec { operation: "encode", message: err.to_string() })?;

		Ok(encoding.get_ids().to_vec())
	}

	fn decode(&self, ids: &[u32]) -> Result<String> {
		(**self).decode(ids, true)
			.map_err(|err| Error::Codec { operation: "decode", message: err.to_string() })
	}
}

#[derive(Clone, Copy, Debug)]
pub struct ChunkingConfig {
	pub max_tokens: u32,
	pub overlap_tokens: u32,
}
impl ChunkingConfig {
	fn step(&self) -> Result<usize> {
		if self.max_tokens == 0 || self.overlap_tokens >= self.max_tokens {
			return Err(Error::InvalidWindow {
				max_tokens: self.max_tokens,
				overlap_tokens: self.overlap_tokens,
			});
		}

		Ok((self.max_tokens - self.overlap_tokens) as usize)
	}
}
impl From<&intelli_config::Chunking> for ChunkingConfig {
	fn from(cfg: &intelli_config::Chunking) -> Self {
		Self { max_tokens: cfg.max_tokens, overlap_tokens: cfg.overlap_tokens }
	}
}

/// A piece of curriculum content awaiting ingestion.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ContentSource {
	pub content_id: Uuid,
	pub stage_id: i32,
	pub stage_name: String,
	pub title: String,
	pub text: String,
	#[serde(default)]
	pub metadata: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ContentChunk {
	pub chunk_id: Uuid,
	pub content_id: Uuid,
	pub stage_id: i32,
	pub stage_name: String,
	pub title: String,
	pub chunk_index: i32,
	pub text: String,
	pub token_count: u32,
	pub metadata: Map<String, Value>,
}

pub fn load_tokenizer(repo: &str) -> Result<Tokenizer> {
	Tokenizer::from_pretrained(repo, None)
		.map_err(|err| Error::Load { repo: repo.to_string(), message: err.to_string() })
}

/// Stable across ingestion passes: the same content id and index always map to the same id.
pub fn chunk_id(content_id: Uuid, chunk_index: i32) -> Uuid {
	Uuid::new_v5(&content_id, chunk_index.to_string().as_bytes())
}

/// Splits `source.text` into windows of at most `cfg.max_tokens` tokens. Consecutive windows
/// share exactly `cfg.overlap_tokens` tokens; the last window may be shorter.
pub fn chunk_content<C>(source: &ContentSource, cfg: &ChunkingConfig, codec: &C) -> Result<Vec<ContentChunk>>
where
	C: TokenCodec + ?Sized,
{
	let step = cfg.step()?;

	if source.text.trim().is_empty() {
		return Ok(Vec::new());
	}

	let ids = codec.encode(&source.text)?;

	if ids.is_empty() {
		return Ok(Vec::new());
	}

	let max = cfg.max_tokens as usize;

	if ids.len() <= max {
		return Ok(vec![build_chunk(source, 0, source.text.clone(), ids.len())]);
	}

	let mut chunks = Vec::with_capacity(ids.len().div_ceil(step));
	let mut start = 0_usize;

	while start < ids.len() {
		let end = (start + max).min(ids.len());
		let window = &ids[start..end];
		let text = codec.decode(window)?;
		let index = i32::try_from(chunks.len()).unwrap_or(i32::MAX);

		chunks.push(build_chunk(source, index, text, window.len()));

		start += step;
	}

	tracing::debug!(
		content_id = %source.content_id,
		tokens = ids.len(),
		chunks = chunks.len(),
		"Content split into token windows."
	);

	Ok(chunks)
}

fn build_chunk(source: &ContentSource, chunk_index: i32, text: String, tokens: usize) -> ContentChunk {
	ContentChunk {
		chunk_id: chunk_id(source.content_id, chunk_index),
		content_id: source.content_id,
		stage_id: source.stage_id,
		stage_name: source.stage_name.clone(),
		title: source.title.clone(),
		chunk_index,
		text,
		token_count: u32::try_from(tokens).unwrap_or(u32::MAX),
		metadata: source.metadata.clone(),
	}
}
