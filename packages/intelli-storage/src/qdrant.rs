use std::collections::HashMap;

use intelli_chunking::ContentChunk;
use qdrant_client::{
	Payload,
	qdrant::{
		Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, PointStruct,
		Query, QueryPointsBuilder, ScoredPoint, UpsertPointsBuilder, Value, Vector,
		VectorParamsBuilder, VectorsConfigBuilder, point_id::PointIdOptions, value::Kind,
	},
};
use serde_json::Map;
use uuid::Uuid;

use crate::{Error, Result};

pub const DENSE_VECTOR_NAME: &str = "dense";

#[derive(Clone, Debug, PartialEq)]
pub struct ScoredChunk {
	pub chunk: ContentChunk,
	pub score: f32,
}

pub struct QdrantStore {
	pub client: qdrant_client::Qdrant,
	pub collection: String,
	pub vector_dim: u32,
}
impl QdrantStore {
	pub fn new(cfg: &intelli_config::Qdrant) -> Result<Self> {
		let client = qdrant_client::Qdrant::from_url(&cfg.url).build()?;

		Ok(Self { client, collection: cfg.collection.clone(), vector_dim: cfg.vector_dim })
	}

	pub async fn ensure_collection(&self) -> Result<()> {
		if self.client.collection_exists(self.collection.clone()).await? {
			return Ok(());
		}

		let mut vectors_config = VectorsConfigBuilder::default();

		vectors_config.add_named_vector_params(
			DENSE_VECTOR_NAME,
			VectorParamsBuilder::new(self.vector_dim.into(), Distance::Cosine),
		);

		self.client
			.create_collection(
				CreateCollectionBuilder::new(self.collection.clone()).vectors_config(vectors_config),
			)
			.await?;

		tracing::info!(collection = %self.collection, "Created Qdrant collection.");

		Ok(())
	}

	pub async fn upsert_chunks(&self, chunks: &[ContentChunk], vectors: &[Vec<f32>]) -> Result<()> {
		if chunks.len() != vectors.len() {
			return Err(Error::InvalidArgument(format!(
				"{} chunks were given {} vectors.",
				chunks.len(),
				vectors.len()
			)));
		}
		if chunks.is_empty() {
			return Ok(());
		}

		let mut points = Vec::with_capacity(chunks.len());

		for (chunk, vector) in chunks.iter().zip(vectors) {
			let mut vector_map = HashMap::new();

			vector_map.insert(DENSE_VECTOR_NAME.to_string(), Vector::from(vector.clone()));

			points.push(PointStruct::new(chunk.chunk_id.to_string(), vector_map, chunk_payload(chunk)));
		}

		self.client
			.upsert_points(UpsertPointsBuilder::new(self.collection.clone(), points).wait(true))
			.await?;

		Ok(())
	}

	/// Nearest chunks above `min_score`. An empty `stage_ids` slice disables the stage filter.
	pub async fn search(
		&self,
		vector: Vec<f32>,
		stage_ids: &[i32],
		limit: u32,
		min_score: f32,
	) -> Result<Vec<ScoredChunk>> {
		let mut search = QueryPointsBuilder::new(self.collection.clone())
			.query(Query::new_nearest(vector))
			.using(DENSE_VECTOR_NAME)
			.limit(u64::from(limit))
			.score_threshold(min_score)
			.with_payload(true);

		if let Some(filter) = stage_filter(stage_ids) {
			search = search.filter(filter);
		}

		let response = self.client.query(search).await?;

		response.result.iter().map(scored_chunk).collect()
	}

	pub async fn delete_content(&self, content_id: Uuid) -> Result<()> {
		let filter = Filter::must([Condition::matches("content_id", content_id.to_string())]);
		let delete = DeletePointsBuilder::new(self.collection.clone()).points(filter).wait(true);

		match self.client.delete_points(delete).await {
			Ok(_) => Ok(()),
			Err(err) if is_not_found_error(&err) => {
				tracing::info!(content_id = %content_id, "No Qdrant points to delete for content.");

				Ok(())
			},
			Err(err) => Err(err.into()),
		}
	}
}

pub fn stage_filter(stage_ids: &[i32]) -> Option<Filter> {
	if stage_ids.is_empty() {
		return None;
	}

	let stage_ids: Vec<i64> = stage_ids.iter().map(|id| i64::from(*id)).collect();

	Some(Filter::must([Condition::matches("stage_id", stage_ids)]))
}

fn chunk_payload(chunk: &ContentChunk) -> Payload {
	let mut payload = HashMap::new();
	let metadata = serde_json::Value::Object(chunk.metadata.clone()).to_string();

	payload.insert("chunk_id".to_string(), Value::from(chunk.chunk_id.to_string()));
	payload.insert("content_id".to_string(), Value::from(chunk.content_id.to_string()));
	payload.insert("stage_id".to_string(), Value::from(i64::from(chunk.stage_id)));
	payload.insert("stage_name".to_string(), Value::from(chunk.stage_name.clone()));
	payload.insert("title".to_string(), Value::from(chunk.title.clone()));
	payload.insert("chunk_index".to_string(), Value::from(i64::from(chunk.chunk_index)));
	payload.insert("text".to_string(), Value::from(chunk.text.clone()));
	payload.insert("token_count".to_string(), Value::from(i64::from(chunk.token_count)));
	payload.insert("metadata_json".to_string(), Value::from(metadata));

	Payload::from(payload)
}

fn scored_chunk(point: &ScoredPoint) -> Result<ScoredChunk> {
	let point_id = match point.id.as_ref().and_then(|id| id.point_id_options.as_ref()) {
		Some(PointIdOptions::Uuid(id)) => id.clone(),
		Some(PointIdOptions::Num(id)) => id.to_string(),
		None => String::new(),
	};
	let malformed =
		|message: &str| Error::Payload { point_id: point_id.clone(), message: message.to_string() };
	let payload = &point.payload;
	let chunk_id = payload_uuid(payload, "chunk_id").ok_or_else(|| malformed("chunk_id"))?;
	let content_id = payload_uuid(payload, "content_id").ok_or_else(|| malformed("content_id"))?;
	let stage_id = payload_i64(payload, "stage_id")
		.and_then(|id| i32::try_from(id).ok())
		.ok_or_else(|| malformed("stage_id"))?;
	let chunk_index = payload_i64(payload, "chunk_index")
		.and_then(|idx| i32::try_from(idx).ok())
		.ok_or_else(|| malformed("chunk_index"))?;
	let metadata = payload_str(payload, "metadata_json")
		.and_then(|raw| serde_json::from_str::<Map<String, serde_json::Value>>(raw).ok())
		.unwrap_or_default();
	let chunk = ContentChunk {
		chunk_id,
		content_id,
		stage_id,
		stage_name: payload_str(payload, "stage_name").unwrap_or_default().to_string(),
		title: payload_str(payload, "title").unwrap_or_default().to_string(),
		chunk_index,
		text: payload_str(payload, "text").ok_or_else(|| malformed("text"))?.to_string(),
		token_count: payload_i64(payload, "token_count")
			.and_then(|count| u32::try_from(count).ok())
			.unwrap_or_default(),
		metadata,
	};

	Ok(ScoredChunk { chunk, score: point.score })
}

fn payload_str<'a>(payload: &'a HashMap<String, Value>, key: &str) -> Option<&'a str> {
	match payload.get(key)?.kind.as_ref()? {
		Kind::StringValue(text) => Some(text.as_str()),
		_ => None,
	}
}

fn payload_uuid(payload: &HashMap<String, Value>, key: &str) -> Option<Uuid> {
	payload_str(payload, key).and_then(|text| Uuid::parse_str(text).ok())
}

fn payload_i64(payload: &HashMap<String, Value>, key: &str) -> Option<i64> {
	match payload.get(key)?.kind.as_ref()? {
		Kind::IntegerValue(value) => Some(*value),
		Kind::DoubleValue(value) if value.fract() == 0.0 => Some(*value as i64),
		_ => None,
	}
}

fn is_not_found_error(err: &qdrant_client::QdrantError) -> bool {
	let message = err.to_string().to_lowercase();

	(message.contains("not found") || message.contains("404"))
		&& (message.contains("point") || message.contains("collection"))
}
