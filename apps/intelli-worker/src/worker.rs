use std::{fs, time::Duration};

use serde_json::{Map, Value};
use tokio::time::{self, MissedTickBehavior};

use intelli_chunking::{ContentSource, TokenCodec};
use intelli_service::TutorService;

use crate::{Error, IngestArgs, Result};

/// Runs `cleanup_once` every `sessions.cleanup_interval_seconds`. Failures are logged and the
/// loop keeps going.
pub async fn run_cleanup_loop(service: &TutorService) -> color_eyre::Result<()> {
	let period = Duration::from_secs(service.cfg.sessions.cleanup_interval_seconds.max(1));
	let mut ticker = time::interval(period);

	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

	tracing::info!(interval_seconds = period.as_secs(), "Thread cleanup worker started.");

	loop {
		ticker.tick().await;

		if let Err(err) = cleanup_once(service).await {
			tracing::error!(error = %err, "Thread cleanup failed.");
		}
	}
}

pub async fn cleanup_once(service: &TutorService) -> Result<u64> {
	let retention_days = service.cfg.sessions.retention_days;
	let deleted = service.cleanup_expired_threads(retention_days).await?;

	tracing::debug!(deleted, retention_days, "Thread cleanup pass finished.");

	Ok(deleted)
}

pub fn load_source(args: &IngestArgs) -> Result<ContentSource> {
	let text = fs::read_to_string(&args.file)
		.map_err(|source| Error::Read { path: args.file.display().to_string(), source })?;

	if text.trim().is_empty() {
		return Err(Error::Validation(format!("{} is empty.", args.file.display())));
	}

	let title = match &args.title {
		Some(title) => title.clone(),
		None => args
			.file
			.file_stem()
			.map(|stem| stem.to_string_lossy().replace(['_', '-'], " "))
			.ok_or_else(|| Error::Validation("Cannot derive a title from the file name.".into()))?,
	};
	let metadata = match &args.metadata {
		Some(raw) => match serde_json::from_str::<Value>(raw)? {
			Value::Object(map) => map,
			_ => return Err(Error::Validation("Metadata must be a JSON object.".to_string())),
		},
		None => Map::new(),
	};

	Ok(ContentSource {
		content_id: args.content_id,
		stage_id: args.stage_id,
		stage_name: args.stage_name.clone().unwrap_or_else(|| format!("Stage {}", args.stage_id)),
		title,
		text,
		metadata,
	})
}

/// Stand-in for commands that never chunk text.
pub struct NoTokenizer;
impl TokenCodec for NoTokenizer {
	fn encode(&self, _text: &str) -> intelli_chunking::Result<Vec<u32>> {
		Err(not_loaded("encode"))
	}

	fn decode(&self, _ids: &[u32]) -> intelli_chunking::Result<String> {
		Err(not_loaded("decode"))
	}
}

fn not_loaded(operation: &'static str) -> intelli_chunking::Error {
	intelli_chunking::Error::Codec { operation, message: "No tokenizer loaded.".to_string() }
}
