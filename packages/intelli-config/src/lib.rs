mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Chunking, Config, EmbeddingProviderConfig, LlmProviderConfig, Postgres, ProviderConfig,
	Providers, Qdrant, RateLimit, Retrieval, Security, Service, Sessions, Storage, Tutor,
};

use std::{fs, path::Path};

/// Upper bound for `tutor.max_stage`. Accessible stages are materialized as a list.
pub const STAGE_CEILING: i32 = 1_000;
/// One year. Longer windows overflow timestamp arithmetic long before they are useful.
pub const MAX_WINDOW_HOURS: i64 = 24 * 366;
pub const MAX_RETENTION_DAYS: i64 = 3_650;

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::Read { path: path.to_path_buf(), source: err })?;
	let mut cfg: Config =
		toml::from_str(&raw).map_err(|err| Error::Parse { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(validation("service.http_bind must be non-empty."));
	}
	if cfg.providers.embedding.dimensions == 0 {
		return Err(validation("providers.embedding.dimensions must be greater than zero."));
	}
	if cfg.providers.embedding.dimensions != cfg.storage.qdrant.vector_dim {
		return Err(validation(
			"providers.embedding.dimensions must match storage.qdrant.vector_dim.",
		));
	}
	if cfg.providers.embedding.batch_size == 0 {
		return Err(validation("providers.embedding.batch_size must be greater than zero."));
	}
	if cfg.providers.llm.max_tokens == 0 {
		return Err(validation("providers.llm.max_tokens must be greater than zero."));
	}
	if !(0.0..=2.0).contains(&cfg.providers.llm.temperature) {
		return Err(validation("providers.llm.temperature must be in the range 0.0-2.0."));
	}
	if cfg.chunking.max_tokens == 0 {
		return Err(validation("chunking.max_tokens must be greater than zero."));
	}
	if cfg.chunking.overlap_tokens >= cfg.chunking.max_tokens {
		return Err(validation("chunking.overlap_tokens must be less than chunking.max_tokens."));
	}
	if cfg.retrieval.final_top_k == 0 {
		return Err(validation("retrieval.final_top_k must be greater than zero."));
	}
	if cfg.retrieval.initial_top_k < cfg.retrieval.final_top_k {
		return Err(validation(
			"retrieval.initial_top_k must be greater than or equal to retrieval.final_top_k.",
		));
	}
	if !cfg.retrieval.min_score.is_finite() || !(-1.0..=1.0).contains(&cfg.retrieval.min_score) {
		return Err(validation("retrieval.min_score must be a finite number in the range -1.0-1.0."));
	}
	if cfg.retrieval.rerank_enabled && cfg.retrieval.rerank_top_n == 0 {
		return Err(validation(
			"retrieval.rerank_top_n must be greater than zero when reranking is enabled.",
		));
	}
	if cfg.rate_limit.daily_quota == 0 {
		return Err(validation("rate_limit.daily_quota must be greater than zero."));
	}
	if !(1..=MAX_WINDOW_HOURS).contains(&cfg.rate_limit.window_hours) {
		return Err(validation(format!(
			"rate_limit.window_hours must be in the range 1-{MAX_WINDOW_HOURS}."
		)));
	}
	if cfg.tutor.history_window == 0 {
		return Err(validation("tutor.history_window must be greater than zero."));
	}
	if cfg.tutor.title_max_chars < 4 {
		return Err(validation("tutor.title_max_chars must be at least 4."));
	}
	if !(1..=STAGE_CEILING).contains(&cfg.tutor.max_stage) {
		return Err(validation(format!("tutor.max_stage must be in the range 1-{STAGE_CEILING}.")));
	}
	if cfg.tutor.default_title.trim().is_empty() {
		return Err(validation("tutor.default_title must be non-empty."));
	}

	for (label, value) in [
		("tutor.low_understanding_threshold", cfg.tutor.low_understanding_threshold),
		("tutor.confidence_threshold", cfg.tutor.confidence_threshold),
	] {
		if !value.is_finite() || !(0.0..=1.0).contains(&value) {
			return Err(validation(format!("{label} must be in the range 0.0-1.0.")));
		}
	}

	if !(1..=MAX_RETENTION_DAYS).contains(&cfg.sessions.retention_days) {
		return Err(validation(format!(
			"sessions.retention_days must be in the range 1-{MAX_RETENTION_DAYS}."
		)));
	}
	if cfg.sessions.cleanup_interval_seconds == 0 {
		return Err(validation("sessions.cleanup_interval_seconds must be greater than zero."));
	}
	if cfg.sessions.max_page_size == 0 {
		return Err(validation("sessions.max_page_size must be greater than zero."));
	}

	let mut keys = vec![("embedding", &cfg.providers.embedding.api_key), ("llm", &cfg.providers.llm.api_key)];

	if let Some(rerank) = cfg.providers.rerank.as_ref() {
		keys.push(("rerank", &rerank.api_key));
	}

	for (label, key) in keys {
		if key.trim().is_empty() {
			return Err(validation(format!("Provider {label} api_key must be non-empty.")));
		}
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg.chunking.tokenizer_repo.as_deref().map(|repo| repo.trim().is_empty()).unwrap_or(false) {
		cfg.chunking.tokenizer_repo = None;
	}
	if cfg.security.api_auth_token.as_deref().map(|token| token.trim().is_empty()).unwrap_or(false)
	{
		cfg.security.api_auth_token = None;
	}
	if cfg
		.security
		.admin_auth_token
		.as_deref()
		.map(|token| token.trim().is_empty())
		.unwrap_or(false)
	{
		cfg.security.admin_auth_token = None;
	}

	cfg.rate_limit.exempt_roles = cfg
		.rate_limit
		.exempt_roles
		.iter()
		.map(|role| role.trim().to_lowercase())
		.filter(|role| !role.is_empty())
		.collect();
}

fn validation(message: impl Into<String>) -> Error {
	Error::Validation { message: message.into() }
}
