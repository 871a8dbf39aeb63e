use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	pub chunking: Chunking,
	#[serde(default)]
	pub retrieval: Retrieval,
	#[serde(default)]
	pub rate_limit: RateLimit,
	#[serde(default)]
	pub tutor: Tutor,
	#[serde(default)]
	pub sessions: Sessions,
	pub security: Security,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub admin_bind: String,
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
	pub qdrant: Qdrant,
}

#[derive(Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Deserialize)]
pub struct Qdrant {
	pub url: String,
	pub collection: String,
	pub vector_dim: u32,
}

#[derive(Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
	/// Optional. Retrieval skips the rerank stage when absent.
	pub rerank: Option<ProviderConfig>,
	pub llm: LlmProviderConfig,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	/// Batch size for ingestion-time embedding calls.
	#[serde(default = "default_embedding_batch_size")]
	pub batch_size: u32,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct ProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	pub max_tokens: u32,
	/// Connect and first-byte timeout.
	pub timeout_ms: u64,
	/// Maximum silence between two streamed deltas.
	#[serde(default = "default_token_timeout_ms")]
	pub token_timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct Chunking {
	pub max_tokens: u32,
	pub overlap_tokens: u32,
	pub tokenizer_repo: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Retrieval {
	pub initial_top_k: u32,
	pub final_top_k: u32,
	pub min_score: f32,
	pub rerank_enabled: bool,
	pub rerank_top_n: u32,
}
impl Default for Retrieval {
	fn default() -> Self {
		Self {
			initial_top_k: 20,
			final_top_k: 5,
			min_score: 0.3,
			rerank_enabled: true,
			rerank_top_n: 5,
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RateLimit {
	pub daily_quota: u32,
	pub window_hours: i64,
	pub exempt_roles: Vec<String>,
}
impl Default for RateLimit {
	fn default() -> Self {
		Self {
			daily_quota: 20,
			window_hours: 24,
			exempt_roles: vec!["instructor".to_string(), "admin".to_string()],
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Tutor {
	pub history_window: u32,
	pub escalation_turn_threshold: u32,
	pub low_understanding_threshold: f32,
	pub confidence_threshold: f32,
	pub max_solution_code_lines: u32,
	pub title_max_chars: u32,
	pub default_title: String,
	/// Highest curriculum stage a learner can report. Larger values are rejected.
	pub max_stage: i32,
}
impl Default for Tutor {
	fn default() -> Self {
		Self {
			history_window: 10,
			escalation_turn_threshold: 8,
			low_understanding_threshold: 0.4,
			confidence_threshold: 0.5,
			max_solution_code_lines: 15,
			title_max_chars: 50,
			default_title: "New conversation".to_string(),
			max_stage: 12,
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Sessions {
	pub retention_days: i64,
	pub cleanup_interval_seconds: u64,
	pub max_page_size: u32,
}
impl Default for Sessions {
	fn default() -> Self {
		Self { retention_days: 90, cleanup_interval_seconds: 3_600, max_page_size: 100 }
	}
}

#[derive(Debug, Deserialize)]
pub struct Security {
	pub bind_localhost_only: bool,
	pub api_auth_token: Option<String>,
	pub admin_auth_token: Option<String>,
	/// Development only. Streams raw upstream error text to clients.
	#[serde(default)]
	pub expose_error_details: bool,
}

fn default_embedding_batch_size() -> u32 {
	64
}

fn default_token_timeout_ms() -> u64 {
	30_000
}
