use serde::Serialize;
use serde_json::Value;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

pub const THREAD_STATUS_ACTIVE: &str = "active";
pub const THREAD_STATUS_ARCHIVED: &str = "archived";
pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";

#[derive(Clone, Debug, PartialEq, Serialize, sqlx::FromRow)]
pub struct ConversationThread {
	pub thread_id: Uuid,
	pub user_id: String,
	pub course_id: Option<String>,
	pub stage_id: Option<i32>,
	pub title: Option<String>,
	pub status: String,
	pub metadata: Value,
	#[serde(with = "crate::time_serde::option")]
	pub retention_marked_at: Option<OffsetDateTime>,
	#[serde(with = "crate::time_serde")]
	pub created_at: OffsetDateTime,
	#[serde(with = "crate::time_serde")]
	pub updated_at: OffsetDateTime,
}

#[derive(Clone, Debug, PartialEq, Serialize, sqlx::FromRow)]
pub struct ThreadItem {
	pub item_id: Uuid,
	pub thread_id: Uuid,
	pub role: String,
	pub content: String,
	pub metadata: Value,
	#[serde(with = "crate::time_serde")]
	pub created_at: OffsetDateTime,
}

/// Column changes for `update_thread`. `None` leaves the column untouched.
#[derive(Clone, Debug, Default)]
pub struct ThreadPatch {
	pub title: Option<String>,
	pub status: Option<String>,
	/// Shallow-merged into the stored metadata object.
	pub metadata: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, sqlx::FromRow)]
pub struct RateLimitRecord {
	pub user_id: String,
	pub message_count: i32,
	pub window_start: OffsetDateTime,
	pub last_reset: OffsetDateTime,
	pub is_limited: bool,
	pub updated_at: OffsetDateTime,
}

#[derive(Clone, Debug, PartialEq, Serialize, sqlx::FromRow)]
pub struct UsageDay {
	pub usage_day: Date,
	pub message_count: i64,
	pub avg_response_ms: f64,
	pub error_count: i64,
	#[serde(with = "crate::time_serde")]
	pub updated_at: OffsetDateTime,
}

#[derive(Clone, Debug, PartialEq, Serialize, sqlx::FromRow)]
pub struct GuardrailEvent {
	pub event_id: Uuid,
	pub user_id: String,
	pub thread_id: Option<Uuid>,
	pub kind: String,
	pub detail: Value,
	#[serde(with = "crate::time_serde")]
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, PartialEq, Eq, sqlx::FromRow)]
pub struct ContentIndexState {
	pub content_id: Uuid,
	pub stage_id: i32,
	pub content_hash: String,
	pub chunk_count: i32,
	pub indexed_at: OffsetDateTime,
}
