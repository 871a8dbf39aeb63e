use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use intelli_domain::title;
use intelli_storage::models::{
	ConversationThread, ROLE_ASSISTANT, ROLE_USER, THREAD_STATUS_ACTIVE, THREAD_STATUS_ARCHIVED,
	ThreadItem, ThreadPatch,
};

use crate::{Error, Result, TutorService};

#[derive(Clone, Debug, Default, Deserialize)]
pub struct NewThread {
	#[serde(default)]
	pub course_id: Option<String>,
	#[serde(default)]
	pub stage_id: Option<i32>,
	#[serde(default)]
	pub title: Option<String>,
	#[serde(default)]
	pub metadata: Map<String, Value>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ThreadUpdate {
	#[serde(default)]
	pub title: Option<String>,
	#[serde(default)]
	pub status: Option<String>,
	#[serde(default)]
	pub metadata: Option<Map<String, Value>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ThreadWithItems {
	#[serde(flatten)]
	pub thread: ConversationThread,
	pub items: Vec<ThreadItem>,
}

impl TutorService {
	pub async fn create_thread(&self, user_id: &str, new: NewThread) -> Result<ConversationThread> {
		let now = OffsetDateTime::now_utc();
		let thread = ConversationThread {
			thread_id: Uuid::new_v4(),
			user_id: user_id.to_string(),
			course_id: new.course_id.filter(|id| !id.trim().is_empty()),
			stage_id: new.stage_id,
			title: new.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
			status: THREAD_STATUS_ACTIVE.to_string(),
			metadata: Value::Object(new.metadata),
			retention_marked_at: None,
			created_at: now,
			updated_at: now,
		};

		self.stores.threads.insert_thread(&thread).await?;

		tracing::info!(thread_id = %thread.thread_id, user_id = %user_id, "Conversation thread created.");

		Ok(thread)
	}

	/// Owner-scoped lookup. A thread owned by someone else is reported exactly like a missing one.
	pub async fn get_thread(&self, thread_id: Uuid, user_id: &str) -> Result<ConversationThread> {
		self.stores
			.threads
			.get_thread(thread_id, user_id)
			.await?
			.ok_or_else(|| Error::not_found(format!("Thread {thread_id}.")))
	}

	pub async fn load_thread(&self, thread_id: Uuid, user_id: &str) -> Result<ThreadWithItems> {
		let thread = self.get_thread(thread_id, user_id).await?;
		let items =
			self.stores.threads.list_items(thread_id, self.cfg.sessions.max_page_size, None).await?;

		Ok(ThreadWithItems { thread, items })
	}

	pub async fn load_thread_items(
		&self,
		thread_id: Uuid,
		user_id: &str,
		limit: u32,
		before_id: Option<Uuid>,
	) -> Result<Vec<ThreadItem>> {
		self.get_thread(thread_id, user_id).await?;

		let limit = limit.clamp(1, self.cfg.sessions.max_page_size);

		self.stores.threads.list_items(thread_id, limit, before_id).await
	}

	/// Appends a message and touches the thread. The first user message of an untitled thread
	/// also names it.
	pub async fn save_thread_item(
		&self,
		thread_id: Uuid,
		role: &str,
		content: &str,
		metadata: Map<String, Value>,
	) -> Result<(ThreadItem, ConversationThread)> {
		if role != ROLE_USER && role != ROLE_ASSISTANT {
			return Err(Error::invalid(format!("Unknown message role {role:?}.")));
		}

		let item = ThreadItem {
			item_id: Uuid::new_v4(),
			thread_id,
			role: role.to_string(),
			content: content.to_string(),
			metadata: Value::Object(metadata),
			created_at: OffsetDateTime::now_utc(),
		};
		let auto_title = (role == ROLE_USER).then(|| {
			let tutor = &self.cfg.tutor;

			title::derive_title(content, tutor.title_max_chars as usize, &tutor.default_title)
		});
		let thread = self
			.stores
			.threads
			.append_item(&item, auto_title.as_deref())
			.await?
			.ok_or_else(|| Error::not_found(format!("Thread {thread_id}.")))?;

		Ok((item, thread))
	}

	pub async fn list_threads(
		&self,
		user_id: &str,
		limit: u32,
		offset: u32,
		status: Option<&str>,
	) -> Result<Vec<ConversationThread>> {
		if let Some(status) = status {
			validate_status(status)?;
		}

		let limit = limit.clamp(1, self.cfg.sessions.max_page_size);

		self.stores.threads.list_threads(user_id, status, limit, offset).await
	}

	pub async fn update_thread(
		&self,
		thread_id: Uuid,
		user_id: &str,
		update: ThreadUpdate,
	) -> Result<ConversationThread> {
		if let Some(status) = update.status.as_deref() {
			validate_status(status)?;
		}

		let patch = ThreadPatch {
			title: update.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
			status: update.status,
			metadata: update.metadata.map(Value::Object),
		};

		self.stores
			.threads
			.update_thread(thread_id, user_id, &patch, OffsetDateTime::now_utc())
			.await?
			.ok_or_else(|| Error::not_found(format!("Thread {thread_id}.")))
	}

	pub async fn delete_thread(&self, thread_id: Uuid, user_id: &str) -> Result<()> {
		if !self.stores.threads.delete_thread(thread_id, user_id).await? {
			return Err(Error::not_found(format!("Thread {thread_id}.")));
		}

		tracing::info!(thread_id = %thread_id, user_id = %user_id, "Conversation thread deleted.");

		Ok(())
	}

	/// Sets the retention marker on the user's threads, optionally only those of one course.
	/// Already-marked threads keep their original marker.
	pub async fn mark_threads_for_retention(
		&self,
		user_id: &str,
		course_id: Option<&str>,
	) -> Result<u64> {
		let marked = self
			.stores
			.threads
			.mark_for_retention(user_id, course_id, OffsetDateTime::now_utc())
			.await?;

		tracing::info!(user_id = %user_id, course_id = ?course_id, marked, "Threads marked for retention.");

		Ok(marked)
	}

	/// Deletes threads marked longer than `retention_days` ago. Running it twice is harmless.
	pub async fn cleanup_expired_threads(&self, retention_days: i64) -> Result<u64> {
		if !(0..=intelli_config::MAX_RETENTION_DAYS).contains(&retention_days) {
			return Err(Error::invalid(format!(
				"Retention days must be in the range 0-{}.",
				intelli_config::MAX_RETENTION_DAYS
			)));
		}

		let cutoff = OffsetDateTime::now_utc() - Duration::days(retention_days);
		let deleted = self.stores.threads.delete_expired(cutoff).await?;

		if deleted > 0 {
			tracing::info!(deleted, retention_days, "Expired conversation threads deleted.");
		}

		Ok(deleted)
	}
}

fn validate_status(status: &str) -> Result<()> {
	match status {
		THREAD_STATUS_ACTIVE | THREAD_STATUS_ARCHIVED => Ok(()),
		other => Err(Error::invalid(format!("Unknown thread status {other:?}."))),
	}
}
