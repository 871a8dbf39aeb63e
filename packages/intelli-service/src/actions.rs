use serde::{Deserialize, Serialize};
use uuid::Uuid;

use intelli_storage::models::{ConversationThread, ThreadItem};

use crate::{
	Identity, NewThread, Result, ThreadUpdate, ThreadWithItems, TutorService, UsageStats,
};

const DEFAULT_PAGE_SIZE: u32 = 20;

/// Non-streaming thread operations, addressed by the `action` field of the request body.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ThreadAction {
	Create {
		#[serde(flatten)]
		thread: NewThread,
	},
	List {
		#[serde(default)]
		limit: Option<u32>,
		#[serde(default)]
		offset: Option<u32>,
		#[serde(default)]
		status: Option<String>,
	},
	Get {
		thread_id: Uuid,
	},
	Items {
		thread_id: Uuid,
		#[serde(default)]
		limit: Option<u32>,
		#[serde(default)]
		before_id: Option<Uuid>,
	},
	Update {
		thread_id: Uuid,
		#[serde(flatten)]
		update: ThreadUpdate,
	},
	Delete {
		thread_id: Uuid,
	},
	Usage,
	MarkRetention {
		#[serde(default)]
		course_id: Option<String>,
	},
}
impl ThreadAction {
	pub fn name(&self) -> &'static str {
		match self {
			Self::Create { .. } => "create",
			Self::List { .. } => "list",
			Self::Get { .. } => "get",
			Self::Items { .. } => "items",
			Self::Update { .. } => "update",
			Self::Delete { .. } => "delete",
			Self::Usage => "usage",
			Self::MarkRetention { .. } => "mark_retention",
		}
	}
}

#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum ActionOutput {
	Thread(ConversationThread),
	ThreadWithItems(ThreadWithItems),
	Threads { threads: Vec<ConversationThread> },
	Items { items: Vec<ThreadItem> },
	Deleted { thread_id: Uuid, deleted: bool },
	Usage(UsageStats),
	Marked { marked: u64 },
}

impl TutorService {
	/// Runs one thread action on behalf of `identity`. Every thread lookup is owner-scoped.
	pub async fn dispatch(&self, identity: &Identity, action: ThreadAction) -> Result<ActionOutput> {
		let user_id = identity.user_id.as_str();

		tracing::debug!(user_id = %user_id, action = action.name(), "Dispatching thread action.");

		let output = match action {
			ThreadAction::Create { thread } =>
				ActionOutput::Thread(self.create_thread(user_id, thread).await?),
			ThreadAction::List { limit, offset, status } => ActionOutput::Threads {
				threads: self
					.list_threads(
						user_id,
						limit.unwrap_or(DEFAULT_PAGE_SIZE),
						offset.unwrap_or(0),
						status.as_deref(),
					)
					.await?,
			},
			ThreadAction::Get { thread_id } =>
				ActionOutput::ThreadWithItems(self.load_thread(thread_id, user_id).await?),
			ThreadAction::Items { thread_id, limit, before_id } => ActionOutput::Items {
				items: self
					.load_thread_items(
						thread_id,
						user_id,
						limit.unwrap_or(self.cfg.sessions.max_page_size),
						before_id,
					)
					.await?,
			},
			ThreadAction::Update { thread_id, update } =>
				ActionOutput::Thread(self.update_thread(thread_id, user_id, update).await?),
			ThreadAction::Delete { thread_id } => {
				self.delete_thread(thread_id, user_id).await?;

				ActionOutput::Deleted { thread_id, deleted: true }
			},
			ThreadAction::Usage => ActionOutput::Usage(self.usage(user_id, &identity.role).await?),
			ThreadAction::MarkRetention { course_id } => ActionOutput::Marked {
				marked: self.mark_threads_for_retention(user_id, course_id.as_deref()).await?,
			},
		};

		Ok(output)
	}
}
