use serde_json::{Map, Value};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use intelli_domain::title;
use intelli_service::{ActionOutput, Error, NewThread, ThreadAction, ThreadStore, ThreadUpdate};
use intelli_storage::models::{ROLE_ASSISTANT, ROLE_USER};

use super::suite;

#[tokio::test]
async fn threads_are_invisible_to_other_users() {
	let h = suite::harness(&[]);
	let thread =
		h.service.create_thread("owner", NewThread::default()).await.expect("Create failed.");

	h.service
		.save_thread_item(thread.thread_id, ROLE_USER, "What is a servo?", Map::new())
		.await
		.expect("Save failed.");

	let err = h.service.get_thread(thread.thread_id, "intruder").await.expect_err("Should hide.");

	assert_eq!(err.code(), "NOT_FOUND");

	let err = h
		.service
		.load_thread_items(thread.thread_id, "intruder", 10, None)
		.await
		.expect_err("Should hide.");

	assert_eq!(err.code(), "NOT_FOUND");

	let err = h
		.service
		.update_thread(thread.thread_id, "intruder", ThreadUpdate {
			title: Some("Mine now".to_string()),
			..Default::default()
		})
		.await
		.expect_err("Should hide.");

	assert_eq!(err.code(), "NOT_FOUND");

	let err = h.service.delete_thread(thread.thread_id, "intruder").await.expect_err("Should hide.");

	assert_eq!(err.code(), "NOT_FOUND");

	let owned = h.service.load_thread(thread.thread_id, "owner").await.expect("Owner should see it.");

	assert_eq!(owned.items.len(), 1);
	assert!(h.service.list_threads("intruder", 10, 0, None).await.expect("List failed.").is_empty());
}

#[tokio::test]
async fn first_user_message_names_an_untitled_thread() {
	let h = suite::harness(&[]);
	let cfg = suite::config();
	let thread =
		h.service.create_thread("learner-1", NewThread::default()).await.expect("Create failed.");
	let first = "How do I tune the integral gain on my line follower?";
	let (_, named) = h
		.service
		.save_thread_item(thread.thread_id, ROLE_USER, first, Map::new())
		.await
		.expect("Save failed.");
	let expected =
		title::derive_title(first, cfg.tutor.title_max_chars as usize, &cfg.tutor.default_title);

	assert_eq!(named.title.as_deref(), Some(expected.as_str()));

	let (_, after_reply) = h
		.service
		.save_thread_item(thread.thread_id, ROLE_ASSISTANT, "What happens when it is too high?", Map::new())
		.await
		.expect("Save failed.");
	let (_, after_second) = h
		.service
		.save_thread_item(thread.thread_id, ROLE_USER, "Something else entirely", Map::new())
		.await
		.expect("Save failed.");

	assert_eq!(after_reply.title.as_deref(), Some(expected.as_str()));
	assert_eq!(after_second.title.as_deref(), Some(expected.as_str()));
}

#[tokio::test]
async fn explicit_titles_are_kept() {
	let h = suite::harness(&[]);
	let thread = h
		.service
		.create_thread("learner-1", NewThread {
			title: Some("Lab 3 questions".to_string()),
			..Default::default()
		})
		.await
		.expect("Create failed.");
	let (_, stored) = h
		.service
		.save_thread_item(thread.thread_id, ROLE_USER, "Why does my robot drift left?", Map::new())
		.await
		.expect("Save failed.");

	assert_eq!(stored.title.as_deref(), Some("Lab 3 questions"));
}

#[tokio::test]
async fn listing_filters_by_status_and_rejects_unknown_ones() {
	let h = suite::harness(&[]);
	let keep = h.service.create_thread("learner-1", NewThread::default()).await.expect("Create failed.");
	let archive =
		h.service.create_thread("learner-1", NewThread::default()).await.expect("Create failed.");

	h.service
		.update_thread(archive.thread_id, "learner-1", ThreadUpdate {
			status: Some("archived".to_string()),
			..Default::default()
		})
		.await
		.expect("Archive failed.");

	let active = h.service.list_threads("learner-1", 10, 0, Some("active")).await.expect("List failed.");

	assert_eq!(active.len(), 1);
	assert_eq!(active[0].thread_id, keep.thread_id);

	let all = h.service.list_threads("learner-1", 10, 0, None).await.expect("List failed.");

	assert_eq!(all.len(), 2);
	assert_eq!(all[0].thread_id, archive.thread_id, "Most recently updated thread comes first.");

	let err = h.service.list_threads("learner-1", 10, 0, Some("deleted")).await.expect_err("Bad status.");

	assert_eq!(err.code(), "INVALID_REQUEST");
}

#[tokio::test]
async fn metadata_updates_merge() {
	let h = suite::harness(&[]);
	let mut metadata = Map::new();

	metadata.insert("page_path".to_string(), Value::from("/stage-1/pid"));

	let thread = h
		.service
		.create_thread("learner-1", NewThread { metadata, ..Default::default() })
		.await
		.expect("Create failed.");
	let mut patch = Map::new();

	patch.insert("pinned".to_string(), Value::from(true));

	let updated = h
		.service
		.update_thread(thread.thread_id, "learner-1", ThreadUpdate {
			metadata: Some(patch),
			..Default::default()
		})
		.await
		.expect("Update failed.");

	assert_eq!(updated.metadata["page_path"], "/stage-1/pid");
	assert_eq!(updated.metadata["pinned"], true);
}

#[tokio::test]
async fn cleanup_removes_only_expired_marked_threads() {
	let h = suite::harness(&[]);
	let expired = h
		.service
		.create_thread("learner-1", NewThread {
			course_id: Some("robotics-101".to_string()),
			..Default::default()
		})
		.await
		.expect("Create failed.");
	let fresh = h.service.create_thread("learner-2", NewThread::default()).await.expect("Create failed.");
	let unmarked =
		h.service.create_thread("learner-3", NewThread::default()).await.expect("Create failed.");

	h.service
		.save_thread_item(expired.thread_id, ROLE_USER, "Old question", Map::new())
		.await
		.expect("Save failed.");
	h.store
		.mark_for_retention("learner-1", Some("robotics-101"), OffsetDateTime::now_utc() - Duration::days(100))
		.await
		.expect("Mark failed.");

	let marked = h.service.mark_threads_for_retention("learner-2", None).await.expect("Mark failed.");

	assert_eq!(marked, 1);
	assert_eq!(h.service.cleanup_expired_threads(90).await.expect("Cleanup failed."), 1);
	assert_eq!(h.service.cleanup_expired_threads(90).await.expect("Cleanup failed."), 0);
	assert!(h.service.get_thread(expired.thread_id, "learner-1").await.is_err());
	assert!(h.service.get_thread(fresh.thread_id, "learner-2").await.is_ok());
	assert!(h.service.get_thread(unmarked.thread_id, "learner-3").await.is_ok());
	assert_eq!(h.store.item_count().expect("Lock failed."), 0);
}

#[tokio::test]
async fn cleanup_rejects_unrepresentable_retention() {
	let h = suite::harness(&[]);
	let err = h.service.cleanup_expired_threads(i64::MAX).await.expect_err("Cleanup must fail.");

	assert!(matches!(err, Error::InvalidRequest { .. }), "{err:?}");
	assert_eq!(h.service.cleanup_expired_threads(3_650).await.expect("Cleanup failed."), 0);
}

#[tokio::test]
async fn actions_dispatch_against_the_callers_threads() {
	let h = suite::harness(&[]);
	let identity = suite::learner("learner-1", 2);
	let action: ThreadAction =
		serde_json::from_str(r#"{"action":"create","course_id":"robotics-101"}"#).expect("Parse failed.");
	let ActionOutput::Thread(thread) =
		h.service.dispatch(&identity, action).await.expect("Create failed.")
	else {
		panic!("Create should return a thread.");
	};
	let listed = h
		.service
		.dispatch(&identity, ThreadAction::List { limit: None, offset: None, status: None })
		.await
		.expect("List failed.");

	match listed {
		ActionOutput::Threads { threads } => assert_eq!(threads.len(), 1),
		other => panic!("Unexpected output: {other:?}"),
	}

	let stranger = suite::learner("learner-9", 2);
	let err = h
		.service
		.dispatch(&stranger, ThreadAction::Delete { thread_id: thread.thread_id })
		.await
		.expect_err("Stranger cannot delete.");

	assert_eq!(err.code(), "NOT_FOUND");

	let missing = h
		.service
		.dispatch(&identity, ThreadAction::Get { thread_id: Uuid::new_v4() })
		.await
		.expect_err("Unknown thread.");

	assert_eq!(missing.code(), "NOT_FOUND");

	let deleted = h
		.service
		.dispatch(&identity, ThreadAction::Delete { thread_id: thread.thread_id })
		.await
		.expect("Delete failed.");

	assert!(matches!(deleted, ActionOutput::Deleted { deleted: true, .. }));
}

#[tokio::test]
async fn saving_into_a_missing_thread_writes_nothing() {
	let h = suite::harness(&[]);
	let err = h
		.service
		.save_thread_item(Uuid::new_v4(), ROLE_USER, "Is anyone there?", Map::new())
		.await
		.expect_err("Missing thread should be rejected.");

	assert!(matches!(err, Error::NotFound { .. }), "{err:?}");
	assert_eq!(h.store.item_count().expect("Lock failed."), 0);
}
