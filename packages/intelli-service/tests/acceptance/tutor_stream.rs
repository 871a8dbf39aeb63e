use std::time::Duration as StdDuration;

use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use intelli_domain::{
	escalation::EscalationReason,
	guardrail::{self, AnswerRequestIntent},
};
use intelli_providers::chat::ChatRole;
use intelli_service::{
	AuditLog, NewThread, PageContext, RateLimitStore, ThreadStore, TutorEvent, TutorMessageRequest,
};
use intelli_storage::models::{ROLE_ASSISTANT, ROLE_USER, RateLimitRecord};

use super::suite::{self, ChatScript, RerankMode};

fn request(message: &str) -> TutorMessageRequest {
	TutorMessageRequest {
		message: message.to_string(),
		thread_id: None,
		page: PageContext {
			page_path: Some("/stage-1/pid".to_string()),
			course_id: Some("robotics-101".to_string()),
			stage_id: Some(1),
			selected_text: None,
		},
	}
}

fn thread_id(events: &[TutorEvent]) -> Uuid {
	events
		.iter()
		.find_map(|event| match event {
			TutorEvent::Thread { id, .. } => Some(*id),
			_ => None,
		})
		.expect("Stream should announce its thread.")
}

fn streamed_text(events: &[TutorEvent]) -> String {
	events
		.iter()
		.filter_map(|event| match event {
			TutorEvent::Chunk { text } => Some(text.as_str()),
			_ => None,
		})
		.collect()
}

#[tokio::test]
async fn answered_turn_streams_persists_and_counts() {
	let h = suite::harness(&["Think about what ", "the derivative term measures."]);

	suite::seed_curriculum(&h).await;

	let identity = suite::learner("learner-1", 2);
	let events = suite::collect(h.service.stream_message(
		identity,
		request("How does the derivative term in a PID controller reduce overshoot?"),
	))
	.await;

	suite::assert_single_terminal(&events);
	assert_eq!(suite::names(&events), vec![
		"thread",
		"message_saved",
		"response_start",
		"chunk",
		"chunk",
		"response_end"
	]);

	let Some(TutorEvent::ResponseEnd { message_id, rate_limit, sources, degraded, outcome, content }) =
		events.last()
	else {
		panic!("Expected response_end.");
	};

	assert_eq!(*outcome, "delivered");
	assert!(!degraded);
	assert!(content.is_none());
	assert_eq!(rate_limit.remaining, Some(19));
	assert_eq!(rate_limit.limit, Some(20));
	assert!(!sources.is_empty());
	assert!(sources.iter().all(|source| source.stage_id <= 2));

	let items = h.store.list_items(thread_id(&events), 10, None).await.expect("List failed.");

	assert_eq!(items.len(), 2);
	assert_eq!(items[0].role, ROLE_USER);
	assert_eq!(items[1].role, ROLE_ASSISTANT);
	assert_eq!(items[1].item_id, *message_id);
	assert_eq!(items[1].content, "Think about what the derivative term measures.");
	assert_eq!(items[1].metadata["outcome"], "delivered");
	assert!(items[1].metadata["response_ms"].is_number());

	let record = h.store.rate_limit_record("learner-1").expect("Lock failed.").expect("Record missing.");

	assert_eq!(record.message_count, 1);

	let usage = h
		.store
		.usage_day(OffsetDateTime::now_utc().date())
		.await
		.expect("Usage failed.")
		.expect("Usage row missing.");

	assert_eq!(usage.message_count, 1);
	assert_eq!(usage.error_count, 0);
}

#[tokio::test]
async fn answer_requests_are_redirected_without_calling_the_model() {
	let h = suite::harness(&["Here is the full controller."]);

	suite::seed_curriculum(&h).await;

	let message = "Can you just give me the answer to build a PID controller?";
	let events =
		suite::collect(h.service.stream_message(suite::learner("learner-1", 1), request(message)))
			.await;

	suite::assert_single_terminal(&events);
	assert_eq!(h.chat.count(), 0);
	assert!(!suite::names(&events).contains(&"chunk"));

	let redirect = AnswerRequestIntent::DirectAnswer.redirect_message();
	let Some(TutorEvent::ResponseEnd { outcome, content, .. }) = events.last() else {
		panic!("Expected response_end.");
	};

	assert_eq!(*outcome, "redirected");
	assert_eq!(content.as_deref(), Some(redirect));

	let items = h.store.list_items(thread_id(&events), 10, None).await.expect("List failed.");

	assert_eq!(items.len(), 2);
	assert_eq!(items[1].content, redirect);

	let guardrails = h.store.guardrail_events().expect("Lock failed.");

	assert_eq!(guardrails.len(), 1);
	assert_eq!(guardrails[0].kind, "socratic_redirect");
	assert_eq!(guardrails[0].detail["intent"], "direct_answer");
	assert_eq!(
		h.store.rate_limit_record("learner-1").expect("Lock failed.").map(|r| r.message_count),
		Some(1)
	);
}

#[tokio::test]
async fn exhausted_quota_yields_a_single_rate_limited_error() {
	let h = suite::harness(&["unused"]);
	let now = OffsetDateTime::now_utc();

	h.store
		.put(&RateLimitRecord {
			user_id: "learner-1".to_string(),
			message_count: 20,
			window_start: now,
			last_reset: now,
			is_limited: true,
			updated_at: now,
		})
		.await
		.expect("Seed failed.");

	let events = suite::collect(
		h.service.stream_message(suite::learner("learner-1", 1), request("What is a PID loop?")),
	)
	.await;

	assert_eq!(events.len(), 1);

	let TutorEvent::Error { code, message, reset_at } = &events[0] else {
		panic!("Expected an error event.");
	};

	assert_eq!(*code, "RATE_LIMITED");
	assert!(message.contains("20 tutor messages"));
	assert!(reset_at.is_some());
	assert_eq!(h.store.thread_count().expect("Lock failed."), 0);
	assert_eq!(h.store.item_count().expect("Lock failed."), 0);
	assert_eq!(h.chat.count(), 0);
}

#[tokio::test]
async fn generated_solutions_are_replaced_with_hints() {
	let mut code = String::from("Here's the complete code:\n```python\n");

	for line in 0..20 {
		code.push_str(&format!("motor.set_speed({line})\n"));
	}

	code.push_str("```\n");

	let h = suite::harness(&[code.as_str()]);

	suite::seed_curriculum(&h).await;

	let events = suite::collect(h.service.stream_message(
		suite::learner("learner-1", 1),
		request("How should the PID controller gain change the motor speed?"),
	))
	.await;

	suite::assert_single_terminal(&events);

	let Some(TutorEvent::ResponseEnd { outcome, content, .. }) = events.last() else {
		panic!("Expected response_end.");
	};

	assert_eq!(*outcome, "redirected");
	assert_eq!(content.as_deref(), Some(guardrail::HINTS_ONLY_RESPONSE));

	let items = h.store.list_items(thread_id(&events), 10, None).await.expect("List failed.");

	assert_eq!(items[1].content, guardrail::HINTS_ONLY_RESPONSE);
	assert_eq!(items[1].metadata["guardrail"], "solution_blocked");
	assert_eq!(h.store.guardrail_events().expect("Lock failed.")[0].kind, "solution_blocked");
}

#[tokio::test]
async fn missing_content_short_circuits_without_spending_quota() {
	let h = suite::harness(&["unused"]);
	let events = suite::collect(
		h.service.stream_message(suite::learner("learner-1", 1), request("How do I calibrate a lidar?")),
	)
	.await;

	suite::assert_single_terminal(&events);
	assert_eq!(suite::names(&events), vec![
		"thread",
		"message_saved",
		"response_start",
		"chunk",
		"chunk",
		"response_end"
	]);
	assert_eq!(h.chat.count(), 0);

	let Some(TutorEvent::ResponseEnd { sources, outcome, .. }) = events.last() else {
		panic!("Expected response_end.");
	};

	assert!(sources.is_empty());
	assert_eq!(*outcome, "no_content");
	assert_eq!(
		h.store.rate_limit_record("learner-1").expect("Lock failed.").map(|r| r.message_count),
		Some(0)
	);
}

#[tokio::test]
async fn unknown_thread_fails_before_any_work() {
	let h = suite::harness(&["unused"]);
	let mut req = request("What does the integral term do?");

	req.thread_id = Some(Uuid::new_v4());

	let events = suite::collect(h.service.stream_message(suite::learner("learner-1", 1), req)).await;

	assert_eq!(suite::names(&events), vec!["error"]);
	assert!(matches!(&events[0], TutorEvent::Error { code: "NOT_FOUND", .. }));
	assert_eq!(h.store.item_count().expect("Lock failed."), 0);
}

#[tokio::test]
async fn upstream_failure_ends_with_a_sanitized_error() {
	let h = suite::harness(&[]);

	h.chat.set_script(ChatScript::Fail);
	suite::seed_curriculum(&h).await;

	let events = suite::collect(h.service.stream_message(
		suite::learner("learner-1", 1),
		request("Why does a PID controller need a derivative gain?"),
	))
	.await;

	suite::assert_single_terminal(&events);

	let Some(TutorEvent::Error { code, message, .. }) = events.last() else {
		panic!("Expected an error event.");
	};

	assert_eq!(*code, "UPSTREAM_ERROR");
	assert!(!message.contains("secret detail"));
	assert_eq!(h.store.item_count().expect("Lock failed."), 1, "Only the user message is stored.");
	assert_eq!(
		h.store.rate_limit_record("learner-1").expect("Lock failed.").map(|r| r.message_count),
		Some(0)
	);

	let usage = h
		.store
		.usage_day(OffsetDateTime::now_utc().date())
		.await
		.expect("Usage failed.")
		.expect("Usage row missing.");

	assert_eq!(usage.error_count, 1);
}

#[tokio::test]
async fn human_help_requests_offer_escalation() {
	let h = suite::harness(&["unused"]);

	suite::seed_curriculum(&h).await;

	let events = suite::collect(h.service.stream_message(
		suite::learner("learner-1", 1),
		request("This PID stuff is not working, can I talk to a human?"),
	))
	.await;

	suite::assert_single_terminal(&events);
	assert!(suite::names(&events).contains(&"escalation"));
	assert_eq!(h.chat.count(), 0);

	let Some(TutorEvent::ResponseEnd { outcome, content, .. }) = events.last() else {
		panic!("Expected response_end.");
	};

	assert_eq!(*outcome, "escalated");
	assert!(content.is_some());
	assert_eq!(h.store.guardrail_events().expect("Lock failed.")[0].kind, "escalation");
}

#[tokio::test]
async fn follow_up_sees_history_without_duplicating_the_question() {
	let h = suite::harness(&["What do you think the integral term accumulates?"]);

	suite::seed_curriculum(&h).await;

	let first = suite::collect(h.service.stream_message(
		suite::learner("learner-1", 1),
		request("What does the integral gain in a PID controller do?"),
	))
	.await;
	let mut follow_up = request("Does the integral gain cause overshoot in a PID controller?");

	follow_up.thread_id = Some(thread_id(&first));

	let second =
		suite::collect(h.service.stream_message(suite::learner("learner-1", 1), follow_up)).await;

	suite::assert_single_terminal(&second);
	assert_eq!(streamed_text(&second), "What do you think the integral term accumulates?");

	let messages = h.chat.last_messages();
	let current = "Does the integral gain cause overshoot in a PID controller?";

	assert_eq!(messages.iter().filter(|m| m.content == current).count(), 1);
	assert_eq!(messages.last().map(|m| m.content.as_str()), Some(current));
	assert!(messages.iter().any(|m| m.role == ChatRole::Assistant));
	assert_eq!(h.store.count_items(thread_id(&first), ROLE_USER).await.expect("Count failed."), 2);
}

#[tokio::test]
async fn dropping_the_receiver_cancels_without_persisting() {
	let h = suite::harness(&[]);

	h.chat.set_script(ChatScript::Hang(vec!["Let's start with ".to_string()]));
	suite::seed_curriculum(&h).await;

	let mut rx = h.service.stream_message(
		suite::learner("learner-1", 1),
		request("How does a PID controller use the derivative gain?"),
	);

	while let Some(event) = rx.recv().await {
		if matches!(event, TutorEvent::Chunk { .. }) {
			break;
		}
	}

	drop(rx);
	tokio::time::sleep(StdDuration::from_millis(100)).await;

	assert_eq!(h.store.item_count().expect("Lock failed."), 1);
	assert_eq!(
		h.store.rate_limit_record("learner-1").expect("Lock failed.").map(|r| r.message_count),
		Some(0)
	);
}

#[tokio::test]
async fn weak_matches_append_a_disclaimer() {
	let mut cfg = suite::config();

	// Scripted rerank scores average 0.8.
	cfg.tutor.confidence_threshold = 0.95;

	let h = suite::harness_with(cfg, &["Consider what the derivative term measures."], RerankMode::Keep);

	suite::seed_curriculum(&h).await;

	let events = suite::collect(h.service.stream_message(
		suite::learner("learner-1", 2),
		request("How does the derivative term in a PID controller reduce overshoot?"),
	))
	.await;

	suite::assert_single_terminal(&events);
	assert_eq!(suite::names(&events), vec![
		"thread",
		"message_saved",
		"response_start",
		"chunk",
		"chunk",
		"response_end"
	]);

	let note = match &events[4] {
		TutorEvent::Chunk { text } => text.clone(),
		other => panic!("Expected the disclaimer chunk, got {other:?}."),
	};

	assert!(note.contains("only partly matches"), "{note}");

	let Some(TutorEvent::ResponseEnd { outcome, content, .. }) = events.last() else {
		panic!("Expected response_end.");
	};

	assert_eq!(*outcome, "delivered");
	assert!(content.is_none());

	let items = h.store.list_items(thread_id(&events), 10, None).await.expect("List failed.");

	assert_eq!(items[1].content, streamed_text(&events));
	assert!(items[1].content.ends_with(&note));
	assert_eq!(items[1].metadata["low_confidence"], true);
	assert!(items[1].metadata["confidence"].as_f64().is_some_and(|score| score < 0.95));
}

#[tokio::test]
async fn strong_matches_carry_no_disclaimer() {
	let h = suite::harness(&["Consider what the derivative term measures."]);

	suite::seed_curriculum(&h).await;

	let events = suite::collect(h.service.stream_message(
		suite::learner("learner-1", 2),
		request("How does the derivative term in a PID controller reduce overshoot?"),
	))
	.await;
	let items = h.store.list_items(thread_id(&events), 10, None).await.expect("List failed.");

	assert!(!streamed_text(&events).contains("only partly matches"));
	assert_eq!(items[1].metadata["low_confidence"], false);
}

#[tokio::test]
async fn persistent_confusion_offers_help_and_still_answers() {
	let mut cfg = suite::config();

	cfg.tutor.escalation_turn_threshold = 2;

	let h = suite::harness_with(cfg, &["Which part of the derivative term feels unclear?"], RerankMode::Keep);

	suite::seed_curriculum(&h).await;

	let mut metadata = Map::new();

	metadata.insert("understanding_level".to_string(), Value::from(0.2));

	let thread = h
		.service
		.create_thread("learner-1", NewThread { metadata, ..Default::default() })
		.await
		.expect("Create failed.");

	for question in ["What is a PID controller?", "What does the derivative gain change?"] {
		h.service
			.save_thread_item(thread.thread_id, ROLE_USER, question, Map::new())
			.await
			.expect("Save failed.");
	}

	let mut req = request("I'm still confused about the derivative gain in a PID controller.");

	req.thread_id = Some(thread.thread_id);

	let events = suite::collect(h.service.stream_message(suite::learner("learner-1", 2), req)).await;

	suite::assert_single_terminal(&events);
	assert_eq!(suite::names(&events), vec![
		"thread",
		"message_saved",
		"escalation",
		"response_start",
		"chunk",
		"response_end"
	]);
	assert!(matches!(
		events[2],
		TutorEvent::Escalation { reason: EscalationReason::PersistentConfusion { turns: 3, .. } }
	));
	assert!(!events[2].is_terminal());
	assert_eq!(h.chat.count(), 1);

	let Some(TutorEvent::ResponseEnd { outcome, .. }) = events.last() else {
		panic!("Expected response_end.");
	};

	assert_eq!(*outcome, "delivered");

	let items = h.store.list_items(thread.thread_id, 10, None).await.expect("List failed.");
	let answer = items.last().expect("Assistant message missing.");

	assert_eq!(answer.role, ROLE_ASSISTANT);
	assert_eq!(answer.metadata["escalation"], "persistent_confusion");

	let guardrails = h.store.guardrail_events().expect("Lock failed.");

	assert_eq!(guardrails.len(), 1);
	assert_eq!(guardrails[0].kind, "escalation");

	let understanding = h
		.service
		.get_thread(thread.thread_id, "learner-1")
		.await
		.expect("Thread missing.")
		.metadata["understanding_level"]
		.as_f64()
		.expect("Understanding level missing.");

	assert!(understanding < 0.2);
}

#[tokio::test]
async fn out_of_range_stage_is_rejected_before_any_work() {
	let h = suite::harness(&["unused"]);
	let events = suite::collect(h.service.stream_message(
		suite::learner("learner-1", i32::MAX),
		request("What does the integral term do?"),
	))
	.await;

	assert_eq!(suite::names(&events), vec!["error"]);
	assert!(matches!(&events[0], TutorEvent::Error { code: "INVALID_REQUEST", .. }));
	assert_eq!(h.store.thread_count().expect("Lock failed."), 0);
	assert_eq!(h.embedding.count(), 0);
}
