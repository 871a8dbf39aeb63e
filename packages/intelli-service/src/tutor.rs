use std::{sync::Arc, time::Instant};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use uuid::Uuid;

use intelli_domain::{
	escalation::{self, EscalationReason, INITIAL_UNDERSTANDING},
	guardrail::{self, AnswerRequestIntent, GuardrailKind, SolutionLeak},
	stages,
};
use intelli_providers::chat::ChatMessage;
use intelli_storage::{
	models::{ConversationThread, GuardrailEvent, ROLE_ASSISTANT, ROLE_USER, ThreadPatch},
	time_serde,
};

use crate::{
	Error, Identity, PageContext, RequestContext, Result, Retrieval, TutorService,
	rate_limit::QuotaStatus, sessions::NewThread,
};

const NO_CONTENT_MESSAGE: &str = "I couldn't find course material that matches your question. ";
const REPHRASE_HINT: &str =
	"Try rephrasing it, or mention the stage or topic you are working on so I can look in the right place.";
const LOW_CONFIDENCE_NOTE: &str = "\n\n_Note: the course material I found only partly matches your question, so double-check this against your stage readings or ask your instructor._";
const UNDERSTANDING_KEY: &str = "understanding_level";
const EVENT_BUFFER: usize = 64;

#[derive(Clone, Debug, Deserialize)]
pub struct TutorMessageRequest {
	pub message: String,
	#[serde(default)]
	pub thread_id: Option<Uuid>,
	#[serde(default)]
	pub page: PageContext,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RateLimitSnapshot {
	pub remaining: Option<u32>,
	pub limit: Option<u32>,
	#[serde(with = "time_serde::option")]
	pub reset_at: Option<OffsetDateTime>,
}
impl From<&QuotaStatus> for RateLimitSnapshot {
	fn from(status: &QuotaStatus) -> Self {
		Self { remaining: status.remaining, limit: status.limit, reset_at: status.reset_at }
	}
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Source {
	pub content_id: Uuid,
	pub chunk_id: Uuid,
	pub stage_id: i32,
	pub stage_name: String,
	pub title: String,
	pub score: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RedirectReason {
	AnswerRequest(AnswerRequestIntent),
	SolutionLeak(SolutionLeak),
}
impl RedirectReason {
	pub fn guardrail_kind(&self) -> GuardrailKind {
		match self {
			Self::AnswerRequest(_) => GuardrailKind::SocraticRedirect,
			Self::SolutionLeak(_) => GuardrailKind::SolutionBlocked,
		}
	}

	fn detail(&self) -> Value {
		match self {
			Self::AnswerRequest(intent) => json!({ "intent": intent.as_str() }),
			Self::SolutionLeak(leak) => json!({ "leak": leak }),
		}
	}
}

/// What the learner ends up receiving for one turn.
#[derive(Clone, Debug, PartialEq)]
pub enum GenerationOutcome {
	Delivered { text: String },
	Redirected { reason: RedirectReason, text: String },
	Escalated { reason: EscalationReason },
}
impl GenerationOutcome {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Delivered { .. } => "delivered",
			Self::Redirected { .. } => "redirected",
			Self::Escalated { .. } => "escalated",
		}
	}

	pub fn text(&self) -> &str {
		match self {
			Self::Delivered { text } | Self::Redirected { text, .. } => text,
			Self::Escalated { reason } => reason.offer_message(),
		}
	}
}

/// One server-sent event of a tutor turn. Every stream ends with exactly one terminal event.
#[derive(Clone, Debug, PartialEq)]
pub enum TutorEvent {
	Thread { id: Uuid, title: Option<String> },
	MessageSaved { id: Uuid },
	ResponseStart,
	Chunk { text: String },
	Escalation { reason: EscalationReason },
	ResponseEnd {
		message_id: Uuid,
		rate_limit: RateLimitSnapshot,
		sources: Vec<Source>,
		degraded: bool,
		outcome: &'static str,
		/// Full assistant text when it differs from the streamed chunks.
		content: Option<String>,
	},
	Error { code: &'static str, message: String, reset_at: Option<OffsetDateTime> },
}
impl TutorEvent {
	pub fn name(&self) -> &'static str {
		match self {
			Self::Thread { .. } => "thread",
			Self::MessageSaved { .. } => "message_saved",
			Self::ResponseStart => "response_start",
			Self::Chunk { .. } => "chunk",
			Self::Escalation { .. } => "escalation",
			Self::ResponseEnd { .. } => "response_end",
			Self::Error { .. } => "error",
		}
	}

	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::ResponseEnd { .. } | Self::Error { .. })
	}

	pub fn data(&self) -> Value {
		match self {
			Self::Thread { id, title } => json!({ "id": id, "title": title }),
			Self::MessageSaved { id } => json!({ "id": id, "role": ROLE_USER }),
			Self::ResponseStart => json!({}),
			Self::Chunk { text } => json!({ "text": text }),
			Self::Escalation { reason } => json!({
				"reason": reason.as_str(),
				"message": reason.offer_message(),
			}),
			Self::ResponseEnd { message_id, rate_limit, sources, degraded, outcome, content } => {
				let mut data = json!({
					"message_id": message_id,
					"rate_limit": rate_limit,
					"sources": sources,
					"degraded": degraded,
					"outcome": outcome,
				});

				if let Some(content) = content {
					data["content"] = Value::from(content.as_str());
				}

				data
			},
			Self::Error { code, message, reset_at } => {
				let mut data = json!({ "code": code, "message": message });

				if let Some(reset_at) = reset_at
					&& let Ok(formatted) =
						reset_at.format(&time::format_description::well_known::Rfc3339)
				{
					data["reset_at"] = Value::from(formatted);
				}

				data
			},
		}
	}
}

enum TurnError {
	/// The client went away. Nothing more is sent or persisted.
	Cancelled,
	Failed(Error),
}
impl From<Error> for TurnError {
	fn from(err: Error) -> Self {
		Self::Failed(err)
	}
}

struct EventSink {
	tx: mpsc::Sender<TutorEvent>,
}
impl EventSink {
	async fn send(&self, event: TutorEvent) -> Result<(), TurnError> {
		self.tx.send(event).await.map_err(|_| TurnError::Cancelled)
	}

	fn ensure_open(&self) -> Result<(), TurnError> {
		if self.tx.is_closed() { Err(TurnError::Cancelled) } else { Ok(()) }
	}
}

/// State carried from the user-message half of a turn into the answer half.
struct Turn {
	thread: ConversationThread,
	history: Vec<ChatMessage>,
	retrieval: Retrieval,
	context: String,
	escalation: Option<EscalationReason>,
}

impl TutorService {
	/// Runs one tutor turn on a background task. Dropping the receiver cancels the turn at its
	/// next suspension point.
	pub fn stream_message(
		self: &Arc<Self>,
		identity: Identity,
		request: TutorMessageRequest,
	) -> mpsc::Receiver<TutorEvent> {
		let (tx, rx) = mpsc::channel(EVENT_BUFFER);
		let service = Arc::clone(self);

		tokio::spawn(async move {
			let sink = EventSink { tx };
			let user_id = identity.user_id.clone();

			if !stages::is_valid_current_stage(identity.current_stage, service.cfg.tutor.max_stage) {
				let err = Error::invalid(format!(
					"Current stage must be between 1 and {}.",
					service.cfg.tutor.max_stage
				));

				return service.fail_turn(&user_id, err, &sink).await;
			}

			let mut ctx = RequestContext::new(identity, request.page.clone());

			match service.run_turn(&mut ctx, &request, &sink).await {
				Ok(()) => {},
				Err(TurnError::Cancelled) => {
					tracing::info!(user_id = %user_id, "Tutor turn cancelled by the client.");
				},
				Err(TurnError::Failed(err)) => service.fail_turn(&user_id, err, &sink).await,
			}
		});

		rx
	}

	async fn fail_turn(&self, user_id: &str, err: Error, sink: &EventSink) {
		let reset_at = match &err {
			Error::RateLimited { reset_at, .. } => Some(*reset_at),
			_ => None,
		};

		match &err {
			Error::RateLimited { .. } => {
				tracing::info!(user_id = %user_id, "Tutor message rejected by rate limit.");
			},
			Error::NotFound { .. } | Error::InvalidRequest { .. } => {
				tracing::info!(user_id = %user_id, error = %err, "Tutor message rejected.");
			},
			_ => {
				tracing::error!(user_id = %user_id, error = %err, "Tutor turn failed.");

				let now = OffsetDateTime::now_utc();

				if let Err(usage_err) = self.stores.audit.record_error(now.date(), now).await {
					tracing::warn!(error = %usage_err, "Failed to record tutor error metric.");
				}
			},
		}

		let event = TutorEvent::Error {
			code: err.code(),
			message: err.public_message(self.cfg.security.expose_error_details),
			reset_at,
		};

		// A closed channel means nobody is left to tell.
		let _ = sink.send(event).await;
	}

	async fn run_turn(
		&self,
		ctx: &mut RequestContext,
		request: &TutorMessageRequest,
		sink: &EventSink,
	) -> Result<(), TurnError> {
		let started = Instant::now();
		let message = request.message.trim();

		if message.is_empty() {
			return Err(Error::invalid("Message must not be empty.").into());
		}

		let quota = self.check_rate_limit(ctx.user_id(), ctx.role()).await?;

		if !quota.allowed {
			return Err(Error::RateLimited {
				message: quota.message.clone().unwrap_or_default(),
				reset_at: quota.reset_at.unwrap_or_else(OffsetDateTime::now_utc),
			}
			.into());
		}

		ctx.quota = Some(quota);

		let turn = self.prepare_turn(ctx, request.thread_id, message, sink).await?;

		if let Some(reason) = turn.escalation.as_ref() {
			sink.send(TutorEvent::Escalation { reason: *reason }).await?;
			self.log_guardrail(ctx, turn.thread.thread_id, GuardrailKind::Escalation, json!({ "reason": reason }))
				.await?;
		}

		sink.send(TutorEvent::ResponseStart).await?;

		if turn.retrieval.results.is_empty()
			&& !matches!(turn.escalation, Some(EscalationReason::HumanHelpRequested))
		{
			return self.finish_without_content(ctx, &turn, sink).await;
		}

		let (outcome, streamed) = self.generate(ctx, message, &turn, sink).await?;
		let confidence = turn.retrieval.mean_score();
		let low_confidence = matches!(outcome, GenerationOutcome::Delivered { .. })
			&& confidence.is_some_and(|score| score < self.cfg.tutor.confidence_threshold);
		let mut final_text = outcome.text().to_string();

		if low_confidence {
			sink.send(TutorEvent::Chunk { text: LOW_CONFIDENCE_NOTE.to_string() }).await?;

			final_text.push_str(LOW_CONFIDENCE_NOTE);
		}
		if let GenerationOutcome::Redirected { reason, .. } = &outcome {
			self.log_guardrail(ctx, turn.thread.thread_id, reason.guardrail_kind(), reason.detail())
				.await?;
		}

		sink.ensure_open()?;

		let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
		let mut metadata = Map::new();

		metadata.insert("outcome".to_string(), Value::from(outcome.as_str()));
		metadata.insert("response_ms".to_string(), Value::from(elapsed_ms.round()));
		metadata.insert("source_count".to_string(), Value::from(turn.retrieval.results.len()));
		metadata.insert("degraded".to_string(), Value::from(turn.retrieval.degraded));
		metadata.insert("low_confidence".to_string(), Value::from(low_confidence));

		if let Some(confidence) = confidence {
			metadata.insert("confidence".to_string(), Value::from(confidence));
		}
		if let Some(reason) = turn.escalation.as_ref() {
			metadata.insert("escalation".to_string(), Value::from(reason.as_str()));
		}
		if let GenerationOutcome::Redirected { reason, .. } = &outcome {
			metadata.insert(
				"guardrail".to_string(),
				Value::from(reason.guardrail_kind().as_str()),
			);
		}

		let (assistant, _) = self
			.save_thread_item(turn.thread.thread_id, ROLE_ASSISTANT, &final_text, metadata)
			.await?;
		let quota = self.increment_rate_limit(ctx.user_id(), ctx.role()).await?;
		let now = OffsetDateTime::now_utc();

		self.stores.audit.record_response(now.date(), elapsed_ms, now).await?;

		tracing::info!(
			user_id = %ctx.user_id(),
			thread_id = %turn.thread.thread_id,
			outcome = outcome.as_str(),
			response_ms = elapsed_ms.round(),
			"Tutor turn completed."
		);

		sink.send(TutorEvent::ResponseEnd {
			message_id: assistant.item_id,
			rate_limit: RateLimitSnapshot::from(&quota),
			sources: sources(&turn.retrieval),
			degraded: turn.retrieval.degraded,
			outcome: outcome.as_str(),
			content: (!streamed).then_some(final_text),
		})
		.await
	}

	/// Resolves the thread, stores the learner's message and gathers everything generation needs.
	async fn prepare_turn(
		&self,
		ctx: &RequestContext,
		thread_id: Option<Uuid>,
		message: &str,
		sink: &EventSink,
	) -> Result<Turn, TurnError> {
		let user_id = ctx.user_id();
		let thread = match thread_id {
			Some(thread_id) => self.get_thread(thread_id, user_id).await?,
			None => self.create_thread(user_id, new_thread_for(&ctx.page)).await?,
		};

		sink.send(TutorEvent::Thread { id: thread.thread_id, title: thread.title.clone() }).await?;

		let previous_understanding = thread
			.metadata
			.get(UNDERSTANDING_KEY)
			.and_then(Value::as_f64)
			.map(|level| level as f32)
			.unwrap_or(INITIAL_UNDERSTANDING);
		let understanding = escalation::update_understanding(previous_understanding, message);
		let (user_item, thread) =
			self.save_thread_item(thread.thread_id, ROLE_USER, message, page_metadata(&ctx.page)).await?;

		sink.send(TutorEvent::MessageSaved { id: user_item.item_id }).await?;

		let patch = ThreadPatch {
			metadata: Some(json!({ UNDERSTANDING_KEY: understanding })),
			..Default::default()
		};
		let thread = self
			.stores
			.threads
			.update_thread(thread.thread_id, user_id, &patch, OffsetDateTime::now_utc())
			.await?
			.ok_or_else(|| Error::not_found(format!("Thread {}.", thread.thread_id)))?;
		let history = self.load_history(thread.thread_id, user_item.item_id).await?;
		let user_turns = self.stores.threads.count_items(thread.thread_id, ROLE_USER).await?;
		let escalation = escalation::check_escalation(
			u32::try_from(user_turns).unwrap_or(u32::MAX),
			understanding,
			message,
			&self.cfg.tutor,
		);

		if matches!(escalation, Some(EscalationReason::HumanHelpRequested)) {
			return Ok(Turn {
				thread,
				history,
				retrieval: Retrieval::default(),
				context: String::new(),
				escalation,
			});
		}

		let (retrieval, context) = self
			.retrieve_with_context(message, &ctx.accessible_stage_ids, ctx.page.selected_text())
			.await?;

		Ok(Turn { thread, history, retrieval, context, escalation })
	}

	/// Recent messages before the current one, oldest first.
	async fn load_history(&self, thread_id: Uuid, exclude: Uuid) -> Result<Vec<ChatMessage>> {
		let window = self.cfg.tutor.history_window;
		let items = self.stores.threads.list_items(thread_id, window.saturating_add(1), None).await?;
		let mut history: Vec<ChatMessage> = items
			.into_iter()
			.filter(|item| item.item_id != exclude)
			.map(|item| match item.role.as_str() {
				ROLE_ASSISTANT => ChatMessage::assistant(item.content),
				_ => ChatMessage::user(item.content),
			})
			.collect();
		let overflow = history.len().saturating_sub(window as usize);

		history.drain(..overflow);

		Ok(history)
	}

	/// Produces the assistant text. Returns whether the text reached the client as chunks.
	async fn generate(
		&self,
		ctx: &RequestContext,
		message: &str,
		turn: &Turn,
		sink: &EventSink,
	) -> Result<(GenerationOutcome, bool), TurnError> {
		if let Some(reason @ EscalationReason::HumanHelpRequested) = turn.escalation {
			return Ok((GenerationOutcome::Escalated { reason }, false));
		}
		if let Some(intent) = guardrail::detect_answer_request(message) {
			tracing::info!(
				user_id = %ctx.user_id(),
				intent = intent.as_str(),
				"Answer request redirected before generation."
			);

			return Ok((
				GenerationOutcome::Redirected {
					reason: RedirectReason::AnswerRequest(intent),
					text: intent.redirect_message().to_string(),
				},
				false,
			));
		}

		let messages = build_prompt(&turn.context, &turn.history, message);
		let mut stream =
			self.providers.chat.stream_chat(&self.cfg.providers.llm, &messages).await.map_err(Error::from)?;
		let mut text = String::new();

		loop {
			let next = tokio::select! {
				_ = sink.tx.closed() => return Err(TurnError::Cancelled),
				next = stream.next() => next,
			};

			match next {
				None => break,
				Some(Ok(delta)) => {
					text.push_str(&delta);
					sink.send(TutorEvent::Chunk { text: delta }).await?;
				},
				Some(Err(err)) => return Err(Error::from(err).into()),
			}
		}

		if text.trim().is_empty() {
			return Err(Error::Provider { message: "Model returned an empty completion.".to_string() }
				.into());
		}

		let max_lines = self.cfg.tutor.max_solution_code_lines as usize;

		if let Some(leak) = guardrail::detect_solution_leak(&text, max_lines) {
			tracing::info!(user_id = %ctx.user_id(), leak = ?leak, "Generated solution replaced with hints.");

			return Ok((
				GenerationOutcome::Redirected {
					reason: RedirectReason::SolutionLeak(leak),
					text: guardrail::HINTS_ONLY_RESPONSE.to_string(),
				},
				false,
			));
		}

		Ok((GenerationOutcome::Delivered { text }, true))
	}

	/// Short circuit when nothing in the accessible stages matches. No model call is made and the
	/// quota is left untouched.
	async fn finish_without_content(
		&self,
		ctx: &RequestContext,
		turn: &Turn,
		sink: &EventSink,
	) -> Result<(), TurnError> {
		sink.send(TutorEvent::Chunk { text: NO_CONTENT_MESSAGE.to_string() }).await?;
		sink.send(TutorEvent::Chunk { text: REPHRASE_HINT.to_string() }).await?;
		sink.ensure_open()?;

		let mut metadata = Map::new();

		metadata.insert("outcome".to_string(), Value::from("no_content"));

		let text = format!("{NO_CONTENT_MESSAGE}{REPHRASE_HINT}");
		let (assistant, _) =
			self.save_thread_item(turn.thread.thread_id, ROLE_ASSISTANT, &text, metadata).await?;
		let snapshot = ctx.quota.as_ref().map(RateLimitSnapshot::from).unwrap_or(RateLimitSnapshot {
			remaining: None,
			limit: None,
			reset_at: None,
		});

		tracing::info!(user_id = %ctx.user_id(), thread_id = %turn.thread.thread_id, "No relevant content for tutor turn.");

		sink.send(TutorEvent::ResponseEnd {
			message_id: assistant.item_id,
			rate_limit: snapshot,
			sources: Vec::new(),
			degraded: turn.retrieval.degraded,
			outcome: "no_content",
			content: None,
		})
		.await
	}

	async fn log_guardrail(
		&self,
		ctx: &RequestContext,
		thread_id: Uuid,
		kind: GuardrailKind,
		detail: Value,
	) -> Result<()> {
		let event = GuardrailEvent {
			event_id: Uuid::new_v4(),
			user_id: ctx.user_id().to_string(),
			thread_id: Some(thread_id),
			kind: kind.as_str().to_string(),
			detail,
			created_at: OffsetDateTime::now_utc(),
		};

		self.stores.audit.record_guardrail(&event).await?;

		tracing::info!(
			user_id = %ctx.user_id(),
			thread_id = %thread_id,
			kind = kind.as_str(),
			"Guardrail triggered."
		);

		Ok(())
	}
}

fn new_thread_for(page: &PageContext) -> NewThread {
	NewThread {
		course_id: page.course_id.clone(),
		stage_id: page.stage_id,
		title: None,
		metadata: page_metadata(page),
	}
}

fn page_metadata(page: &PageContext) -> Map<String, Value> {
	let mut metadata = Map::new();

	if let Some(path) = page.page_path.as_deref() {
		metadata.insert("page_path".to_string(), Value::from(path));
	}
	if let Some(stage_id) = page.stage_id {
		metadata.insert("stage_id".to_string(), Value::from(stage_id));
	}
	if let Some(selected) = page.selected_text() {
		metadata.insert("selected_text".to_string(), Value::from(selected));
	}

	metadata
}

fn build_prompt(context: &str, history: &[ChatMessage], message: &str) -> Vec<ChatMessage> {
	let mut messages = Vec::with_capacity(history.len() + 3);

	messages.push(ChatMessage::system(guardrail::TUTOR_SYSTEM_PROMPT));

	if !context.is_empty() {
		messages.push(ChatMessage::system(format!("Course passages:\n\n{context}")));
	}

	messages.extend(history.iter().cloned());
	messages.push(ChatMessage::user(message));

	messages
}

fn sources(retrieval: &Retrieval) -> Vec<Source> {
	retrieval
		.results
		.iter()
		.map(|result| Source {
			content_id: result.chunk.content_id,
			chunk_id: result.chunk.chunk_id,
			stage_id: result.chunk.stage_id,
			stage_name: result.chunk.stage_name.clone(),
			title: result.chunk.title.clone(),
			score: result.score,
		})
		.collect()
}
