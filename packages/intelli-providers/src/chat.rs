use std::{collections::VecDeque, time::Duration};

use futures::{StreamExt, stream::BoxStream};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Text deltas of one streamed completion. Dropping the stream closes the upstream connection.
pub type ChatStream = BoxStream<'static, Result<String>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
	System,
	User,
	Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChatMessage {
	pub role: ChatRole,
	pub content: String,
}
impl ChatMessage {
	pub fn system(content: impl Into<String>) -> Self {
		Self { role: ChatRole::System, content: content.into() }
	}

	pub fn user(content: impl Into<String>) -> Self {
		Self { role: ChatRole::User, content: content.into() }
	}

	pub fn assistant(content: impl Into<String>) -> Self {
		Self { role: ChatRole::Assistant, content: content.into() }
	}
}

#[derive(Debug, PartialEq)]
enum SseEvent {
	Delta(String),
	Done,
}

/// Incremental decoder for `text/event-stream` bodies of chat completion APIs.
#[derive(Debug, Default)]
struct SseDecoder {
	buffer: Vec<u8>,
}
impl SseDecoder {
	fn push(&mut self, bytes: &[u8]) -> Result<Vec<SseEvent>> {
		self.buffer.extend_from_slice(bytes);

		let mut events = Vec::new();

		while let Some(line_end) = self.buffer.iter().position(|byte| *byte == b'\n') {
			let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
			let line = String::from_utf8_lossy(&line);

			if let Some(event) = decode_line(line.trim())? {
				let done = event == SseEvent::Done;

				events.push(event);

				if done {
					self.buffer.clear();

					break;
				}
			}
		}

		Ok(events)
	}

	fn finish(&mut self) -> Result<Vec<SseEvent>> {
		let rest = std::mem::take(&mut self.buffer);
		let line = String::from_utf8_lossy(&rest);

		Ok(decode_line(line.trim())?.into_iter().collect())
	}
}

fn decode_line(line: &str) -> Result<Option<SseEvent>> {
	let Some(data) = line.strip_prefix("data:") else {
		return Ok(None);
	};
	let data = data.trim_start();

	if data == "[DONE]" {
		return Ok(Some(SseEvent::Done));
	}

	let json: Value = match serde_json::from_str(data) {
		Ok(json) => json,
		Err(err) => {
			tracing::warn!(error = %err, "Skipping malformed chat stream payload.");

			return Ok(None);
		},
	};

	if let Some(error) = json.get("error") {
		let message = error
			.get("message")
			.and_then(|v| v.as_str())
			.map(str::to_string)
			.unwrap_or_else(|| error.to_string());

		return Err(Error::InvalidResponse { message: format!("Chat stream reported an error: {message}") });
	}

	let delta = json
		.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|choices| choices.first())
		.and_then(|choice| choice.get("delta"))
		.and_then(|delta| delta.get("content"))
		.and_then(|content| content.as_str())
		.filter(|content| !content.is_empty());

	Ok(delta.map(|content| SseEvent::Delta(content.to_string())))
}

struct StreamState {
	bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
	decoder: SseDecoder,
	pending: VecDeque<String>,
	provider_id: String,
	token_timeout_ms: u64,
	finished: bool,
}
impl StreamState {
	fn absorb(&mut self, events: Vec<SseEvent>) {
		for event in events {
			match event {
				SseEvent::Delta(text) => self.pending.push_back(text),
				SseEvent::Done => self.finished = true,
			}
		}
	}
}

/// Starts a streamed chat completion. `timeout_ms` bounds the wait for response headers and
/// `token_timeout_ms` bounds the silence between two deltas.
pub async fn stream_chat(
	cfg: &intelli_config::LlmProviderConfig,
	messages: &[ChatMessage],
) -> Result<ChatStream> {
	let client = reqwest::Client::builder()
		.connect_timeout(Duration::from_millis(cfg.timeout_ms))
		.build()?;
	let body = serde_json::json!({
		"model": cfg.model,
		"temperature": cfg.temperature,
		"max_tokens": cfg.max_tokens,
		"messages": messages,
		"stream": true,
	});
	let request = client
		.post(crate::endpoint(&cfg.api_base, &cfg.path))
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send();
	let res = tokio::time::timeout(Duration::from_millis(cfg.timeout_ms), request)
		.await
		.map_err(|_| Error::TokenTimeout {
			provider_id: cfg.provider_id.clone(),
			timeout_ms: cfg.timeout_ms,
		})??;
	let res = crate::check_status(&cfg.provider_id, res).await?;
	let state = StreamState {
		bytes: res.bytes_stream().map(|chunk| chunk.map(|bytes| bytes.to_vec())).boxed(),
		decoder: SseDecoder::default(),
		pending: VecDeque::new(),
		provider_id: cfg.provider_id.clone(),
		token_timeout_ms: cfg.token_timeout_ms,
		finished: false,
	};

	Ok(futures::stream::unfold(state, next_delta).boxed())
}

async fn next_delta(mut state: StreamState) -> Option<(Result<String>, StreamState)> {
	loop {
		if let Some(text) = state.pending.pop_front() {
			return Some((Ok(text), state));
		}
		if state.finished {
			return None;
		}

		let timeout = Duration::from_millis(state.token_timeout_ms);

		match tokio::time::timeout(timeout, state.bytes.next()).await {
			Err(_) => {
				state.finished = true;

				let err = Error::TokenTimeout {
					provider_id: state.provider_id.clone(),
					timeout_ms: state.token_timeout_ms,
				};

				return Some((Err(err), state));
			},
			Ok(None) => {
				state.finished = true;

				match state.decoder.finish() {
					Ok(events) => state.absorb(events),
					Err(err) => return Some((Err(err), state)),
				}
			},
			Ok(Some(Err(err))) => {
				state.finished = true;

				return Some((Err(err.into()), state));
			},
			Ok(Some(Ok(bytes))) => match state.decoder.push(&bytes) {
				Ok(events) => state.absorb(events),
				Err(err) => {
					state.finished = true;

					return Some((Err(err), state));
				},
			},
		}
	}
}
