use std::sync::{
	Arc, Mutex,
	atomic::{AtomicUsize, Ordering},
};

use futures::{StreamExt, stream};
use serde_json::Map;
use tokio::sync::mpsc;
use uuid::Uuid;

use intelli_chunking::{ContentSource, TokenCodec};
use intelli_config::{Config, EmbeddingProviderConfig, LlmProviderConfig, ProviderConfig};
use intelli_providers::{
	chat::{ChatMessage, ChatStream},
	rerank::RerankHit,
};
use intelli_service::{
	BoxFuture, ChatProvider, EmbeddingProvider, Identity, ProviderResult, Providers,
	RerankProvider, Stores, TutorEvent, TutorService, VectorIndex,
	memory::{MemoryStore, MemoryVectorIndex},
};

const CONFIG: &str = include_str!("../fixtures/service.toml");
const TOPICS: [&[&str]; 3] = [
	&["pid", "controller", "gain", "derivative", "integral", "overshoot"],
	&["sensor", "encoder", "lidar", "imu"],
	&["motor", "servo", "torque", "pwm"],
];

/// One dimension per topic plus a small constant so unrelated text is never a zero vector.
pub struct KeywordEmbedding {
	pub calls: AtomicUsize,
}
impl KeywordEmbedding {
	pub fn count(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}
impl EmbeddingProvider for KeywordEmbedding {
	fn embed<'a>(
		&'a self,
		_cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, ProviderResult<Vec<Vec<f32>>>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		let vectors = texts.iter().map(|text| keyword_vector(text)).collect();

		Box::pin(async move { Ok(vectors) })
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RerankMode {
	/// Keeps the vector order and assigns descending scores from 0.9.
	Keep,
	Fail,
}

pub struct ScriptedRerank {
	pub mode: RerankMode,
	pub calls: AtomicUsize,
}
impl ScriptedRerank {
	pub fn count(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}
impl RerankProvider for ScriptedRerank {
	fn rerank<'a>(
		&'a self,
		_cfg: &'a ProviderConfig,
		_query: &'a str,
		docs: &'a [String],
		top_n: usize,
	) -> BoxFuture<'a, ProviderResult<Vec<RerankHit>>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		let mode = self.mode;
		let hits: Vec<RerankHit> = (0..docs.len().min(top_n))
			.map(|index| RerankHit { index, score: 0.9 - index as f32 * 0.1 })
			.collect();

		Box::pin(async move {
			match mode {
				RerankMode::Keep => Ok(hits),
				RerankMode::Fail => Err(intelli_providers::Error::InvalidResponse {
					message: "Rerank service returned 503.".to_string(),
				}),
			}
		})
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatScript {
	Reply(Vec<String>),
	/// Sends the deltas, then never finishes.
	Hang(Vec<String>),
	Fail,
}

pub struct ScriptedChat {
	pub script: Mutex<ChatScript>,
	pub calls: AtomicUsize,
	pub last_messages: Mutex<Vec<ChatMessage>>,
}
impl ScriptedChat {
	pub fn count(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}

	pub fn set_script(&self, script: ChatScript) {
		*self.script.lock().expect("Script lock poisoned.") = script;
	}

	pub fn last_messages(&self) -> Vec<ChatMessage> {
		self.last_messages.lock().expect("Messages lock poisoned.").clone()
	}
}
impl ChatProvider for ScriptedChat {
	fn stream_chat<'a>(
		&'a self,
		_cfg: &'a LlmProviderConfig,
		messages: &'a [ChatMessage],
	) -> BoxFuture<'a, ProviderResult<ChatStream>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		*self.last_messages.lock().expect("Messages lock poisoned.") = messages.to_vec();

		let script = self.script.lock().expect("Script lock poisoned.").clone();

		Box::pin(async move {
			let stream: ChatStream = match script {
				ChatScript::Reply(deltas) => stream::iter(deltas.into_iter().map(Ok)).boxed(),
				ChatScript::Hang(deltas) =>
					stream::iter(deltas.into_iter().map(Ok)).chain(stream::pending()).boxed(),
				ChatScript::Fail =>
					return Err(intelli_providers::Error::Status {
						provider_id: "test".to_string(),
						status: 502,
						body: "upstream exploded with secret detail".to_string(),
					}),
			};

			Ok(stream)
		})
	}
}

/// Whitespace tokenizer with a vocabulary that grows as it sees words.
#[derive(Default)]
pub struct WordCodec {
	vocab: Mutex<Vec<String>>,
}
impl TokenCodec for WordCodec {
	fn encode(&self, text: &str) -> intelli_chunking::Result<Vec<u32>> {
		let mut vocab = self.vocab.lock().expect("Vocab lock poisoned.");
		let ids = text
			.split_whitespace()
			.map(|word| match vocab.iter().position(|known| known == word) {
				Some(id) => id as u32,
				None => {
					vocab.push(word.to_string());

					(vocab.len() - 1) as u32
				},
			})
			.collect();

		Ok(ids)
	}

	fn decode(&self, ids: &[u32]) -> intelli_chunking::Result<String> {
		let vocab = self.vocab.lock().expect("Vocab lock poisoned.");
		let words: Vec<&str> =
			ids.iter().filter_map(|id| vocab.get(*id as usize)).map(String::as_str).collect();

		Ok(words.join(" "))
	}
}

pub struct Harness {
	pub service: Arc<TutorService>,
	pub store: Arc<MemoryStore>,
	pub index: Arc<MemoryVectorIndex>,
	pub embedding: Arc<KeywordEmbedding>,
	pub rerank: Arc<ScriptedRerank>,
	pub chat: Arc<ScriptedChat>,
}

pub fn config() -> Config {
	toml::from_str(CONFIG).expect("Fixture config should parse.")
}

pub fn harness(reply: &[&str]) -> Harness {
	harness_with(config(), reply, RerankMode::Keep)
}

pub fn harness_with(cfg: Config, reply: &[&str], rerank_mode: RerankMode) -> Harness {
	build_harness(cfg, reply, rerank_mode, |index| index as Arc<dyn VectorIndex>)
}

/// Lets a test put its own vector index in front of the in-memory one.
pub fn harness_with_vectors(
	wrap: impl FnOnce(Arc<MemoryVectorIndex>) -> Arc<dyn VectorIndex>,
) -> Harness {
	build_harness(config(), &[], RerankMode::Keep, wrap)
}

fn build_harness(
	cfg: Config,
	reply: &[&str],
	rerank_mode: RerankMode,
	wrap: impl FnOnce(Arc<MemoryVectorIndex>) -> Arc<dyn VectorIndex>,
) -> Harness {
	let store = Arc::new(MemoryStore::new());
	let index = Arc::new(MemoryVectorIndex::new());
	let embedding = Arc::new(KeywordEmbedding { calls: AtomicUsize::new(0) });
	let rerank = Arc::new(ScriptedRerank { mode: rerank_mode, calls: AtomicUsize::new(0) });
	let chat = Arc::new(ScriptedChat {
		script: Mutex::new(ChatScript::Reply(reply.iter().map(|s| s.to_string()).collect())),
		calls: AtomicUsize::new(0),
		last_messages: Mutex::new(Vec::new()),
	});
	let providers = Providers::new(embedding.clone(), rerank.clone(), chat.clone());
	let service = TutorService::with_providers(
		cfg,
		Stores { vectors: wrap(index.clone()), ..Stores::in_memory(store.clone(), index.clone()) },
		Arc::new(WordCodec::default()),
		providers,
	);

	Harness { service: Arc::new(service), store, index, embedding, rerank, chat }
}

pub fn learner(user_id: &str, current_stage: i32) -> Identity {
	Identity {
		user_id: user_id.to_string(),
		email: Some(format!("{user_id}@example.edu")),
		role: "student".to_string(),
		current_stage,
	}
}

pub fn source(content_id: u128, stage_id: i32, title: &str, text: &str) -> ContentSource {
	ContentSource {
		content_id: Uuid::from_u128(content_id),
		stage_id,
		stage_name: format!("Stage {stage_id}"),
		title: title.to_string(),
		text: text.to_string(),
		metadata: Map::new(),
	}
}

pub async fn seed_curriculum(h: &Harness) {
	let docs = [
		source(
			1,
			1,
			"PID basics",
			"A PID controller adds proportional integral and derivative gain terms. The derivative term reacts to the rate of change and damps overshoot.",
		),
		source(2, 2, "Wheel encoders", "An encoder sensor counts wheel ticks so the robot can estimate distance."),
		source(
			4,
			4,
			"Advanced PID",
			"Cascaded PID controller loops tune an inner gain before the outer derivative gain.",
		),
	];

	for doc in &docs {
		h.service.ingest(doc, false).await.expect("Seeding should succeed.");
	}
}

pub async fn collect(mut rx: mpsc::Receiver<TutorEvent>) -> Vec<TutorEvent> {
	let mut events = Vec::new();

	while let Some(event) = rx.recv().await {
		events.push(event);
	}

	events
}

pub fn names(events: &[TutorEvent]) -> Vec<&'static str> {
	events.iter().map(TutorEvent::name).collect()
}

/// Exactly one terminal event, and it is the last one.
pub fn assert_single_terminal(events: &[TutorEvent]) {
	let terminal = events.iter().filter(|event| event.is_terminal()).count();

	assert_eq!(terminal, 1, "Expected one terminal event, got {:?}.", names(events));
	assert!(events.last().is_some_and(TutorEvent::is_terminal));
}

fn keyword_vector(text: &str) -> Vec<f32> {
	let lowered = text.to_lowercase();
	let words: Vec<&str> = lowered
		.split(|ch: char| !ch.is_alphanumeric())
		.filter(|word| !word.is_empty())
		.collect();
	let mut vector: Vec<f32> = TOPICS
		.iter()
		.map(|topic| words.iter().filter(|word| topic.contains(word)).count() as f32)
		.collect();

	vector.push(0.05);

	vector
}
