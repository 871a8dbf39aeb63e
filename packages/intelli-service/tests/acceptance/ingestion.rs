use std::sync::{
	Arc,
	atomic::{AtomicBool, Ordering},
};

use uuid::Uuid;

use intelli_chunking::ContentChunk;
use intelli_service::{
	BoxFuture, ContentIndexStore, Error, IngestOutcome, Result, VectorIndex,
	memory::MemoryVectorIndex,
};
use intelli_storage::qdrant::ScoredChunk;

use super::suite;

const LESSON: &str = "A servo motor holds position using an internal controller. Send a PWM pulse to choose the angle and the servo applies torque until it gets there.";

#[tokio::test]
async fn unchanged_content_is_not_reembedded() {
	let h = suite::harness(&[]);
	let lesson = suite::source(10, 1, "Servos", LESSON);
	let first = h.service.ingest(&lesson, false).await.expect("Ingest failed.");
	let IngestOutcome::Indexed { chunks } = first.outcome else {
		panic!("First ingest should index.");
	};
	let calls = h.embedding.count();

	assert!(chunks > 1);
	assert_eq!(h.index.len().expect("Lock failed."), chunks as usize);

	let second = h.service.ingest(&lesson, false).await.expect("Ingest failed.");

	assert_eq!(second.outcome, IngestOutcome::Unchanged);
	assert_eq!(second.content_hash, first.content_hash);
	assert_eq!(h.embedding.count(), calls);

	let forced = h.service.ingest(&lesson, true).await.expect("Ingest failed.");

	assert_eq!(forced.outcome, IngestOutcome::Indexed { chunks });
	assert_eq!(h.index.len().expect("Lock failed."), chunks as usize);
}

#[tokio::test]
async fn embedding_calls_follow_the_batch_size() {
	let h = suite::harness(&[]);
	let report =
		h.service.ingest(&suite::source(11, 1, "Servos", LESSON), false).await.expect("Ingest failed.");
	let IngestOutcome::Indexed { chunks } = report.outcome else {
		panic!("Ingest should index.");
	};
	let batch_size = suite::config().providers.embedding.batch_size as usize;

	assert_eq!(h.embedding.count(), (chunks as usize).div_ceil(batch_size));
}

#[tokio::test]
async fn shorter_revision_leaves_no_stale_chunks() {
	let h = suite::harness(&[]);

	h.service.ingest(&suite::source(12, 1, "Servos", LESSON), false).await.expect("Ingest failed.");

	let revised = h
		.service
		.ingest(&suite::source(12, 1, "Servos", "Servos turn to the commanded angle."), false)
		.await
		.expect("Ingest failed.");

	assert_eq!(revised.outcome, IngestOutcome::Indexed { chunks: 1 });
	assert_eq!(h.index.len().expect("Lock failed."), 1);
}

#[tokio::test]
async fn removed_content_disappears_from_search() {
	let h = suite::harness(&[]);

	h.service.ingest(&suite::source(13, 1, "Servos", LESSON), false).await.expect("Ingest failed.");

	assert!(h.service.remove_content(suite::source(13, 1, "", "").content_id).await.expect("Remove failed."));
	assert!(h.index.is_empty().expect("Lock failed."));

	let retrieval =
		h.service.retrieve("servo motor torque", &[1], None, false).await.expect("Retrieve failed.");

	assert!(retrieval.results.is_empty());
	assert!(!h.service.remove_content(suite::source(13, 1, "", "").content_id).await.expect("Remove failed."));
}

/// Passes through to the in-memory index until upserts are switched off.
struct FailingUpserts {
	inner: Arc<MemoryVectorIndex>,
	fail: Arc<AtomicBool>,
}
impl VectorIndex for FailingUpserts {
	fn search<'a>(
		&'a self,
		vector: Vec<f32>,
		stage_ids: &'a [i32],
		limit: u32,
		min_score: f32,
	) -> BoxFuture<'a, Result<Vec<ScoredChunk>>> {
		self.inner.search(vector, stage_ids, limit, min_score)
	}

	fn upsert<'a>(
		&'a self,
		chunks: &'a [ContentChunk],
		vectors: &'a [Vec<f32>],
	) -> BoxFuture<'a, Result<()>> {
		if self.fail.load(Ordering::SeqCst) {
			return Box::pin(async {
				Err(Error::Storage { message: "Vector store unavailable.".to_string() })
			});
		}

		self.inner.upsert(chunks, vectors)
	}

	fn delete_content(&self, content_id: Uuid) -> BoxFuture<'_, Result<()>> {
		self.inner.delete_content(content_id)
	}
}

#[tokio::test]
async fn failed_upsert_leaves_content_to_be_reindexed() {
	let fail = Arc::new(AtomicBool::new(false));
	let switch = fail.clone();
	let h = suite::harness_with_vectors(move |inner| {
		Arc::new(FailingUpserts { inner, fail: switch }) as Arc<dyn VectorIndex>
	});
	let lesson = suite::source(13, 1, "Servos", LESSON);
	let first = h.service.ingest(&lesson, false).await.expect("Ingest failed.");
	let IngestOutcome::Indexed { chunks } = first.outcome else {
		panic!("First ingest should index.");
	};

	fail.store(true, Ordering::SeqCst);

	let err = h.service.ingest(&lesson, true).await.expect_err("Upsert failure should surface.");

	assert_eq!(err.code(), "STORAGE_ERROR");
	assert_eq!(h.index.len().expect("Lock failed."), 0);
	assert!(h.store.get(lesson.content_id).await.expect("Lookup failed.").is_none());

	fail.store(false, Ordering::SeqCst);

	let retried = h.service.ingest(&lesson, false).await.expect("Ingest failed.");

	assert_eq!(retried.outcome, IngestOutcome::Indexed { chunks });
	assert_eq!(h.index.len().expect("Lock failed."), chunks as usize);
	assert_eq!(
		h.store.get(lesson.content_id).await.expect("Lookup failed.").map(|state| state.chunk_count),
		Some(chunks as i32)
	);
}
