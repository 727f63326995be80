use crate::error::WorkerLoopError;
use crate::job::Priority;
use crate::observability::PipelineMetrics;
use crate::pipeline::{JobOutcome, PipelineExecutor};
use crate::semaphore::DistributedSemaphore;
use crate::store::StateStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A single worker loop (C10, spec §4.9): acquire a global slot, pull the
/// highest-priority available job, run the pipeline, then release the slot
/// regardless of outcome.
pub struct WorkerLoop {
	id: usize,
	store: Arc<dyn StateStore>,
	global_semaphore: DistributedSemaphore,
	executor: Arc<PipelineExecutor>,
	metrics: Arc<PipelineMetrics>,
}

const CATASTROPHIC_FAILURE_BACKOFF: std::time::Duration = std::time::Duration::from_secs(5);

impl WorkerLoop {
	#[must_use]
	pub fn new(id: usize, store: Arc<dyn StateStore>, global_semaphore: DistributedSemaphore, executor: Arc<PipelineExecutor>, metrics: Arc<PipelineMetrics>) -> Self {
		Self {
			id,
			store,
			global_semaphore,
			executor,
			metrics,
		}
	}

	/// Runs until `shutdown` is cancelled. A job that's already been popped
	/// off a queue is always run to completion before the loop checks for
	/// shutdown again — there is no mid-job cancellation.
	pub async fn run(&self, shutdown: CancellationToken) {
		loop {
			if shutdown.is_cancelled() {
				info!(worker_id = self.id, "worker loop shutting down");
				return;
			}

			if let Err(error) = self.tick(&shutdown).await {
				error!(worker_id = self.id, %error, "coordination store unavailable, backing off");
				tokio::select! {
					() = tokio::time::sleep(CATASTROPHIC_FAILURE_BACKOFF) => {}
					() = shutdown.cancelled() => return,
				}
			}
		}
	}

	async fn tick(&self, shutdown: &CancellationToken) -> Result<(), WorkerLoopError> {
		let global_permit = self.global_semaphore.acquire().await?;

		let (queue, job_id) = tokio::select! {
			popped = self.store.list_blocking_pop_right(&[Priority::High.queue_key(), Priority::Low.queue_key()]) => popped.map_err(WorkerLoopError::from)?,
			() = shutdown.cancelled() => return Ok(()),
		};

		info!(worker_id = self.id, queue, job_id = %job_id, "dequeued job");
		self.store.set_add("jobs:processing", &job_id).await.map_err(WorkerLoopError::from)?;
		self.metrics.record_dequeue();

		let outcome = self.executor.run(&job_id).await;

		// The global slot is held only for the duration of the pipeline run
		// itself, never for the retry backoff `PipelineExecutor::run` may
		// have scheduled as a detached task — otherwise a handful of
		// concurrently-retrying jobs could pin every worker asleep for up to
		// 8s, starving the queue (spec §4.7, §9).
		drop(global_permit);

		self.store.set_remove("jobs:processing", &job_id).await.map_err(WorkerLoopError::from)?;

		match outcome {
			Ok(JobOutcome::Completed) => {
				self.metrics.record_completed();
				info!(worker_id = self.id, job_id = %job_id, "job completed");
			}
			Ok(JobOutcome::Retried) => {
				self.metrics.record_retried();
				info!(worker_id = self.id, job_id = %job_id, "job requeued for retry");
			}
			Ok(JobOutcome::DeadLettered) => {
				self.metrics.record_dead_lettered();
				info!(worker_id = self.id, job_id = %job_id, "job dead-lettered");
			}
			Err(error) => return Err(error),
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::audio::FakeAudioExtractor;
	use crate::blob::{BlobError, BlobStore, InMemoryBlobStore};
	use crate::error::TranscriptionError;
	use crate::retry::RetryController;
	use crate::store::InMemoryStateStore;
	use crate::transcription::{MockTranscriber, Segment, TranscriptionClient};
	use async_trait::async_trait;
	use std::collections::HashMap;
	use std::path::Path;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	/// Waits out the background task `SemaphorePermit::drop` (and, after a
	/// retry decision, the detached backoff-then-requeue task) spawns, so a
	/// subsequent `tick` in the same test doesn't race it.
	async fn let_background_tasks_settle() {
		tokio::task::yield_now().await;
		tokio::time::sleep(Duration::from_millis(20)).await;
	}

	/// Fails its first `fail_count` calls with a terminal provider error, then
	/// returns the configured segments — drives the S2 retry-then-succeed
	/// scenario without a live transcription backend.
	struct FlakyTranscriber {
		remaining_failures: AtomicUsize,
		segments: Vec<Segment>,
	}

	impl FlakyTranscriber {
		fn new(fail_count: usize, segments: Vec<Segment>) -> Self {
			Self {
				remaining_failures: AtomicUsize::new(fail_count),
				segments,
			}
		}
	}

	#[async_trait]
	impl TranscriptionClient for FlakyTranscriber {
		async fn transcribe(&self, _audio_key: &str, _audio_duration_ms: u64, _poll_interval: Duration) -> Result<Vec<Segment>, TranscriptionError> {
			let previous = self.remaining_failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| if count > 0 { Some(count - 1) } else { Some(0) });
			if previous.unwrap_or(0) > 0 {
				return Err(TranscriptionError::ProviderTerminalError("flaky provider".to_string()));
			}
			Ok(self.segments.clone())
		}
	}

	/// `BlobStore` that fails every `put` whose key has the given suffix,
	/// forwarding everything else to an in-memory backing store. Used to force
	/// a failure at the very last pipeline step (S6).
	struct FailingSuffixBlobStore {
		inner: InMemoryBlobStore,
		failing_suffix: &'static str,
	}

	impl FailingSuffixBlobStore {
		fn new(failing_suffix: &'static str) -> Self {
			Self {
				inner: InMemoryBlobStore::new(),
				failing_suffix,
			}
		}
	}

	#[async_trait]
	impl BlobStore for FailingSuffixBlobStore {
		async fn get(&self, key: &str, local_path: &Path) -> Result<(), BlobError> {
			self.inner.get(key, local_path).await
		}

		async fn put(&self, key: &str, body: bytes::Bytes, content_type: &str) -> Result<(), BlobError> {
			if key.ends_with(self.failing_suffix) {
				return Err(BlobError::Provider(format!("simulated upload failure for {key}")));
			}
			self.inner.put(key, body, content_type).await
		}

		async fn presign_get(&self, key: &str, expiry: std::time::Duration) -> Result<String, BlobError> {
			self.inner.presign_get(key, expiry).await
		}
	}

	async fn seed_job(store: &Arc<dyn StateStore>, id: &str, video_url: &str) {
		store
			.hash_set_fields(
				&format!("job:{id}"),
				&HashMap::from([
					("videoUrl".to_string(), video_url.to_string()),
					("createdAt".to_string(), "2026-01-01T00:00:00Z".to_string()),
					("priority".to_string(), "high".to_string()),
					("status".to_string(), "queued".to_string()),
				]),
			)
			.await
			.unwrap();
	}

	fn make_worker(store: Arc<dyn StateStore>, segments: Vec<crate::transcription::Segment>) -> WorkerLoop {
		let blob: Arc<dyn crate::blob::BlobStore> = Arc::new(InMemoryBlobStore::new());
		let global_semaphore = DistributedSemaphore::new(Arc::clone(&store), "semaphore:global");
		let ai_semaphore = DistributedSemaphore::new(Arc::clone(&store), "semaphore:ai");
		let executor = Arc::new(PipelineExecutor::new(
			Arc::clone(&store),
			blob,
			Arc::new(FakeAudioExtractor),
			Arc::new(MockTranscriber::new(segments, Duration::from_millis(1))),
			ai_semaphore,
			RetryController::new(3, 1),
			std::env::temp_dir().join(format!("subtitle-pipeline-worker-test-{}", uuid::Uuid::new_v4())),
			Duration::from_millis(1),
		));
		WorkerLoop::new(0, store, global_semaphore, executor, Arc::new(PipelineMetrics::new_for_test()))
	}

	#[tokio::test]
	async fn failed_job_is_requeued_on_low_priority_with_incremented_retry_count() {
		let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
		// seed job whose video is missing from the blob store, so the download step fails
		seed_job(&store, "j1", "missing.mp4").await;
		store.list_push_right(Priority::High.queue_key(), "j1").await.unwrap();

		let worker = make_worker(Arc::clone(&store), vec![]);
		worker.global_semaphore.init(1).await.unwrap();

		let shutdown = CancellationToken::new();
		worker.tick(&shutdown).await.unwrap();
		let_background_tasks_settle().await;

		let fields = store.hash_get_all("job:j1").await.unwrap();
		assert_eq!(fields.get("retryCount").map(String::as_str), Some("1"));
		assert_eq!(fields.get("status").map(String::as_str), Some("queued:retry"));
		assert_eq!(store.list_len(Priority::Low.queue_key()).await.unwrap(), 1);
	}

	#[tokio::test]
	async fn job_exceeding_max_retries_is_dead_lettered() {
		let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
		seed_job(&store, "j2", "missing.mp4").await;
		store.hash_set_fields("job:j2", &HashMap::from([("retryCount".to_string(), "3".to_string())])).await.unwrap();
		store.list_push_right(Priority::High.queue_key(), "j2").await.unwrap();

		let worker = make_worker(Arc::clone(&store), vec![]);
		worker.global_semaphore.init(1).await.unwrap();

		let shutdown = CancellationToken::new();
		worker.tick(&shutdown).await.unwrap();

		let fields = store.hash_get_all("job:j2").await.unwrap();
		assert_eq!(fields.get("status").map(String::as_str), Some("failed:dlq"));
		assert_eq!(store.list_len("queue:dlq").await.unwrap(), 1);
	}

	/// S2: transcription fails twice then succeeds. The job should complete
	/// with `retryCount == 2`, having passed through `queue:low` between
	/// attempts. Backoff constants are scaled down for test speed; the shape
	/// (doubling per attempt) is what's under test, not the wall-clock value.
	#[tokio::test]
	async fn job_succeeds_after_two_transient_failures_with_retry_count_two() {
		let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
		let blob: Arc<dyn BlobStore> = Arc::new(InMemoryBlobStore::new());
		blob.put("clip.mp4", b"fake-video-bytes".to_vec().into(), "video/mp4").await.unwrap();
		seed_job(&store, "j3", "clip.mp4").await;
		store.list_push_right(Priority::High.queue_key(), "j3").await.unwrap();

		let transcriber: Arc<dyn TranscriptionClient> = Arc::new(FlakyTranscriber::new(
			2,
			vec![Segment {
				text: "recovered".to_string(),
				start_ms: 0,
				end_ms: 500,
			}],
		));
		let global_semaphore = DistributedSemaphore::new(Arc::clone(&store), "semaphore:global");
		global_semaphore.init(1).await.unwrap();
		let ai_semaphore = DistributedSemaphore::new(Arc::clone(&store), "semaphore:ai");
		ai_semaphore.init(1).await.unwrap();
		let executor = Arc::new(PipelineExecutor::new(
			Arc::clone(&store),
			Arc::clone(&blob),
			Arc::new(FakeAudioExtractor),
			transcriber,
			ai_semaphore,
			RetryController::new(3, 2),
			std::env::temp_dir().join(format!("subtitle-pipeline-worker-retry-test-{}", uuid::Uuid::new_v4())),
			Duration::from_millis(1),
		));
		let worker = WorkerLoop::new(0, Arc::clone(&store), global_semaphore, executor, Arc::new(PipelineMetrics::new_for_test()));

		let shutdown = CancellationToken::new();
		worker.tick(&shutdown).await.unwrap(); // attempt 1: fails, backoff 2ms scheduled, requeue still pending
		let_background_tasks_settle().await;
		worker.tick(&shutdown).await.unwrap(); // attempt 2: fails, backoff 4ms scheduled, requeue still pending
		let_background_tasks_settle().await;
		worker.tick(&shutdown).await.unwrap(); // attempt 3: succeeds

		let fields = store.hash_get_all("job:j3").await.unwrap();
		assert_eq!(fields.get("status").map(String::as_str), Some("completed"));
		assert_eq!(fields.get("retryCount").map(String::as_str), Some("2"));
		assert_eq!(fields.get("subtitleUrl").map(String::as_str), Some("clip.srt"));
	}

	/// S4: with one worker and one global slot, a job queued on `queue:high`
	/// is dequeued ahead of one already sitting on `queue:low`.
	#[tokio::test]
	async fn high_priority_job_is_dequeued_before_an_older_low_priority_job() {
		let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
		let blob: Arc<dyn BlobStore> = Arc::new(InMemoryBlobStore::new());
		blob.put("a.mp4", b"video-a".to_vec().into(), "video/mp4").await.unwrap();
		blob.put("b.mp4", b"video-b".to_vec().into(), "video/mp4").await.unwrap();
		seed_job(&store, "job-a", "a.mp4").await;
		seed_job(&store, "job-b", "b.mp4").await;
		store.list_push_right(Priority::Low.queue_key(), "job-a").await.unwrap();
		store.list_push_right(Priority::High.queue_key(), "job-b").await.unwrap();

		let global_semaphore = DistributedSemaphore::new(Arc::clone(&store), "semaphore:global");
		global_semaphore.init(1).await.unwrap();
		let ai_semaphore = DistributedSemaphore::new(Arc::clone(&store), "semaphore:ai");
		ai_semaphore.init(1).await.unwrap();
		let executor = Arc::new(PipelineExecutor::new(
			Arc::clone(&store),
			blob,
			Arc::new(FakeAudioExtractor),
			Arc::new(MockTranscriber::new(
				vec![Segment {
					text: "hi".to_string(),
					start_ms: 0,
					end_ms: 100,
				}],
				Duration::from_millis(1),
			)),
			ai_semaphore,
			RetryController::new(3, 1),
			std::env::temp_dir().join(format!("subtitle-pipeline-priority-test-{}", uuid::Uuid::new_v4())),
			Duration::from_millis(1),
		));
		let worker = WorkerLoop::new(0, Arc::clone(&store), global_semaphore, executor, Arc::new(PipelineMetrics::new_for_test()));

		let shutdown = CancellationToken::new();
		worker.tick(&shutdown).await.unwrap();

		let job_b_fields = store.hash_get_all("job:job-b").await.unwrap();
		let job_a_fields = store.hash_get_all("job:job-a").await.unwrap();
		assert_eq!(job_b_fields.get("status").map(String::as_str), Some("completed"), "queue:high job should run first");
		assert_eq!(job_a_fields.get("status").map(String::as_str), Some("queued"), "queue:low job should remain untouched");
		assert_eq!(store.list_len(Priority::Low.queue_key()).await.unwrap(), 1);
	}

	/// S5: with `MAX_AI_CONCURRENCY=1` and two workers racing, at no point are
	/// two `transcribe` calls in flight at once.
	#[tokio::test(flavor = "multi_thread")]
	async fn ai_semaphore_bounds_concurrent_transcription_across_two_workers() {
		let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
		let blob: Arc<dyn BlobStore> = Arc::new(InMemoryBlobStore::new());
		blob.put("c.mp4", b"video-c".to_vec().into(), "video/mp4").await.unwrap();
		blob.put("d.mp4", b"video-d".to_vec().into(), "video/mp4").await.unwrap();
		seed_job(&store, "job-c", "c.mp4").await;
		seed_job(&store, "job-d", "d.mp4").await;
		store.list_push_right(Priority::High.queue_key(), "job-c").await.unwrap();
		store.list_push_right(Priority::High.queue_key(), "job-d").await.unwrap();

		let global_semaphore = DistributedSemaphore::new(Arc::clone(&store), "semaphore:global");
		global_semaphore.init(2).await.unwrap();
		let ai_semaphore = DistributedSemaphore::new(Arc::clone(&store), "semaphore:ai");
		ai_semaphore.init(1).await.unwrap();

		let transcriber = Arc::new(MockTranscriber::new(
			vec![Segment {
				text: "x".to_string(),
				start_ms: 0,
				end_ms: 10,
			}],
			Duration::from_millis(30),
		));

		let make_executor = |ai: DistributedSemaphore| {
			Arc::new(PipelineExecutor::new(
				Arc::clone(&store),
				Arc::clone(&blob),
				Arc::new(FakeAudioExtractor),
				Arc::clone(&transcriber) as Arc<dyn TranscriptionClient>,
				ai,
				RetryController::new(3, 1),
				std::env::temp_dir().join(format!("subtitle-pipeline-ai-semaphore-test-{}", uuid::Uuid::new_v4())),
				Duration::from_millis(1),
			))
		};

		let worker_1 = WorkerLoop::new(0, Arc::clone(&store), global_semaphore.clone(), make_executor(ai_semaphore.clone()), Arc::new(PipelineMetrics::new_for_test()));
		let worker_2 = WorkerLoop::new(1, Arc::clone(&store), global_semaphore, make_executor(ai_semaphore), Arc::new(PipelineMetrics::new_for_test()));

		let shutdown = CancellationToken::new();
		let (first, second) = tokio::join!(worker_1.tick(&shutdown), worker_2.tick(&shutdown));
		first.unwrap();
		second.unwrap();

		assert_eq!(transcriber.max_observed_concurrency(), 1);
	}

	/// S6: a failure in the final SRT upload must still clear `jobs:processing`
	/// and remove the scratch directory, with the job routed through the
	/// normal retry decision rather than left stuck mid-pipeline.
	#[tokio::test]
	async fn failure_in_final_upload_cleans_up_processing_set_and_scratch_dir() {
		let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
		let blob: Arc<dyn BlobStore> = Arc::new(FailingSuffixBlobStore::new(".srt"));
		blob.put("clip.mp4", b"fake-video-bytes".to_vec().into(), "video/mp4").await.unwrap();
		seed_job(&store, "job-e", "clip.mp4").await;
		store.list_push_right(Priority::High.queue_key(), "job-e").await.unwrap();

		let global_semaphore = DistributedSemaphore::new(Arc::clone(&store), "semaphore:global");
		global_semaphore.init(1).await.unwrap();
		let ai_semaphore = DistributedSemaphore::new(Arc::clone(&store), "semaphore:ai");
		ai_semaphore.init(1).await.unwrap();

		let tmp_root = std::env::temp_dir().join(format!("subtitle-pipeline-cleanup-test-{}", uuid::Uuid::new_v4()));
		let executor = Arc::new(PipelineExecutor::new(
			Arc::clone(&store),
			blob,
			Arc::new(FakeAudioExtractor),
			Arc::new(MockTranscriber::new(
				vec![Segment {
					text: "hi".to_string(),
					start_ms: 0,
					end_ms: 100,
				}],
				Duration::from_millis(1),
			)),
			ai_semaphore,
			RetryController::new(3, 1),
			tmp_root.clone(),
			Duration::from_millis(1),
		));
		let worker = WorkerLoop::new(0, Arc::clone(&store), global_semaphore, executor, Arc::new(PipelineMetrics::new_for_test()));

		let shutdown = CancellationToken::new();
		worker.tick(&shutdown).await.unwrap();

		assert_eq!(store.set_card("jobs:processing").await.unwrap(), 0);
		assert!(tokio::fs::metadata(tmp_root.join("job-e")).await.is_err(), "scratch dir should be removed");
		let fields = store.hash_get_all("job:job-e").await.unwrap();
		assert_eq!(fields.get("status").map(String::as_str), Some("queued:retry"));
	}

	/// The review fix under test: a worker must not hold its global slot for
	/// the retry backoff. With capacity 1 and a job whose every attempt fails
	/// instantly, a second job on the same queue should still get a turn well
	/// before the first job's multi-second backoff would have elapsed.
	#[tokio::test]
	async fn global_permit_is_released_before_the_retry_backoff_elapses() {
		let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
		seed_job(&store, "job-f", "missing.mp4").await;
		seed_job(&store, "job-g", "missing.mp4").await;
		store.list_push_right(Priority::High.queue_key(), "job-f").await.unwrap();
		store.list_push_right(Priority::High.queue_key(), "job-g").await.unwrap();

		let global_semaphore = DistributedSemaphore::new(Arc::clone(&store), "semaphore:global");
		global_semaphore.init(1).await.unwrap();
		let ai_semaphore = DistributedSemaphore::new(Arc::clone(&store), "semaphore:ai");
		ai_semaphore.init(1).await.unwrap();

		let executor = Arc::new(PipelineExecutor::new(
			Arc::clone(&store),
			Arc::new(InMemoryBlobStore::new()),
			Arc::new(FakeAudioExtractor),
			Arc::new(MockTranscriber::new(vec![], Duration::from_millis(1))),
			ai_semaphore,
			RetryController::new(3, 60_000), // a backoff far longer than this test's timeout
			std::env::temp_dir().join(format!("subtitle-pipeline-permit-release-test-{}", uuid::Uuid::new_v4())),
			Duration::from_millis(1),
		));
		let worker = WorkerLoop::new(0, Arc::clone(&store), global_semaphore, executor, Arc::new(PipelineMetrics::new_for_test()));

		let shutdown = CancellationToken::new();
		tokio::time::timeout(Duration::from_secs(5), worker.tick(&shutdown)).await.expect("first tick must not block on the retry backoff").unwrap();
		tokio::time::timeout(Duration::from_secs(5), worker.tick(&shutdown)).await.expect("second tick must not be starved by the first job's retry backoff").unwrap();

		assert_eq!(store.list_len(Priority::Low.queue_key()).await.unwrap(), 0, "neither job's requeue should have fired yet");
	}
}
