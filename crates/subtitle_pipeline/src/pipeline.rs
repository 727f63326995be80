use crate::audio::AudioExtractor;
use crate::blob::BlobStore;
use crate::error::{PipelineError, WorkerLoopError};
use crate::job::{self, Job, JobStatus, Priority};
use crate::job_state::JobStateWriter;
use crate::retry::{RetryController, RetryDecision};
use crate::semaphore::DistributedSemaphore;
use crate::srt;
use crate::store::StateStore;
use crate::transcription::TranscriptionClient;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Deletes a job's scratch directory on drop, best-effort. Runs even when
/// the pipeline returns early via `?`, replacing the try/finally cleanup the
/// original implementation used (spec §9 redesign flag).
struct ScratchDir(PathBuf);

impl Drop for ScratchDir {
	fn drop(&mut self) {
		if let Err(error) = std::fs::remove_dir_all(&self.0) {
			if error.kind() != std::io::ErrorKind::NotFound {
				warn!(path = %self.0.display(), %error, "failed to clean up job scratch directory");
			}
		}
	}
}

/// What became of one call to `PipelineExecutor::run`. The worker loop uses
/// this purely for logging/metrics — by the time it gets this back, the
/// job's hash and queues are already in their final state for the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
	Completed,
	Retried,
	DeadLettered,
}

/// Executes the single-job pipeline described in spec §4.8: download video,
/// extract audio, transcribe, render SRT, publish results.
///
/// Failure classification (C7, spec §4.7) lives here too, not in the worker
/// loop: spec §4.8 requires the executor's outer scope to move a failed job
/// to `queued:retry` or `failed:dlq` *before* cleanup (step 10) runs, and
/// §7 is explicit that "the worker loop never sees an in-flight exception
/// from C8 change job state — C8 owns that." `run` therefore never returns
/// a raw `PipelineError` to its caller; it only propagates `WorkerLoopError`
/// for the case where the coordination store itself is unreachable, which
/// spec attributes to the worker loop rather than the job.
///
/// Global worker-slot accounting happens one layer up in the worker loop
/// (C10); this executor only owns the nested AI-provider semaphore around the
/// transcription step, since that's the one resource the pipeline itself
/// must ration.
pub struct PipelineExecutor {
	store: Arc<dyn StateStore>,
	job_state: JobStateWriter,
	blob: Arc<dyn BlobStore>,
	extractor: Arc<dyn AudioExtractor>,
	transcriber: Arc<dyn TranscriptionClient>,
	ai_semaphore: DistributedSemaphore,
	retry: RetryController,
	tmp_root: PathBuf,
	transcription_poll_interval: Duration,
}

impl PipelineExecutor {
	#[must_use]
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		store: Arc<dyn StateStore>,
		blob: Arc<dyn BlobStore>,
		extractor: Arc<dyn AudioExtractor>,
		transcriber: Arc<dyn TranscriptionClient>,
		ai_semaphore: DistributedSemaphore,
		retry: RetryController,
		tmp_root: PathBuf,
		transcription_poll_interval: Duration,
	) -> Self {
		Self {
			job_state: JobStateWriter::new(Arc::clone(&store)),
			store,
			blob,
			extractor,
			transcriber,
			ai_semaphore,
			retry,
			tmp_root,
			transcription_poll_interval,
		}
	}

	/// Runs the full pipeline for `job_id`, mutating the job's hash as it
	/// advances through `processing:downloading_video` →
	/// `processing:extracting_audio` → `processing:transcribing_audio` →
	/// `completed`. On any pipeline-level failure, classifies and records the
	/// retry/dead-letter decision itself before returning.
	///
	/// # Errors
	/// Returns `WorkerLoopError` only when the coordination store is
	/// unreachable — a failure not attributable to this job (spec §7).
	pub async fn run(&self, job_id: &str) -> Result<JobOutcome, WorkerLoopError> {
		let scratch = ScratchDir(self.tmp_root.join(job_id));
		if let Err(error) = tokio::fs::create_dir_all(&scratch.0).await {
			return self.handle_failure(job_id, PipelineError::BlobIo(error.to_string())).await;
		}

		match self.try_run(job_id, &scratch.0).await {
			Ok(()) => Ok(JobOutcome::Completed),
			Err(error) => self.handle_failure(job_id, error).await,
		}
	}

	async fn try_run(&self, job_id: &str, scratch_dir: &Path) -> Result<(), PipelineError> {
		let key = format!("job:{job_id}");
		let fields = self.store.hash_get_all(&key).await?;
		let job = Job::from_fields(job_id, &fields).map_err(|_| PipelineError::MissingVideoUrl)?;

		self.job_state.set_status(job_id, JobStatus::DownloadingVideo).await?;
		let video_path = scratch_dir.join(job::basename(&job.video_url));
		self.blob.get(&job.video_url, &video_path).await?;

		self.job_state.set_status(job_id, JobStatus::ExtractingAudio).await?;
		let audio_key = format!("{}.mp3", job::stem(&job.video_url));
		let audio_path = scratch_dir.join(&audio_key);
		self.extractor.extract(&video_path, &audio_path).await?;
		let duration_ms = self.extractor.duration_ms(&audio_path).await?;

		let audio_bytes = tokio::fs::read(&audio_path).await.map_err(|error| PipelineError::BlobIo(error.to_string()))?;
		self.blob.put(&audio_key, audio_bytes.into(), "audio/mpeg").await?;
		self.job_state.set_audio_url(job_id, &audio_key).await?;

		self.job_state.set_status(job_id, JobStatus::TranscribingAudio).await?;
		let segments = {
			let _permit = self.ai_semaphore.acquire().await?;
			self.transcriber.transcribe(&audio_key, duration_ms, self.transcription_poll_interval).await?
		};

		if segments.is_empty() {
			return Err(PipelineError::EmptyTranscript);
		}

		let subtitle_key = format!("{}.srt", job::stem(&job.video_url));
		let document = srt::render(&segments);
		self.blob.put(&subtitle_key, document.into_bytes().into(), "application/x-subrip").await?;
		self.job_state.complete(job_id, &subtitle_key).await?;

		info!(job_id, "pipeline completed");
		Ok(())
	}

	/// Classifies a failed attempt (C7, spec §4.7) and records the outcome on
	/// the job's hash. A `Retry` decision's backoff sleep and requeue run as
	/// a detached task so this — and therefore `run` — returns immediately:
	/// the worker loop must not hold its global concurrency slot for the
	/// 2s/4s/8s backoff window (spec §4.7 calls the delay "a deferred task";
	/// §9 calls for a timer that doesn't block the worker).
	async fn handle_failure(&self, job_id: &str, error: PipelineError) -> Result<JobOutcome, WorkerLoopError> {
		let retry_count = self.job_state.increment_retry_count(job_id).await?;
		warn!(job_id, retry_count, %error, "pipeline attempt failed");

		match self.retry.decide(retry_count) {
			RetryDecision::Retry { delay } => {
				self.job_state.record_retry(job_id, &error.to_string()).await?;

				let store = Arc::clone(&self.store);
				let job_id = job_id.to_string();
				tokio::spawn(async move {
					tokio::time::sleep(delay).await;
					if let Err(error) = store.list_push_right(Priority::Low.queue_key(), &job_id).await {
						warn!(job_id, %error, "failed to requeue retried job after backoff");
					}
				});

				Ok(JobOutcome::Retried)
			}
			RetryDecision::DeadLetter => {
				self.job_state.record_dead_letter(job_id, &error.to_string()).await?;
				self.store.list_push_right("queue:dlq", job_id).await?;
				error!(job_id, "job moved to dead-letter queue after exceeding max retries");
				Ok(JobOutcome::DeadLettered)
			}
		}
	}
}
