use crate::error::StoreError;
use crate::job::JobStatus;
use crate::store::StateStore;
use std::collections::HashMap;
use std::sync::Arc;

/// Thin wrapper over hash field updates on `job:{id}` (C6, spec §4.6).
///
/// Every state transition in the pipeline executor (C9) and worker loop (C10)
/// goes through this type rather than calling `StateStore::hash_set_fields`
/// directly, so tests have one seam to observe every mutation a job's hash
/// ever sees. Updates are non-transactional per field, matching spec §4.6:
/// readers must tolerate seeing intermediate states.
#[derive(Clone)]
pub struct JobStateWriter {
	store: Arc<dyn StateStore>,
}

impl JobStateWriter {
	#[must_use]
	pub fn new(store: Arc<dyn StateStore>) -> Self {
		Self { store }
	}

	fn key(job_id: &str) -> String {
		format!("job:{job_id}")
	}

	/// # Errors
	/// Returns an error if the underlying store write fails.
	pub async fn set_status(&self, job_id: &str, status: JobStatus) -> Result<(), StoreError> {
		self.store.hash_set_fields(&Self::key(job_id), &HashMap::from([("status".to_string(), status.as_str().to_string())])).await
	}

	/// Records the blob key of the extracted audio track, after step 5.
	///
	/// # Errors
	/// Returns an error if the underlying store write fails.
	pub async fn set_audio_url(&self, job_id: &str, audio_url: &str) -> Result<(), StoreError> {
		self.store
			.hash_set_fields(&Self::key(job_id), &HashMap::from([("audioUrl".to_string(), audio_url.to_string())]))
			.await
	}

	/// Records the subtitle blob key and marks the job `completed` in one
	/// write, after step 9 succeeds (invariant 4 in spec §3: `completed`
	/// implies a non-empty `subtitleUrl`).
	///
	/// # Errors
	/// Returns an error if the underlying store write fails.
	pub async fn complete(&self, job_id: &str, subtitle_url: &str) -> Result<(), StoreError> {
		self.store
			.hash_set_fields(
				&Self::key(job_id),
				&HashMap::from([("subtitleUrl".to_string(), subtitle_url.to_string()), ("status".to_string(), JobStatus::Completed.as_str().to_string())]),
			)
			.await
	}

	/// Atomically increments `retryCount` and returns its new value, per
	/// spec §4.7 ("increments the counter atomically").
	///
	/// # Errors
	/// Returns an error if the underlying store write fails.
	pub async fn increment_retry_count(&self, job_id: &str) -> Result<u32, StoreError> {
		let next = self.store.hash_incr(&Self::key(job_id), "retryCount", 1).await?;
		#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
		Ok(next.max(0) as u32)
	}

	/// Marks a job for retry: status `queued:retry` plus the failure message,
	/// matching spec §4.7's "record `error`" step. Does not push the job back
	/// onto `queue:low` itself — that stays the retry controller's job, after
	/// the backoff delay elapses.
	///
	/// # Errors
	/// Returns an error if the underlying store write fails.
	pub async fn record_retry(&self, job_id: &str, error: &str) -> Result<(), StoreError> {
		self.store
			.hash_set_fields(
				&Self::key(job_id),
				&HashMap::from([("status".to_string(), JobStatus::QueuedRetry.as_str().to_string()), ("error".to_string(), error.to_string())]),
			)
			.await
	}

	/// Marks a job terminally failed: status `failed:dlq` plus the failure
	/// message (spec §4.7, invariant 5 in spec §3).
	///
	/// # Errors
	/// Returns an error if the underlying store write fails.
	pub async fn record_dead_letter(&self, job_id: &str, error: &str) -> Result<(), StoreError> {
		self.store
			.hash_set_fields(
				&Self::key(job_id),
				&HashMap::from([("status".to_string(), JobStatus::FailedDlq.as_str().to_string()), ("error".to_string(), error.to_string())]),
			)
			.await
	}
}
