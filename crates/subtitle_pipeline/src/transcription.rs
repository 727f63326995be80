use crate::blob::BlobStore;
use crate::error::TranscriptionError;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One recognized span of speech, per spec §4.4.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
	pub text: String,
	pub start_ms: u64,
	pub end_ms: u64,
}

/// Transcription provider client (C4, spec §4.4). Given the blob key of an
/// already-uploaded audio file, mints its own presigned read URL, submits it
/// to the provider, and polls until the job reaches a terminal state.
///
/// `audio_duration_ms` is used only for the no-utterances fallback: a
/// provider that returns no structured utterances yields one segment
/// spanning the whole clip.
#[async_trait]
pub trait TranscriptionClient: Send + Sync {
	/// # Errors
	/// Returns an error if presigning, submission, or polling fails, or the
	/// provider job lands in a terminal error state.
	async fn transcribe(&self, audio_key: &str, audio_duration_ms: u64, poll_interval: Duration) -> Result<Vec<Segment>, TranscriptionError>;
}

#[derive(Debug, serde::Serialize)]
struct SubmitRequest<'a> {
	audio_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
	id: String,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
	status: String,
	#[serde(default)]
	error: Option<String>,
	#[serde(default)]
	utterances: Vec<UtteranceResponse>,
}

#[derive(Debug, Deserialize)]
struct UtteranceResponse {
	text: String,
	start: u64,
	end: u64,
}

/// Production `TranscriptionClient` against an AssemblyAI-style REST API:
/// `POST /v2/transcript` to submit, `GET /v2/transcript/{id}` to poll.
pub struct AssemblyAiClient {
	http: reqwest::Client,
	base_url: String,
	api_key: String,
	blob: Arc<dyn BlobStore>,
	presigned_url_expiry: Duration,
}

impl AssemblyAiClient {
	#[must_use]
	pub fn new(api_key: String, blob: Arc<dyn BlobStore>, presigned_url_expiry: Duration) -> Self {
		Self {
			http: reqwest::Client::new(),
			base_url: "https://api.assemblyai.com".to_string(),
			api_key,
			blob,
			presigned_url_expiry,
		}
	}

	#[must_use]
	pub fn with_base_url(mut self, base_url: String) -> Self {
		self.base_url = base_url;
		self
	}
}

#[async_trait]
impl TranscriptionClient for AssemblyAiClient {
	async fn transcribe(&self, audio_key: &str, audio_duration_ms: u64, poll_interval: Duration) -> Result<Vec<Segment>, TranscriptionError> {
		let audio_url = self
			.blob
			.presign_get(audio_key, self.presigned_url_expiry)
			.await
			.map_err(|error| TranscriptionError::Presign(error.to_string()))?;

		let submitted: SubmitResponse = self
			.http
			.post(format!("{}/v2/transcript", self.base_url))
			.header("authorization", &self.api_key)
			.json(&SubmitRequest { audio_url: &audio_url })
			.send()
			.await?
			.json()
			.await?;

		debug!(job_id = %submitted.id, "submitted transcription job");

		loop {
			let poll: PollResponse = self
				.http
				.get(format!("{}/v2/transcript/{}", self.base_url, submitted.id))
				.header("authorization", &self.api_key)
				.send()
				.await?
				.json()
				.await?;

			match poll.status.as_str() {
				"completed" => {
					if poll.utterances.is_empty() {
						return Ok(vec![Segment {
							text: String::new(),
							start_ms: 0,
							end_ms: audio_duration_ms,
						}]);
					}
					return Ok(poll
						.utterances
						.into_iter()
						.map(|utterance| Segment {
							text: utterance.text,
							start_ms: utterance.start,
							end_ms: utterance.end,
						})
						.collect());
				}
				"error" => {
					return Err(TranscriptionError::ProviderTerminalError(poll.error.unwrap_or_else(|| "unknown provider error".to_string())));
				}
				_ => {
					tokio::time::sleep(poll_interval).await;
				}
			}
		}
	}
}

/// Deterministic `TranscriptionClient` used by pipeline tests (§8), including
/// the worker-pool concurrency test (S5): `concurrency` tracks the number of
/// in-flight `transcribe` calls so a test can assert it never exceeds the
/// configured AI-provider semaphore capacity.
#[derive(Clone)]
pub struct MockTranscriber {
	segments: Vec<Segment>,
	delay: Duration,
	concurrency: Arc<AtomicUsize>,
	max_observed_concurrency: Arc<AtomicUsize>,
}

impl MockTranscriber {
	#[must_use]
	pub fn new(segments: Vec<Segment>, delay: Duration) -> Self {
		Self {
			segments,
			delay,
			concurrency: Arc::new(AtomicUsize::new(0)),
			max_observed_concurrency: Arc::new(AtomicUsize::new(0)),
		}
	}

	#[must_use]
	pub fn max_observed_concurrency(&self) -> usize {
		self.max_observed_concurrency.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl TranscriptionClient for MockTranscriber {
	async fn transcribe(&self, _audio_key: &str, _audio_duration_ms: u64, _poll_interval: Duration) -> Result<Vec<Segment>, TranscriptionError> {
		let in_flight = self.concurrency.fetch_add(1, Ordering::SeqCst) + 1;
		self.max_observed_concurrency.fetch_max(in_flight, Ordering::SeqCst);

		tokio::time::sleep(self.delay).await;

		self.concurrency.fetch_sub(1, Ordering::SeqCst);
		Ok(self.segments.clone())
	}
}
