use thiserror::Error;

/// Error taxonomy for one pipeline attempt, matching the failure classes a
/// job can hit between `processing:downloading_video` and `completed`.
///
/// The retry controller only needs to know whether a variant is terminal
/// for this attempt; it never matches on the message text.
#[derive(Error, Debug)]
pub enum PipelineError {
	#[error("job record missing videoUrl")]
	MissingVideoUrl,
	#[error("blob store error: {0}")]
	BlobIo(String),
	#[error("audio extraction failed: {0}")]
	Extraction(String),
	#[error("transcription provider error: {0}")]
	Transcription(String),
	#[error("Transcription service returned no segments.")]
	EmptyTranscript,
	#[error("coordination store error: {0}")]
	Store(#[from] StoreError),
}

/// Errors from the shared state store, kept distinct from `PipelineError` so
/// the worker loop can tell "this job failed" apart from "the store is
/// unreachable" (the latter is never charged to a job's retry count).
#[derive(Error, Debug)]
pub enum StoreError {
	#[error("redis error: {0}")]
	Redis(#[from] redis::RedisError),
	#[error("serialization error: {0}")]
	Json(#[from] serde_json::Error),
	#[error("store returned malformed data: {0}")]
	Malformed(String),
}

/// Errors surfaced by the worker loop itself (step 1/2 of §4.9), never
/// attributed to a specific job.
#[derive(Error, Debug)]
pub enum WorkerLoopError {
	#[error("coordination store unavailable: {0}")]
	Store(#[from] StoreError),
}

/// Errors from the blob store client (C2). Opaque by design per spec §4.2:
/// callers only need to know the operation failed, not why.
#[derive(Error, Debug)]
pub enum BlobError {
	#[error("blob store error: {0}")]
	Provider(String),
	#[error("local filesystem error: {0}")]
	Io(#[from] std::io::Error),
}

impl From<BlobError> for PipelineError {
	fn from(error: BlobError) -> Self {
		Self::BlobIo(error.to_string())
	}
}

/// Errors from the audio extractor (C3).
#[derive(Error, Debug)]
pub enum ExtractError {
	#[error("failed to launch ffmpeg: {0}")]
	Spawn(#[from] std::io::Error),
	#[error("ffmpeg exited with failure: {0}")]
	NonZeroExit(String),
}

impl From<ExtractError> for PipelineError {
	fn from(error: ExtractError) -> Self {
		Self::Extraction(error.to_string())
	}
}

/// Errors from the transcription client (C4).
#[derive(Error, Debug)]
pub enum TranscriptionError {
	#[error("presigned URL generation failed: {0}")]
	Presign(String),
	#[error("transcription provider request failed: {0}")]
	Request(#[from] reqwest::Error),
	#[error("transcription job reached a terminal error state: {0}")]
	ProviderTerminalError(String),
}

impl From<TranscriptionError> for PipelineError {
	fn from(error: TranscriptionError) -> Self {
		Self::Transcription(error.to_string())
	}
}
