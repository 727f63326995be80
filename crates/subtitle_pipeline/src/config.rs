use clap::{Parser, ValueEnum};

/// Which transcription backend to use, selected by `TRANSCRIPTION_PROVIDER`.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
pub enum TranscriptionProvider {
	Assemblyai,
	Mock,
}

#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
	/// Coordination store connection string
	#[arg(long, env = "REDIS_URL")]
	pub redis_url: String,

	#[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
	pub aws_region: String,

	#[arg(long, env = "AWS_ACCESS_KEY_ID")]
	pub aws_access_key_id: String,

	#[arg(long, env = "AWS_SECRET_ACCESS_KEY")]
	pub aws_secret_access_key: String,

	#[arg(long, env = "S3_BUCKET_NAME")]
	pub s3_bucket_name: String,

	#[arg(long, env = "TRANSCRIPTION_PROVIDER", default_value = "mock")]
	pub transcription_provider: TranscriptionProvider,

	#[arg(long, env = "ASSEMBLYAI_API_KEY")]
	pub assemblyai_api_key: Option<String>,

	/// Maximum retry attempts before a job is dead-lettered
	#[arg(long, env = "MAX_RETRIES", default_value = "3")]
	pub max_retries: u32,

	/// Base backoff for retry 1, doubled per subsequent retry
	#[arg(long, env = "INITIAL_BACKOFF_MS", default_value = "2000")]
	pub initial_backoff_ms: u64,

	/// Fleet-wide worker slot capacity (`semaphore:global`)
	#[arg(long, env = "MAX_GLOBAL_CONCURRENCY", default_value = "5")]
	pub max_global_concurrency: usize,

	/// Fleet-wide transcription slot capacity (`semaphore:ai`)
	#[arg(long, env = "MAX_AI_CONCURRENCY", default_value = "2")]
	pub max_ai_concurrency: usize,

	/// Transcription provider poll interval
	#[arg(long, env = "TRANSCRIPTION_POLL_MS", default_value = "3000")]
	pub transcription_poll_ms: u64,

	/// Presigned audio URL expiry handed to the transcription provider
	#[arg(long, env = "PRESIGNED_AUDIO_URL_EXPIRY_SECS", default_value = "60")]
	pub presigned_audio_url_expiry_secs: u64,

	/// Root directory under which per-job scratch directories are created
	#[arg(long, env = "TMP_ROOT", default_value = "/tmp/subtitle-worker")]
	pub tmp_root: String,

	/// Number of worker loops to run inside this process
	#[arg(long, env = "WORKER_COUNT", default_value = "1")]
	pub worker_count: usize,

	/// Perform one-time semaphore initialization before starting workers.
	/// See §9: this is racy if run by more than one process concurrently.
	#[arg(long, env = "INIT_SEMAPHORES", default_value = "false")]
	pub init_semaphores: bool,
}

impl Config {
	/// Fail fast at startup on missing/inconsistent configuration.
	///
	/// # Errors
	/// Returns a message describing the first invalid field found.
	pub fn validate(&self) -> Result<(), String> {
		if self.transcription_provider == TranscriptionProvider::Assemblyai && self.assemblyai_api_key.is_none() {
			return Err("ASSEMBLYAI_API_KEY must be set when TRANSCRIPTION_PROVIDER=assemblyai".to_string());
		}

		if self.max_global_concurrency == 0 {
			return Err("MAX_GLOBAL_CONCURRENCY must be at least 1".to_string());
		}

		if self.max_ai_concurrency == 0 {
			return Err("MAX_AI_CONCURRENCY must be at least 1".to_string());
		}

		if self.worker_count == 0 {
			return Err("WORKER_COUNT must be at least 1".to_string());
		}

		Ok(())
	}

	#[cfg(test)]
	pub fn test() -> Self {
		Self {
			redis_url: "redis://127.0.0.1/".to_string(),
			aws_region: "us-east-1".to_string(),
			aws_access_key_id: "test".to_string(),
			aws_secret_access_key: "test".to_string(),
			s3_bucket_name: "test-bucket".to_string(),
			transcription_provider: TranscriptionProvider::Mock,
			assemblyai_api_key: None,
			max_retries: 3,
			initial_backoff_ms: 2000,
			max_global_concurrency: 5,
			max_ai_concurrency: 2,
			transcription_poll_ms: 3000,
			presigned_audio_url_expiry_secs: 60,
			tmp_root: std::env::temp_dir().to_string_lossy().to_string(),
			worker_count: 1,
			init_semaphores: false,
		}
	}
}
