use std::collections::HashMap;
use std::fmt;

/// Priority a job was submitted with. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
	High,
	Low,
}

impl Priority {
	#[must_use]
	pub fn queue_key(self) -> &'static str {
		match self {
			Self::High => "queue:high",
			Self::Low => "queue:low",
		}
	}
}

impl fmt::Display for Priority {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::High => write!(f, "high"),
			Self::Low => write!(f, "low"),
		}
	}
}

/// `status` values, matching the state diagram in spec §4.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
	Queued,
	DownloadingVideo,
	ExtractingAudio,
	TranscribingAudio,
	Completed,
	QueuedRetry,
	FailedDlq,
}

impl JobStatus {
	#[must_use]
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Queued => "queued",
			Self::DownloadingVideo => "processing:downloading_video",
			Self::ExtractingAudio => "processing:extracting_audio",
			Self::TranscribingAudio => "processing:transcribing_audio",
			Self::Completed => "completed",
			Self::QueuedRetry => "queued:retry",
			Self::FailedDlq => "failed:dlq",
		}
	}
}

impl fmt::Display for JobStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.as_str())
	}
}

/// The `job:{id}` hash, as described in spec §3.
#[derive(Debug, Clone)]
pub struct Job {
	pub id: String,
	pub video_url: String,
	pub status: JobStatus,
	pub created_at: String,
	pub priority: Priority,
	pub audio_url: Option<String>,
	pub subtitle_url: Option<String>,
	pub retry_count: u32,
	pub error: Option<String>,
}

impl Job {
	/// Parses a job out of the string-to-string map returned by the store's
	/// hash read. Unknown/missing fields fail loudly — a partially-written
	/// hash should never be silently treated as a fresh job.
	///
	/// # Errors
	/// Returns an error describing the first missing or malformed field.
	pub fn from_fields(id: &str, fields: &HashMap<String, String>) -> Result<Self, String> {
		let video_url = fields.get("videoUrl").ok_or("missing videoUrl")?.clone();
		let created_at = fields.get("createdAt").ok_or("missing createdAt")?.clone();
		chrono::DateTime::parse_from_rfc3339(&created_at).map_err(|e| format!("invalid createdAt: {e}"))?;
		let priority = match fields.get("priority").map(String::as_str) {
			Some("high") => Priority::High,
			Some("low") => Priority::Low,
			other => return Err(format!("invalid priority: {other:?}")),
		};
		let status = match fields.get("status").map(String::as_str) {
			Some("queued") => JobStatus::Queued,
			Some("processing:downloading_video") => JobStatus::DownloadingVideo,
			Some("processing:extracting_audio") => JobStatus::ExtractingAudio,
			Some("processing:transcribing_audio") => JobStatus::TranscribingAudio,
			Some("completed") => JobStatus::Completed,
			Some("queued:retry") => JobStatus::QueuedRetry,
			Some("failed:dlq") => JobStatus::FailedDlq,
			other => return Err(format!("invalid status: {other:?}")),
		};
		let retry_count = fields.get("retryCount").map(|s| s.parse::<u32>()).transpose().map_err(|e| e.to_string())?.unwrap_or(0);

		Ok(Self {
			id: id.to_string(),
			video_url,
			status,
			created_at,
			priority,
			audio_url: fields.get("audioUrl").cloned(),
			subtitle_url: fields.get("subtitleUrl").cloned(),
			retry_count,
			error: fields.get("error").cloned(),
		})
	}
}

/// Derives the blob key stem from a video blob key, e.g.
/// `"abc-clip.mp4"` → `"abc-clip"`. Used so every artifact key is a pure
/// function of `videoUrl` (idempotence, spec §4.8).
#[must_use]
pub fn stem(video_url: &str) -> String {
	let basename = basename(video_url);
	match basename.rsplit_once('.') {
		Some((stem, _ext)) => stem.to_string(),
		None => basename,
	}
}

/// Final path segment of a blob key.
#[must_use]
pub fn basename(video_url: &str) -> String {
	video_url.rsplit('/').next().unwrap_or(video_url).to_string()
}
