use crate::error::ExtractError;
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Extracts an audio track from a local video file (C3, spec §4.3).
#[async_trait]
pub trait AudioExtractor: Send + Sync {
	/// Writes a VBR MP3 of `video_path`'s audio track to `audio_path`.
	///
	/// # Errors
	/// Returns an error if the extractor process fails to launch or exits
	/// non-zero.
	async fn extract(&self, video_path: &Path, audio_path: &Path) -> Result<(), ExtractError>;

	/// Duration of the extracted audio, used by C4's no-utterances fallback
	/// (spec §4.4) to synthesize a single segment spanning the whole clip.
	///
	/// # Errors
	/// Returns an error if duration cannot be determined.
	async fn duration_ms(&self, audio_path: &Path) -> Result<u64, ExtractError>;
}

/// Production `AudioExtractor` shelling out to `ffmpeg`.
///
/// `-vn` drops any video stream, `-q:a 2` requests VBR quality 2 (spec §4.3
/// names this exact setting), matching the teacher's transcoder worker's
/// invocation style.
#[derive(Default, Clone, Copy)]
pub struct FfmpegExtractor;

#[async_trait]
impl AudioExtractor for FfmpegExtractor {
	async fn extract(&self, video_path: &Path, audio_path: &Path) -> Result<(), ExtractError> {
		debug!(?video_path, ?audio_path, "invoking ffmpeg for audio extraction");

		let output = Command::new("ffmpeg")
			.arg("-y")
			.arg("-i")
			.arg(video_path)
			.arg("-vn")
			.arg("-q:a")
			.arg("2")
			.arg(audio_path)
			.output()
			.await?;

		if !output.status.success() {
			let stderr = String::from_utf8_lossy(&output.stderr).to_string();
			return Err(ExtractError::NonZeroExit(stderr));
		}

		Ok(())
	}

	async fn duration_ms(&self, audio_path: &Path) -> Result<u64, ExtractError> {
		probe_duration_ms(audio_path).await
	}
}

/// Probes a local media file's duration in milliseconds via `ffprobe`,
/// matching the teacher's transcoder worker's duration check. Used to derive
/// the job's presigned-URL expiry headroom; not itself part of the §4.8
/// state machine's happy path.
///
/// # Errors
/// Returns an error if `ffprobe` fails to launch, exits non-zero, or prints
/// output that doesn't parse as a floating-point second count.
pub async fn probe_duration_ms(video_path: &Path) -> Result<u64, ExtractError> {
	let output = Command::new("ffprobe")
		.arg("-v")
		.arg("error")
		.arg("-show_entries")
		.arg("format=duration")
		.arg("-of")
		.arg("default=noprint_wrappers=1:nokey=1")
		.arg(video_path)
		.output()
		.await?;

	if !output.status.success() {
		let stderr = String::from_utf8_lossy(&output.stderr).to_string();
		return Err(ExtractError::NonZeroExit(stderr));
	}

	let stdout = String::from_utf8_lossy(&output.stdout);
	let seconds: f64 = stdout.trim().parse().map_err(|_| ExtractError::NonZeroExit(format!("unparseable ffprobe output: {stdout}")))?;
	#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
	Ok((seconds * 1000.0) as u64)
}

/// Deterministic stand-in for `ffmpeg`, used by pipeline tests (§8) so they
/// don't depend on a media toolchain being installed on the test host.
#[derive(Default, Clone, Copy)]
pub struct FakeAudioExtractor;

#[async_trait]
impl AudioExtractor for FakeAudioExtractor {
	async fn extract(&self, _video_path: &Path, audio_path: &Path) -> Result<(), ExtractError> {
		if let Some(parent) = audio_path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		tokio::fs::write(audio_path, b"fake-mp3-bytes").await?;
		Ok(())
	}

	async fn duration_ms(&self, _audio_path: &Path) -> Result<u64, ExtractError> {
		Ok(1_000)
	}
}
