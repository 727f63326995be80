use crate::transcription::Segment;
use std::fmt::Write as _;

/// Renders `segments` as an SRT document, per spec §6: 1-based sequence
/// numbers, `HH:MM:SS.mmm --> HH:MM:SS.mmm` timing lines (note: a literal
/// dot, not the conventional SRT comma), blank-line separated entries.
#[must_use]
pub fn render(segments: &[Segment]) -> String {
	let mut out = String::new();
	for (index, segment) in segments.iter().enumerate() {
		let _ = writeln!(out, "{}", index + 1);
		let _ = writeln!(out, "{} --> {}", format_timestamp(segment.start_ms), format_timestamp(segment.end_ms));
		let _ = writeln!(out, "{}", segment.text);
		out.push('\n');
	}
	out
}

fn format_timestamp(total_ms: u64) -> String {
	let hours = total_ms / 3_600_000;
	let minutes = (total_ms % 3_600_000) / 60_000;
	let seconds = (total_ms % 60_000) / 1_000;
	let millis = total_ms % 1_000;
	format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}

/// Parses an SRT document back into segments. Used by the round-trip test
/// (§8 property 7) and not otherwise exercised by the pipeline.
///
/// # Errors
/// Returns an error describing the first malformed entry.
pub fn parse(document: &str) -> Result<Vec<Segment>, String> {
	let mut segments = Vec::new();
	let mut blocks = document.split("\n\n").map(str::trim).filter(|block| !block.is_empty());

	for block in &mut blocks {
		let mut lines = block.lines();
		lines.next().ok_or("missing sequence number line")?;
		let timing_line = lines.next().ok_or("missing timing line")?;
		let (start, end) = timing_line.split_once(" --> ").ok_or_else(|| format!("malformed timing line: {timing_line}"))?;
		let text = lines.collect::<Vec<_>>().join("\n");

		segments.push(Segment {
			text,
			start_ms: parse_timestamp(start)?,
			end_ms: parse_timestamp(end)?,
		});
	}

	Ok(segments)
}

fn parse_timestamp(value: &str) -> Result<u64, String> {
	let (hms, millis) = value.split_once('.').ok_or_else(|| format!("malformed timestamp: {value}"))?;
	let mut parts = hms.split(':');
	let hours: u64 = parts.next().ok_or("missing hours")?.parse().map_err(|_| "invalid hours")?;
	let minutes: u64 = parts.next().ok_or("missing minutes")?.parse().map_err(|_| "invalid minutes")?;
	let seconds: u64 = parts.next().ok_or("missing seconds")?.parse().map_err(|_| "invalid seconds")?;
	let millis: u64 = millis.parse().map_err(|_| "invalid milliseconds")?;
	Ok(hours * 3_600_000 + minutes * 60_000 + seconds * 1_000 + millis)
}
