//! SubRip (`.srt`) rendering.

use crate::transcription::Segment;
use std::fmt::Write;

/// `HH:MM:SS,mmm`, rounded to the nearest millisecond.
pub fn timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let (hours, rest) = (total_ms / 3_600_000, total_ms % 3_600_000);
    let (minutes, rest) = (rest / 60_000, rest % 60_000);
    let (secs, millis) = (rest / 1000, rest % 1000);
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Numbered blocks in segment order, each followed by a blank line.
pub fn render(segments: &[Segment]) -> String {
    let mut out = String::new();
    for (index, segment) in segments.iter().enumerate() {
        // Writing into a String cannot fail
        let _ = write!(
            out,
            "{}\n{} --> {}\n{}\n\n",
            index + 1,
            timestamp(segment.start_seconds),
            timestamp(segment.end_seconds),
            segment.text.trim()
        );
    }
    out
}
