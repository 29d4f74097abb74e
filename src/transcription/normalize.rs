//! Validation and clean-up of raw tier output.
//!
//! After [`normalize`] the segments have strictly increasing starts, do not
//! overlap, and cover `[0, duration]` end to end: the first starts at zero,
//! each one ends where the next begins and the last ends with the audio.
//! Output that cannot be brought into that shape is malformed and the tier is
//! treated as failed.

use super::backend::{BackendTranscript, Segment, TierError};
use tracing::debug;

/// Turn a tier's raw segments into the canonical, ordered list.
pub fn normalize(raw: &BackendTranscript, duration: f64, tolerance: f64) -> Result<Vec<Segment>, TierError> {
    let source = if raw.segments.is_empty() {
        raw.text
            .as_deref()
            .map(|text| estimate_segments(text, duration))
            .unwrap_or_default()
    } else {
        raw.segments.clone()
    };

    let mut segments: Vec<Segment> = Vec::with_capacity(source.len());
    for segment in source {
        let text = collapse_whitespace(&segment.text);
        if text.is_empty() {
            continue;
        }
        let (start, end) = (segment.start_seconds, segment.end_seconds);
        if !start.is_finite() || !end.is_finite() || start < 0.0 {
            return Err(TierError::Malformed(format!("invalid timestamps {}..{}", start, end)));
        }
        if start > duration {
            return Err(TierError::Malformed(format!(
                "segment starts at {:.3}s, after the end of the audio ({:.3}s)",
                start, duration
            )));
        }
        if let Some(previous) = segments.last() {
            if start <= previous.start_seconds {
                return Err(TierError::Malformed(format!(
                    "segment start {:.3}s does not follow {:.3}s",
                    start, previous.start_seconds
                )));
            }
        }
        segments.push(Segment::new(start, end.min(duration).max(start), text));
    }

    // Overlaps and gaps, both resolved on the earlier segment
    let mut long_silences = 0usize;
    for i in 0..segments.len().saturating_sub(1) {
        let next_start = segments[i + 1].start_seconds;
        let current = &mut segments[i];
        if next_start - current.end_seconds > tolerance {
            long_silences += 1;
        }
        current.end_seconds = next_start;
    }

    if let Some(first) = segments.first_mut() {
        if first.start_seconds > tolerance {
            long_silences += 1;
        }
        first.start_seconds = 0.0;
    }
    if let Some(last) = segments.last_mut() {
        if duration - last.end_seconds > tolerance {
            long_silences += 1;
        }
        last.end_seconds = duration;
    }
    if long_silences > 0 {
        debug!(long_silences, tolerance, "silences wider than the tolerance absorbed into neighbouring segments");
    }

    Ok(segments)
}

/// Spread the non-empty lines of an untimed transcript evenly over the audio.
pub fn estimate_segments(text: &str, duration: f64) -> Vec<Segment> {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if lines.is_empty() {
        return Vec::new();
    }
    let step = duration / lines.len() as f64;
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| Segment::new(i as f64 * step, (i + 1) as f64 * step, *line))
        .collect()
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Map a language reported by a tier onto a code. Some APIs answer with the
/// English name instead of the ISO code.
pub fn normalize_language(reported: &str) -> Option<String> {
    let reported = reported.trim().to_ascii_lowercase();
    let code = match reported.as_str() {
        "" | "auto" | "unknown" => return None,
        "portuguese" => "pt",
        "english" => "en",
        "spanish" => "es",
        "french" => "fr",
        "german" => "de",
        "italian" => "it",
        other => other,
    };
    Some(code.to_string())
}
