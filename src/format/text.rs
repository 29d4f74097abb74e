//! Plain text rendering.

use crate::transcription::normalize::collapse_whitespace;
use crate::transcription::Segment;

/// Segment texts in order, single-spaced, no timestamps.
pub fn render(segments: &[Segment]) -> String {
    let joined = segments.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join(" ");
    collapse_whitespace(&joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_whitespace() {
        let text = render(&[
            Segment::new(0.0, 1.0, "  Hello,\n"),
            Segment::new(1.0, 2.0, "world.  "),
            Segment::new(2.0, 3.0, "\tBye"),
        ]);
        assert_eq!(text, "Hello, world. Bye");
    }

    #[test]
    fn test_empty_transcript() {
        assert_eq!(render(&[]), "");
    }
}
