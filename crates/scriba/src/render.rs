//! Transcript renderings attached to a completed job.

use serde::{Deserialize, Serialize};

use crate::engine::{RawSegment, RawTranscript};

/// Rendered line when the segment list is empty.
const NO_SPEECH: &str = "No speech detected.";

/// Timestamps above this are assumed to be milliseconds and are normalised
/// to seconds.
const MS_THRESHOLD: f64 = 1_000_000.0;

/// The result payload stored on a completed job: the raw transcript plus its
/// dialogue renderings. `list_jobs` omits this (it can be large); `get_job`
/// and the download endpoints carry it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptResult {
    /// Original filename (or archive-internal path) of the audio.
    pub filename: String,
    pub raw_text: String,
    pub dialogue_plain: String,
    pub dialogue_markdown: String,
    pub segments: Vec<Segment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    /// Start offset in seconds.
    pub start_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<u32>,
    pub text: String,
}

/// Builds the stored payload from an engine transcript.
pub fn render(filename: &str, raw: RawTranscript) -> TranscriptResult {
    let segments: Vec<Segment> = raw
        .segments
        .iter()
        .map(|s| Segment {
            start_secs: normalise_start(s.start),
            speaker: s.speaker,
            text: s.text.trim().to_string(),
        })
        .collect();

    TranscriptResult {
        filename: filename.to_string(),
        raw_text: raw.text.trim().to_string(),
        dialogue_plain: format_dialogue(&raw.segments, false),
        dialogue_markdown: format_dialogue(&raw.segments, true),
        segments,
        entities: raw.entities,
    }
}

fn normalise_start(start: f64) -> f64 {
    let start = if start.is_finite() { start.max(0.0) } else { 0.0 };
    if start > MS_THRESHOLD {
        start / 1000.0
    } else {
        start
    }
}

/// Formats segments as dialogue lines, one per utterance, separated by blank
/// lines. Speaker-less segments are labelled "Speech".
fn format_dialogue(segments: &[RawSegment], use_markdown: bool) -> String {
    if segments.is_empty() {
        return NO_SPEECH.to_string();
    }

    let lines: Vec<String> = segments
        .iter()
        .map(|seg| {
            let timestamp = format_timestamp(normalise_start(seg.start));
            let text = seg.text.trim();
            let speaker = match seg.speaker {
                Some(n) => format!("Speaker {n}"),
                None => "Speech".to_string(),
            };
            if use_markdown {
                format!("**`[{timestamp}]` {speaker}:** {text}")
            } else {
                format!("[{timestamp}] {speaker}: {text}")
            }
        })
        .collect();

    lines.join("\n\n")
}

/// `H:MM:SS`, hours unpadded.
fn format_timestamp(secs: f64) -> String {
    let total = secs as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{hours}:{minutes:02}:{seconds:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, speaker: Option<u32>, text: &str) -> RawSegment {
        RawSegment {
            start,
            speaker,
            text: text.to_string(),
        }
    }

    #[test]
    fn empty_transcript_renders_no_speech_line() {
        let result = render("a.wav", RawTranscript::default());
        assert_eq!(result.dialogue_plain, NO_SPEECH);
        assert_eq!(result.dialogue_markdown, NO_SPEECH);
        assert!(result.segments.is_empty());
    }

    #[test]
    fn plain_and_markdown_lines() {
        let raw = RawTranscript {
            text: " hello world ".to_string(),
            segments: vec![seg(5.2, Some(1), " hello "), seg(65.0, None, "world")],
            entities: vec![],
        };
        let result = render("a.wav", raw);
        assert_eq!(result.raw_text, "hello world");
        assert_eq!(
            result.dialogue_plain,
            "[0:00:05] Speaker 1: hello\n\n[0:01:05] Speech: world"
        );
        assert!(result
            .dialogue_markdown
            .starts_with("**`[0:00:05]` Speaker 1:** hello"));
    }

    #[test]
    fn millisecond_timestamps_are_normalised() {
        let raw = RawTranscript {
            text: "late".to_string(),
            segments: vec![seg(3_605_000.0, None, "late")],
            entities: vec![],
        };
        let result = render("a.wav", raw);
        assert_eq!(result.segments[0].start_secs, 3605.0);
        assert!(result.dialogue_plain.starts_with("[1:00:05]"));
    }

    #[test]
    fn hour_formatting() {
        assert_eq!(format_timestamp(0.0), "0:00:00");
        assert_eq!(format_timestamp(59.9), "0:00:59");
        assert_eq!(format_timestamp(3600.0), "1:00:00");
        assert_eq!(format_timestamp(7325.0), "2:02:05");
    }

    #[test]
    fn serialises_camel_case() {
        let result = render(
            "a.wav",
            RawTranscript {
                text: "hi".to_string(),
                segments: vec![seg(0.0, None, "hi")],
                entities: vec![],
            },
        );
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("rawText").is_some());
        assert!(json.get("dialogueMarkdown").is_some());
        assert!(json.get("entities").is_none());
    }
}
