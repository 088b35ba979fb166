//! Transcriber Daemon Client (C3, §4.3) — public surface over the process supervisor.

pub mod process;
pub mod protocol;

use crate::error::{ClipforgeError, Result};
use protocol::WordTimestamp as WireWordTimestamp;
use tokio::time::{timeout, Duration};

pub use process::TranscriberProcessClient;

const TRANSCRIBE_TIMEOUT_SECS: u64 = 300;

/// A single transcribed word, timestamps relative to the start of its source audio (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct WordTimestamp {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

impl From<WireWordTimestamp> for WordTimestamp {
    fn from(w: WireWordTimestamp) -> Self {
        WordTimestamp {
            text: w.word,
            start: w.start,
            end: w.end,
        }
    }
}

/// Flattened transcript: word-level timestamps in order, plus the detected language.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    pub words: Vec<WordTimestamp>,
    pub language: Option<String>,
}

/// Transcribes one audio URL, under the per-audio timeout (§5).
pub async fn transcribe(
    client: &TranscriberProcessClient,
    url: &str,
    language: Option<String>,
) -> Result<Transcript> {
    let response = timeout(
        Duration::from_secs(TRANSCRIBE_TIMEOUT_SECS),
        client.transcribe(url.to_string(), language),
    )
    .await
    .map_err(|_| ClipforgeError::Timeout {
        step: "transcribe".to_string(),
    })??;

    if !response.success {
        return Err(ClipforgeError::TranscriptionFailed(
            response.error.unwrap_or_else(|| "unknown error".to_string()),
        ));
    }

    let mut words: Vec<WordTimestamp> = if !response.word_timestamps.is_empty() {
        response.word_timestamps.into_iter().map(Into::into).collect()
    } else {
        response
            .segments
            .into_iter()
            .flat_map(|s| s.words)
            .map(Into::into)
            .collect()
    };
    words.retain(|w| !w.text.trim().is_empty());

    Ok(Transcript {
        words,
        language: response.language,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_timestamp_conversion_preserves_fields() {
        let wire = WireWordTimestamp {
            word: "hi".to_string(),
            start: 0.1,
            end: 0.4,
        };
        let w: WordTimestamp = wire.into();
        assert_eq!(w.text, "hi");
        assert_eq!(w.start, 0.1);
        assert_eq!(w.end, 0.4);
    }
}
