//! Line-delimited JSON wire protocol spoken with the transcriber daemon subprocess (§4.3, §6).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action")]
#[serde(rename_all = "lowercase")]
pub enum Request {
    Transcribe {
        id: String,
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        word_timestamps: bool,
    },
    Ping {
        id: String,
    },
    Status {
        id: String,
    },
    Shutdown {
        id: String,
    },
}

impl Request {
    pub fn id(&self) -> &str {
        match self {
            Request::Transcribe { id, .. } => id,
            Request::Ping { id } => id,
            Request::Status { id } => id,
            Request::Shutdown { id } => id,
        }
    }

    pub fn transcribe(id: String, url: String, language: Option<String>) -> Self {
        Request::Transcribe {
            id,
            url,
            language,
            word_timestamps: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WordTimestamp {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default)]
    pub words: Vec<WordTimestamp>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    pub success: bool,
    pub id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub segments: Vec<TranscriptSegment>,
    #[serde(default)]
    pub word_timestamps: Vec<WordTimestamp>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Sentinel line written to the daemon's stdout once it has finished loading its model.
pub const READY_SENTINEL: &str = "READY";
