use thiserror::Error;

/// Errors produced anywhere in the rendering pipeline.
///
/// Every variant maps to a stable `code()` string and an HTTP-style status via
/// `http_status()`, so a caller outside this crate (an HTTP layer, a CLI) can translate
/// errors mechanically instead of re-deriving the mapping per call site.
#[derive(Error, Debug)]
pub enum ClipforgeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("timeout during {step}")]
    Timeout { step: String },

    #[error("encoder failed: {0}")]
    EncoderFailed(String),

    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("storage failed: {0}")]
    StorageFailed(String),

    #[error("queue is full")]
    QueueFull,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ClipforgeError>;

impl ClipforgeError {
    /// Stable machine-readable error code, per the taxonomy.
    pub fn code(&self) -> &'static str {
        match self {
            ClipforgeError::InvalidInput(_) => "invalid-input",
            ClipforgeError::JobNotFound(_) => "job-not-found",
            ClipforgeError::ArtifactNotFound(_) => "artifact-not-found",
            ClipforgeError::Timeout { .. } => "timeout",
            ClipforgeError::EncoderFailed(_) => "encoder-failed",
            ClipforgeError::TranscriptionFailed(_) => "transcription-failed",
            ClipforgeError::DownloadFailed(_) => "download-failed",
            ClipforgeError::StorageFailed(_) => "storage-failed",
            ClipforgeError::QueueFull => "queue-full",
            ClipforgeError::Io(_) => "internal",
            ClipforgeError::Json(_) => "internal",
            ClipforgeError::Internal(_) => "internal",
        }
    }

    /// HTTP-status-like mapping, for an (out of scope) HTTP layer to reuse.
    pub fn http_status(&self) -> u16 {
        match self {
            ClipforgeError::InvalidInput(_) => 400,
            ClipforgeError::JobNotFound(_) => 404,
            ClipforgeError::ArtifactNotFound(_) => 404,
            ClipforgeError::Timeout { .. } => 408,
            ClipforgeError::EncoderFailed(_) => 422,
            ClipforgeError::TranscriptionFailed(_) => 422,
            ClipforgeError::DownloadFailed(_) => 502,
            ClipforgeError::StorageFailed(_) => 507,
            ClipforgeError::QueueFull => 429,
            ClipforgeError::Io(_) => 500,
            ClipforgeError::Json(_) => 500,
            ClipforgeError::Internal(_) => 500,
        }
    }

    /// Whether retrying the same operation might succeed.
    pub fn retryable(&self) -> bool {
        matches!(self, ClipforgeError::TranscriptionFailed(_))
    }

    /// Strips anything that shouldn't leak onto a job record (§7): no stack traces, no
    /// filesystem paths, no source URL echoes, no raw subprocess stderr. Variants whose
    /// payload is just this crate's own opaque id (job/artifact ids, the step name of a
    /// timeout) are safe to echo verbatim; everything else collapses to its `code()` name.
    pub fn sanitized_message(&self) -> String {
        match self {
            ClipforgeError::InvalidInput(_) => "invalid input".to_string(),
            ClipforgeError::JobNotFound(id) => format!("job not found: {id}"),
            ClipforgeError::ArtifactNotFound(id) => format!("artifact not found: {id}"),
            ClipforgeError::Timeout { step } => format!("timeout during {step}"),
            ClipforgeError::QueueFull => "queue is full".to_string(),
            ClipforgeError::EncoderFailed(_) => "encoder failed".to_string(),
            ClipforgeError::TranscriptionFailed(_) => "transcription failed".to_string(),
            ClipforgeError::DownloadFailed(_) => "download failed".to_string(),
            ClipforgeError::StorageFailed(_) => "storage failed".to_string(),
            ClipforgeError::Io(_) => "internal error".to_string(),
            ClipforgeError::Json(_) => "internal error".to_string(),
            ClipforgeError::Internal(_) => "internal error".to_string(),
        }
    }
}
