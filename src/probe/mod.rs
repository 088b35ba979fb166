//! Media probing (C2, §4.2) — runs the external prober against a URL directly, no download.

use crate::error::{ClipforgeError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

const PROBE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_AUDIO_DURATION: f64 = 10.0;
const DEFAULT_VIDEO_DURATION: f64 = 30.0;
const IMAGE_REACHABILITY_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
struct FFprobeStream {
    codec_name: Option<String>,
    codec_type: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FFprobeFormat {
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    bit_rate: Option<String>,
    #[serde(default)]
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FFprobeOutput {
    #[serde(default)]
    streams: Vec<FFprobeStream>,
    format: FFprobeFormat,
}

/// Probed media metadata (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct ProbedMedia {
    pub duration_seconds: f64,
    pub format: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub codec: Option<String>,
    pub bitrate: Option<u64>,
}

/// Runs `ffprobe` against `url` directly and parses its JSON output.
pub async fn probe(ffprobe_path: &str, url: &str) -> Result<ProbedMedia> {
    let child = Command::new(ffprobe_path)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
            url,
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| ClipforgeError::Internal(format!("failed to spawn ffprobe: {e}")))?;

    let output = timeout(Duration::from_secs(PROBE_TIMEOUT_SECS), child.wait_with_output())
        .await
        .map_err(|_| ClipforgeError::Timeout {
            step: "probe".to_string(),
        })?
        .map_err(|e| ClipforgeError::Internal(format!("ffprobe io error: {e}")))?;

    if !output.status.success() {
        return Err(ClipforgeError::DownloadFailed(
            "ffprobe exited non-zero".to_string(),
        ));
    }

    let parsed: FFprobeOutput = serde_json::from_slice(&output.stdout)?;
    parse_media(parsed)
}

fn parse_media(parsed: FFprobeOutput) -> Result<ProbedMedia> {
    let duration_seconds: f64 = parsed
        .format
        .duration
        .as_deref()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0);

    let video_stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));

    let width = video_stream.and_then(|s| s.width);
    let height = video_stream.and_then(|s| s.height);
    let codec = video_stream
        .or_else(|| parsed.streams.first())
        .and_then(|s| s.codec_name.clone());
    let bitrate = parsed.format.bit_rate.as_deref().and_then(|s| s.parse().ok());
    let format = parsed.format.format_name.unwrap_or_default();

    Ok(ProbedMedia {
        duration_seconds,
        format,
        width,
        height,
        codec,
        bitrate,
    })
}

/// Sanity bounds on probed dimensions/duration (§4.2). Violations are fatal to the job.
pub fn check_dimensions(media: &ProbedMedia) -> Result<()> {
    if let Some(w) = media.width {
        if !(1..=7680).contains(&w) {
            return Err(ClipforgeError::InvalidInput(format!(
                "probed width {w} out of range"
            )));
        }
    }
    if let Some(h) = media.height {
        if !(1..=4320).contains(&h) {
            return Err(ClipforgeError::InvalidInput(format!(
                "probed height {h} out of range"
            )));
        }
    }
    if !(0.0..=3600.0).contains(&media.duration_seconds) {
        return Err(ClipforgeError::InvalidInput(format!(
            "probed duration {} out of range",
            media.duration_seconds
        )));
    }
    Ok(())
}

/// Per-job cache: a URL probed twice in the same job is only probed once (§4.2 ambient
/// addition). Scoped to a job, not process-global.
#[derive(Clone, Default)]
pub struct ProbeCache {
    inner: Arc<Mutex<HashMap<String, ProbedMedia>>>,
}

impl ProbeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_probe(&self, ffprobe_path: &str, url: &str) -> Result<ProbedMedia> {
        {
            let cache = self.inner.lock().await;
            if let Some(hit) = cache.get(url) {
                debug!(url, "probe cache hit");
                return Ok(hit.clone());
            }
        }
        let media = probe(ffprobe_path, url).await?;
        self.inner
            .lock()
            .await
            .insert(url.to_string(), media.clone());
        Ok(media)
    }
}

/// Element kind for fallback-duration policy (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
    Image,
}

/// Checks that `url` is reachable without downloading it: a HEAD request, falling back to a
/// GET when the host doesn't support HEAD (some static hosts answer 405/501 to it). No
/// response body is read beyond what `reqwest` needs to confirm the status line (§4.2: image
/// probing is replaced entirely by a reachability check; failure is fatal to the job).
pub async fn check_image_reachable(client: &reqwest::Client, url: &str) -> Result<()> {
    let deadline = Duration::from_secs(IMAGE_REACHABILITY_TIMEOUT_SECS);

    let head = timeout(deadline, client.head(url).send())
        .await
        .map_err(|_| ClipforgeError::Timeout {
            step: "image reachability check".to_string(),
        })?;

    let response = match head {
        Ok(resp) if resp.status().is_success() => return Ok(()),
        Ok(resp) if matches!(resp.status().as_u16(), 405 | 501) => {
            timeout(deadline, client.get(url).send())
                .await
                .map_err(|_| ClipforgeError::Timeout {
                    step: "image reachability check".to_string(),
                })?
                .map_err(|e| ClipforgeError::DownloadFailed(format!("image url unreachable: {e}")))?
        }
        Ok(resp) => {
            return Err(ClipforgeError::DownloadFailed(format!(
                "image url returned status {}",
                resp.status()
            )))
        }
        Err(e) => return Err(ClipforgeError::DownloadFailed(format!("image url unreachable: {e}"))),
    };

    if response.status().is_success() {
        Ok(())
    } else {
        Err(ClipforgeError::DownloadFailed(format!(
            "image url returned status {}",
            response.status()
        )))
    }
}

/// Probes `url` per the §4.2 per-kind policy: audio/video fall back to a default duration on
/// probe failure; images skip ffprobe entirely and go through [`check_image_reachable`]
/// instead, which is fatal on failure.
pub async fn probe_with_fallback(
    ffprobe_path: &str,
    url: &str,
    kind: MediaKind,
    cache: &ProbeCache,
    http_client: &reqwest::Client,
) -> Result<ProbedMedia> {
    if kind == MediaKind::Image {
        check_image_reachable(http_client, url).await?;
        return Ok(ProbedMedia {
            duration_seconds: 0.0,
            format: String::new(),
            width: None,
            height: None,
            codec: None,
            bitrate: None,
        });
    }

    match cache.get_or_probe(ffprobe_path, url).await {
        Ok(media) => {
            check_dimensions(&media)?;
            Ok(media)
        }
        Err(e) => match kind {
            MediaKind::Audio => {
                warn!(url, error = %e, "audio probe failed, substituting default duration");
                Ok(ProbedMedia {
                    duration_seconds: DEFAULT_AUDIO_DURATION,
                    format: String::new(),
                    width: None,
                    height: None,
                    codec: None,
                    bitrate: None,
                })
            }
            MediaKind::Video => {
                warn!(url, error = %e, "video probe failed, substituting default duration");
                Ok(ProbedMedia {
                    duration_seconds: DEFAULT_VIDEO_DURATION,
                    format: String::new(),
                    width: None,
                    height: None,
                    codec: None,
                    bitrate: None,
                })
            }
            MediaKind::Image => unreachable!("image probing never reaches ffprobe"),
        },
    }
}
