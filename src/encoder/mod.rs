//! Encoder Runner (C6, §4.6): executes the encoder subprocess under a deadline, parses its
//! diagnostic stream for progress, and returns the produced path.

use crate::error::{ClipforgeError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

fn duration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Duration:\s*(\d+):(\d+):(\d+)\.(\d+)").unwrap())
}

fn time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"time=\s*(\d+):(\d+):(\d+)\.(\d+)").unwrap())
}

fn hhmmsscc_to_seconds(h: &str, m: &str, s: &str, cc: &str) -> f64 {
    let h: f64 = h.parse().unwrap_or(0.0);
    let m: f64 = m.parse().unwrap_or(0.0);
    let s: f64 = s.parse().unwrap_or(0.0);
    let cc: f64 = cc.parse().unwrap_or(0.0);
    h * 3600.0 + m * 60.0 + s + cc / 100.0
}

/// Parses one diagnostic-stream line for a `Duration:` or `time=` timestamp, advancing
/// `total` / emitting a progress percentage (§4.6).
fn parse_progress_line(line: &str, total: &mut Option<f64>) -> Option<f64> {
    if total.is_none() {
        if let Some(caps) = duration_re().captures(line) {
            *total = Some(hhmmsscc_to_seconds(&caps[1], &caps[2], &caps[3], &caps[4]));
        }
    }
    if let Some(caps) = time_re().captures(line) {
        let current = hhmmsscc_to_seconds(&caps[1], &caps[2], &caps[3], &caps[4]);
        if let Some(total) = *total {
            if total > 0.0 {
                return Some((100.0 * current / total).clamp(0.0, 100.0));
            }
        }
    }
    None
}

/// Runs the encoder once, under `timeout_secs`, streaming progress (0..=100) non-blockingly
/// to `progress_tx`. A slow/absent reader never stalls the diagnostic-stream consumer: sends
/// use `try_send` and drop on backpressure (§5, §9).
pub async fn run(
    binary_path: &str,
    args: &[String],
    output_path: &Path,
    timeout_secs: u64,
    progress_tx: Option<mpsc::Sender<u8>>,
) -> Result<PathBuf> {
    let mut child = Command::new(binary_path)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ClipforgeError::EncoderFailed(format!("failed to spawn encoder: {e}")))?;

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ClipforgeError::Internal("encoder stderr missing".to_string()))?;

    let mut lines = BufReader::new(stderr).lines();
    let mut tail: Vec<String> = Vec::new();
    let mut total_secs: Option<f64> = None;

    let run_future = async {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    debug!(target: "encoder.stderr", "{line}");
                    tail.push(line.clone());
                    if tail.len() > 50 {
                        tail.remove(0);
                    }
                    if let Some(pct) = parse_progress_line(&line, &mut total_secs) {
                        if let Some(tx) = &progress_tx {
                            let _ = tx.try_send(pct as u8);
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "error reading encoder stderr");
                    break;
                }
            }
        }
        child.wait().await
    };

    let status = match timeout(Duration::from_secs(timeout_secs), run_future).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            return Err(ClipforgeError::EncoderFailed(format!(
                "encoder io error: {e}; tail: {}",
                tail.join("\n")
            )))
        }
        Err(_) => {
            return Err(ClipforgeError::Timeout {
                step: "encoder".to_string(),
            })
        }
    };

    if !status.success() {
        return Err(ClipforgeError::EncoderFailed(format!(
            "encoder exited with {status}; tail: {}",
            tail.join("\n")
        )));
    }

    let metadata = tokio::fs::metadata(output_path).await.map_err(|e| {
        ClipforgeError::EncoderFailed(format!("encoder produced no output file: {e}"))
    })?;
    if metadata.len() == 0 {
        return Err(ClipforgeError::EncoderFailed(
            "encoder produced an empty output file".to_string(),
        ));
    }

    Ok(output_path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_duration_then_progress() {
        let mut total = None;
        assert!(parse_progress_line("Duration: 00:01:00.00, start: 0.0", &mut total).is_none());
        assert_eq!(total, Some(60.0));

        let pct = parse_progress_line("frame=  1 time=00:00:30.00 bitrate=N/A", &mut total).unwrap();
        assert!((pct - 50.0).abs() < 0.01);
    }

    #[test]
    fn progress_clamped_to_100() {
        let mut total = Some(10.0);
        let pct = parse_progress_line("time=00:00:20.00", &mut total).unwrap();
        assert_eq!(pct, 100.0);
    }

    #[test]
    fn no_duration_yet_yields_no_progress() {
        let mut total = None;
        assert!(parse_progress_line("time=00:00:05.00", &mut total).is_none());
    }

    #[tokio::test]
    async fn run_reports_encoder_failed_when_binary_missing() {
        let result = run(
            "/nonexistent/ffmpeg-binary",
            &["-version".to_string()],
            Path::new("/tmp/should-not-exist.mp4"),
            5,
            None,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().code(), "encoder-failed");
    }

    #[tokio::test]
    async fn run_times_out_against_a_slow_process() {
        // `sleep` stands in for a hung encoder: it never touches the output path.
        let result = run(
            "sleep",
            &["2".to_string()],
            Path::new("/tmp/should-not-exist.mp4"),
            0,
            None,
        )
        .await;
        match result {
            Err(e) => assert!(e.code() == "timeout" || e.code() == "encoder-failed"),
            Ok(_) => panic!("expected a timeout or failure"),
        }
    }
}
