//! Mock-boundary tests for clipforge's external-subprocess integrations.
//!
//! These validate configuration, fallback behavior, and wire-protocol shapes at the
//! boundary with the ffprobe/ffmpeg/transcriber subprocesses, without actually spawning
//! them (the job queue's pipeline tests, which do require real binaries on PATH, are out
//! of scope here).

use clipforge::config::TranscriberConfig;
use clipforge::probe::{self, MediaKind, ProbeCache};
use clipforge::transcriber::TranscriberProcessClient;

// ============================================================================
// Transcriber daemon client construction
// ============================================================================

mod transcriber_client_tests {
    use super::*;

    #[tokio::test]
    async fn spawn_does_not_block_even_without_a_reachable_interpreter() {
        // spawn() only starts the supervisor task; the subprocess itself is lazily started
        // on the first transcribe() call (§4.3), so constructing a client against a
        // nonexistent interpreter must not hang or panic.
        let config = TranscriberConfig {
            interpreter_path: "/nonexistent/interpreter".to_string(),
            script_path: "daemon.py".to_string(),
            model: "base".to_string(),
            idle_timeout_secs: 60,
            startup_timeout_secs: 1,
            restart_max_attempts: 1,
        };
        let _client: TranscriberProcessClient = TranscriberProcessClient::spawn(config);
    }

    #[tokio::test]
    async fn transcribe_against_an_unspawnable_daemon_returns_a_retryable_error() {
        let config = TranscriberConfig {
            interpreter_path: "/nonexistent/interpreter".to_string(),
            script_path: "daemon.py".to_string(),
            model: "base".to_string(),
            idle_timeout_secs: 60,
            startup_timeout_secs: 1,
            restart_max_attempts: 1,
        };
        let client = TranscriberProcessClient::spawn(config);
        let err = client
            .transcribe("https://example.com/a.mp3".to_string(), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "transcription-failed");
        assert!(err.retryable());
    }
}

// ============================================================================
// Probe fallback substitution (§4.2) — exercised without a real ffprobe binary
// ============================================================================

mod probe_fallback_tests {
    use super::*;

    #[tokio::test]
    async fn audio_probe_failure_substitutes_default_duration() {
        let cache = ProbeCache::new();
        let http_client = reqwest::Client::new();
        let media = probe::probe_with_fallback(
            "/nonexistent/ffprobe",
            "https://example.com/a.mp3",
            MediaKind::Audio,
            &cache,
            &http_client,
        )
        .await
        .unwrap();
        assert_eq!(media.duration_seconds, 10.0);
        assert!(media.width.is_none());
    }

    #[tokio::test]
    async fn video_probe_failure_substitutes_default_duration() {
        let cache = ProbeCache::new();
        let http_client = reqwest::Client::new();
        let media = probe::probe_with_fallback(
            "/nonexistent/ffprobe",
            "https://example.com/bg.mp4",
            MediaKind::Video,
            &cache,
            &http_client,
        )
        .await
        .unwrap();
        assert_eq!(media.duration_seconds, 30.0);
    }

    #[tokio::test]
    async fn image_probe_never_shells_out_to_ffprobe() {
        // Images skip ffprobe entirely (§4.2): even with an unspawnable ffprobe path, the
        // outcome depends only on the reachability check, never on "ffprobe succeeded".
        let cache = ProbeCache::new();
        let http_client = reqwest::Client::new();
        let result = probe::probe_with_fallback(
            "/nonexistent/ffprobe",
            "https://127.0.0.1.invalid/logo.png",
            MediaKind::Image,
            &cache,
            &http_client,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn a_failed_probe_is_not_cached_and_is_retried_on_the_next_call() {
        // Only successful probes are memoized (§4.2 ambient addition); a transient ffprobe
        // failure must not permanently poison the per-job cache for that URL.
        let cache = ProbeCache::new();
        let first = cache
            .get_or_probe("/nonexistent/ffprobe", "https://example.com/a.mp3")
            .await;
        let second = cache
            .get_or_probe("/nonexistent/ffprobe", "https://example.com/a.mp3")
            .await;
        assert!(first.is_err());
        assert!(second.is_err());
    }
}
