//! Supervised transcriber daemon subprocess: spawn, ready handshake, request dispatch by id,
//! restart with backoff, idle shutdown (§4.3).
//!
//! Follows a spawn-and-read-lines idiom for driving a subprocess over stdio, generalized from a
//! one-shot invocation to a long-lived supervised daemon, plus an `id → waiter` map for
//! dispatching concurrent requests against a single stdin/stdout pipe.

use crate::config::TranscriberConfig;
use crate::error::{ClipforgeError, Result};
use crate::transcriber::protocol::{Request, Response, READY_SENTINEL};
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Stopped,
    Starting,
    Idle,
    Busy,
    Stopping,
    Failed,
}

enum ReaderMsg {
    Ready,
    Response(Response),
    Closed,
}

struct RunningProcess {
    child: Child,
    stdin: ChildStdin,
    reader_rx: mpsc::Receiver<ReaderMsg>,
    waiters: HashMap<String, oneshot::Sender<Result<Response>>>,
}

async fn reader_task(stdout: tokio::process::ChildStdout, tx: mpsc::Sender<ReaderMsg>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if trimmed == READY_SENTINEL {
                    if tx.send(ReaderMsg::Ready).await.is_err() {
                        return;
                    }
                    continue;
                }
                match serde_json::from_str::<Response>(trimmed) {
                    Ok(resp) => {
                        if tx.send(ReaderMsg::Response(resp)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!(error = %e, line = trimmed, "unparsable transcriber line"),
                }
            }
            Ok(None) => {
                let _ = tx.send(ReaderMsg::Closed).await;
                return;
            }
            Err(e) => {
                warn!(error = %e, "error reading transcriber stdout");
                let _ = tx.send(ReaderMsg::Closed).await;
                return;
            }
        }
    }
}

async fn stderr_logger_task(stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "transcriber.stderr", "{line}");
    }
}

async fn spawn_daemon(config: &TranscriberConfig) -> Result<RunningProcess> {
    let mut child = tokio::process::Command::new(&config.interpreter_path)
        .arg(&config.script_path)
        .arg("--model")
        .arg(&config.model)
        .arg("--idle-timeout")
        .arg(config.idle_timeout_secs.to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ClipforgeError::TranscriptionFailed(format!("failed to spawn daemon: {e}")))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| ClipforgeError::Internal("daemon stdin missing".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ClipforgeError::Internal("daemon stdout missing".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ClipforgeError::Internal("daemon stderr missing".to_string()))?;

    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(reader_task(stdout, tx));
    tokio::spawn(stderr_logger_task(stderr));

    Ok(RunningProcess {
        child,
        stdin,
        reader_rx: rx,
        waiters: HashMap::new(),
    })
}

async fn wait_for_ready(process: &mut RunningProcess, startup_timeout_secs: u64) -> Result<()> {
    match timeout(Duration::from_secs(startup_timeout_secs), process.reader_rx.recv()).await {
        Ok(Some(ReaderMsg::Ready)) => Ok(()),
        Ok(Some(_)) | Ok(None) => Err(ClipforgeError::TranscriptionFailed(
            "daemon closed before signaling ready".to_string(),
        )),
        Err(_) => Err(ClipforgeError::Timeout {
            step: "transcriber-startup".to_string(),
        }),
    }
}

enum ClientCommand {
    Transcribe {
        url: String,
        language: Option<String>,
        respond_to: oneshot::Sender<Result<Response>>,
    },
    Shutdown,
}

/// Handle to a supervised transcriber daemon. Cloning shares the same underlying process.
#[derive(Clone)]
pub struct TranscriberProcessClient {
    tx: mpsc::Sender<ClientCommand>,
    restart_max_attempts: u32,
}

impl TranscriberProcessClient {
    pub fn spawn(config: TranscriberConfig) -> Self {
        let restart_max_attempts = config.restart_max_attempts;
        let (tx, rx) = mpsc::channel(128);
        tokio::spawn(supervisor_loop(config, rx));
        Self {
            tx,
            restart_max_attempts,
        }
    }

    /// Sends one transcribe request and awaits its matched response, transparently retrying
    /// against a freshly-restarted daemon (§4.3 restart policy) if the daemon died while the
    /// request was outstanding. Only retryable errors are retried; a request that fails for a
    /// non-daemon reason (e.g. the engine itself rejecting the audio) is not retried.
    pub async fn transcribe(&self, url: String, language: Option<String>) -> Result<Response> {
        let mut last_err = None;
        for attempt in 0..=self.restart_max_attempts {
            if attempt > 0 {
                debug!(attempt, "retrying transcription request after daemon restart");
            }
            match self.transcribe_once(url.clone(), language.clone()).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.retryable() => last_err = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            ClipforgeError::TranscriptionFailed("restart budget exhausted".to_string())
        }))
    }

    async fn transcribe_once(&self, url: String, language: Option<String>) -> Result<Response> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(ClientCommand::Transcribe {
                url,
                language,
                respond_to,
            })
            .await
            .map_err(|_| ClipforgeError::TranscriptionFailed("daemon supervisor gone".to_string()))?;
        rx.await
            .map_err(|_| ClipforgeError::TranscriptionFailed("daemon dropped request".to_string()))?
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(ClientCommand::Shutdown).await;
    }
}

async fn kill_process(process: &mut RunningProcess, reason: &str, code: Option<&'static str>) {
    for (_, waiter) in process.waiters.drain() {
        let _ = waiter.send(Err(ClipforgeError::TranscriptionFailed(format!(
            "{}: {}",
            code.unwrap_or("daemon"),
            reason
        ))));
    }
    let _ = process.child.start_kill();
}

async fn supervisor_loop(config: TranscriberConfig, mut rx: mpsc::Receiver<ClientCommand>) {
    let mut state = DaemonState::Stopped;
    let mut process: Option<RunningProcess> = None;
    let mut attempt: u32 = 0;
    let idle_timeout = Duration::from_secs(config.idle_timeout_secs);

    loop {
        let idle_sleep = tokio::time::sleep(idle_timeout);
        tokio::select! {
            cmd = rx.recv() => {
                match cmd {
                    Some(ClientCommand::Transcribe { url, language, respond_to }) => {
                        if process.is_none() {
                            state = DaemonState::Starting;
                            match spawn_daemon(&config).await {
                                Ok(mut p) => match wait_for_ready(&mut p, config.startup_timeout_secs).await {
                                    Ok(()) => {
                                        attempt = 0;
                                        process = Some(p);
                                        state = DaemonState::Idle;
                                    }
                                    Err(e) => {
                                        state = DaemonState::Failed;
                                        let _ = respond_to.send(Err(e));
                                        attempt += 1;
                                        backoff_if_needed(&config, &mut attempt).await;
                                        continue;
                                    }
                                },
                                Err(e) => {
                                    state = DaemonState::Failed;
                                    let _ = respond_to.send(Err(e));
                                    attempt += 1;
                                    backoff_if_needed(&config, &mut attempt).await;
                                    continue;
                                }
                            }
                        }

                        let id = Uuid::new_v4().to_string();
                        let req = Request::transcribe(id.clone(), url, language);
                        let line = match serde_json::to_string(&req) {
                            Ok(mut s) => { s.push('\n'); s }
                            Err(e) => {
                                let _ = respond_to.send(Err(ClipforgeError::Internal(format!("encode request: {e}"))));
                                continue;
                            }
                        };

                        if let Some(p) = process.as_mut() {
                            state = DaemonState::Busy;
                            if let Err(e) = p.stdin.write_all(line.as_bytes()).await {
                                warn!(error = %e, "daemon write failed, will restart");
                                kill_process(p, "write failed", None).await;
                                process = None;
                                state = DaemonState::Failed;
                                let _ = respond_to.send(Err(ClipforgeError::TranscriptionFailed(
                                    "daemon write failed".to_string(),
                                )));
                            } else {
                                p.waiters.insert(id, respond_to);
                            }
                        }
                    }
                    Some(ClientCommand::Shutdown) | None => {
                        if let Some(mut p) = process.take() {
                            state = DaemonState::Stopping;
                            let shutdown_req = Request::Shutdown { id: Uuid::new_v4().to_string() };
                            if let Ok(s) = serde_json::to_string(&shutdown_req) {
                                let _ = p.stdin.write_all(format!("{s}\n").as_bytes()).await;
                            }
                            let _ = p.child.start_kill();
                        }
                        state = DaemonState::Stopped;
                        info!("transcriber daemon supervisor shutting down");
                        return;
                    }
                }
            }

            maybe_msg = recv_from_process(&mut process), if process.is_some() => {
                match maybe_msg {
                    Some(ReaderMsg::Response(resp)) => {
                        if let Some(p) = process.as_mut() {
                            if let Some(waiter) = p.waiters.remove(&resp.id) {
                                let _ = waiter.send(Ok(resp));
                            }
                            if p.waiters.is_empty() {
                                state = DaemonState::Idle;
                            }
                        }
                    }
                    Some(ReaderMsg::Ready) => {}
                    Some(ReaderMsg::Closed) | None => {
                        if let Some(mut p) = process.take() {
                            error!("transcriber daemon process exited unexpectedly");
                            kill_process(&mut p, "process exited", Some("transcription-failed")).await;
                        }
                        state = DaemonState::Failed;
                    }
                }
            }

            _ = idle_sleep, if state == DaemonState::Idle => {
                if let Some(mut p) = process.take() {
                    info!("transcriber daemon idle timeout reached, shutting down");
                    let shutdown_req = Request::Shutdown { id: Uuid::new_v4().to_string() };
                    if let Ok(s) = serde_json::to_string(&shutdown_req) {
                        let _ = p.stdin.write_all(format!("{s}\n").as_bytes()).await;
                    }
                    let _ = p.child.start_kill();
                }
                state = DaemonState::Stopped;
            }
        }
    }
}

async fn recv_from_process(process: &mut Option<RunningProcess>) -> Option<ReaderMsg> {
    match process {
        Some(p) => p.reader_rx.recv().await,
        None => None,
    }
}

async fn backoff_if_needed(config: &TranscriberConfig, attempt: &mut u32) {
    if *attempt > config.restart_max_attempts {
        warn!(attempt, "transcriber daemon restart budget exhausted");
        return;
    }
    let backoff_secs = 2u64.saturating_pow(*attempt);
    tokio::time::sleep(Duration::from_secs(backoff_secs.min(60))).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_state_transitions_are_named_per_spec() {
        let states = [
            DaemonState::Stopped,
            DaemonState::Starting,
            DaemonState::Idle,
            DaemonState::Busy,
            DaemonState::Stopping,
            DaemonState::Failed,
        ];
        assert_eq!(states.len(), 6);
    }

    /// Scenario 5 (§8): a request outstanding when the daemon dies retries against a freshly
    /// respawned one and succeeds, within `restart_max_attempts`. The fake daemon here is a
    /// `sh` script that echoes `READY`, then (on its first spawn only) dies the instant it
    /// reads the request line, forcing the client down the restart path deterministically —
    /// the script always blocks on `read` until the request arrives, so this isn't a race
    /// against the writer side.
    #[tokio::test]
    async fn transcribe_retries_against_respawned_daemon_after_first_spawn_dies() {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        if !std::path::Path::new("/bin/sh").exists() {
            eprintln!("Skipping test: /bin/sh not available");
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        let script_path = dir.path().join("fake_daemon.sh");
        let count_path = dir.path().join("attempt_count");

        // invoked as `sh <script> --model <count-file> --idle-timeout <n>`, so $2 is our
        // attempt counter file, stashed there since spawn_daemon's arg shape is fixed.
        let script = r#"#!/bin/sh
COUNT_FILE="$2"
ATTEMPT=$(cat "$COUNT_FILE" 2>/dev/null || echo 0)
ATTEMPT=$((ATTEMPT+1))
echo "$ATTEMPT" > "$COUNT_FILE"
echo READY
while IFS= read -r line; do
    if [ "$ATTEMPT" -lt 2 ]; then
        exit 1
    fi
    id=$(printf '%s' "$line" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
    printf '{"success":true,"id":"%s","text":"hello"}\n' "$id"
done
"#;
        let mut file = std::fs::File::create(&script_path).unwrap();
        file.write_all(script.as_bytes()).unwrap();
        drop(file);
        std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = TranscriberConfig {
            interpreter_path: "sh".to_string(),
            script_path: script_path.to_string_lossy().to_string(),
            model: count_path.to_string_lossy().to_string(),
            idle_timeout_secs: 300,
            startup_timeout_secs: 5,
            restart_max_attempts: 3,
        };

        let client = TranscriberProcessClient::spawn(config);
        let response = timeout(
            Duration::from_secs(15),
            client.transcribe("https://example.com/a.mp3".to_string(), None),
        )
        .await
        .expect("retry should resolve well within the test timeout")
        .expect("transcription should succeed once the daemon respawns");

        assert!(response.success);
        assert_eq!(response.text.as_deref(), Some("hello"));
    }
}
