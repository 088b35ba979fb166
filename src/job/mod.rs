//! Job Queue & Worker Pool (C7, §4.7): in-memory job record store, bounded FIFO submission,
//! and cancellation plumbing. The worker loop and per-job pipeline live in [`queue`].

pub mod queue;

use crate::error::{ClipforgeError, Result};
use crate::model::{JobDescription, JobRecord, JobStatus};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

pub use queue::{JobQueue, PipelineDeps};

/// In-memory mapping from job id to record, guarded by a single coarse lock (§9 design note:
/// "persistence is a future concern"). Reads return owned copies so callers never hold the
/// lock across an `.await`.
#[derive(Clone, Default)]
pub struct JobStore {
    inner: Arc<Mutex<HashMap<String, JobRecord>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, description: JobDescription) -> JobRecord {
        let id = Uuid::new_v4().simple().to_string();
        let record = JobRecord::new(id, description);
        self.inner
            .lock()
            .await
            .insert(record.id.clone(), record.clone());
        record
    }

    pub async fn get(&self, id: &str) -> Result<JobRecord> {
        self.inner
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ClipforgeError::JobNotFound(id.to_string()))
    }

    pub async fn remove(&self, id: &str) {
        self.inner.lock().await.remove(id);
    }

    /// Transitions status, refusing any move out of a terminal state (§8 soundness property).
    pub async fn set_status(&self, id: &str, status: JobStatus) -> Result<()> {
        let mut map = self.inner.lock().await;
        let record = map
            .get_mut(id)
            .ok_or_else(|| ClipforgeError::JobNotFound(id.to_string()))?;
        if record.status.is_terminal() {
            return Ok(());
        }
        record.status = status;
        record.updated_at = SystemTime::now();
        if status.is_terminal() {
            record.completed_at = Some(record.updated_at);
        }
        Ok(())
    }

    /// Progress is monotonically non-decreasing while a job is `processing` (§3 invariant).
    pub async fn set_progress(&self, id: &str, progress: u8) {
        let mut map = self.inner.lock().await;
        if let Some(record) = map.get_mut(id) {
            if record.status == JobStatus::Processing && progress >= record.progress {
                record.progress = progress.min(100);
                record.updated_at = SystemTime::now();
            }
        }
    }

    pub async fn set_completed(&self, id: &str, artifact_id: String) -> Result<()> {
        let mut map = self.inner.lock().await;
        let record = map
            .get_mut(id)
            .ok_or_else(|| ClipforgeError::JobNotFound(id.to_string()))?;
        if record.status.is_terminal() {
            return Ok(());
        }
        record.status = JobStatus::Completed;
        record.progress = 100;
        record.artifact_id = Some(artifact_id);
        let now = SystemTime::now();
        record.updated_at = now;
        record.completed_at = Some(now);
        Ok(())
    }

    pub async fn set_failed(&self, id: &str, error: &ClipforgeError) -> Result<()> {
        let mut map = self.inner.lock().await;
        let record = map
            .get_mut(id)
            .ok_or_else(|| ClipforgeError::JobNotFound(id.to_string()))?;
        if record.status.is_terminal() {
            return Ok(());
        }
        record.status = JobStatus::Failed;
        record.error = Some(error.sanitized_message());
        record.error_code = Some(error.code());
        let now = SystemTime::now();
        record.updated_at = now;
        record.completed_at = Some(now);
        Ok(())
    }
}

/// Per-job cancellation signal. `true` once cancellation has been requested; a worker checks
/// this at every stage boundary and whenever it is suspended on a subprocess (§4.7, §5).
#[derive(Clone)]
pub struct CancellationToken {
    rx: watch::Receiver<bool>,
}

impl CancellationToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves immediately if already cancelled; otherwise waits for the next cancel signal.
    pub async fn cancelled(&mut self) {
        if self.is_cancelled() {
            return;
        }
        let _ = self.rx.changed().await;
    }
}

pub struct CancellationHandle {
    tx: watch::Sender<bool>,
}

impl CancellationHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

pub fn cancellation_pair() -> (CancellationHandle, CancellationToken) {
    let (tx, rx) = watch::channel(false);
    (CancellationHandle { tx }, CancellationToken { rx })
}

/// Registry of outstanding cancellation handles, one per in-flight (pending or processing) job.
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    inner: Arc<Mutex<HashMap<String, CancellationHandle>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, id: String, handle: CancellationHandle) {
        self.inner.lock().await.insert(id, handle);
    }

    pub async fn cancel(&self, id: &str) -> bool {
        if let Some(handle) = self.inner.lock().await.get(id) {
            handle.cancel();
            true
        } else {
            false
        }
    }

    pub async fn remove(&self, id: &str) {
        self.inner.lock().await.remove(id);
    }
}
