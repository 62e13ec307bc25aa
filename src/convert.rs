//! The conversion orchestrator: one job from extracted text to finished video.
//!
//! A run walks the job through `processing` into `complete` or `error`,
//! writing a progress checkpoint to the [`JobStore`] at every band boundary:
//!
//! ```text
//!   0  processing
//!  10  text normalised, chunked, workspace ready
//!  ..  10 + round(p * 0.6) after each synthesized chunk
//!  70  synthesis done
//!  80  audio assembled and probed (audio path, duration)
//!  99  video rendered (video path)
//! 100  complete
//! ```
//!
//! A stage failure is recorded on the job (status `error`, message verbatim,
//! progress left where it was) and the run still returns `Ok` with the failed
//! job. `Err` means the run could not be carried out at all: an unknown job,
//! a second run on the same job, or a broken store. A store failure mid-run
//! stops the run at once and is still recorded on the job if the store
//! accepts the write.

use crate::config::{PipelineConfig, TtsOptions};
use crate::error::{AudiobookError, StoreError, SynthesisError};
use crate::job::{ConversionJob, JobId, JobPatch, JobStatus};
use crate::pipeline::chunk::split_into_chunks;
use crate::pipeline::media::{FfmpegToolkit, MediaToolkit};
use crate::pipeline::normalize::normalize_for_speech;
use crate::pipeline::synth::{OpenAiSpeechProvider, SpeechProvider, Synthesizer};
use crate::progress::{synthesis_progress, JobProgressCallback, NoopProgressCallback, Stage};
use crate::store::JobStore;
use crate::workspace::{remove_files_best_effort, JobWorkspace};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

/// Runs conversion jobs. Cheap to clone; clones share the running-job set.
#[derive(Clone)]
pub struct ConversionOrchestrator {
    config: Arc<PipelineConfig>,
    store: Arc<dyn JobStore>,
    synthesizer: Synthesizer,
    media: Arc<dyn MediaToolkit>,
    callback: Arc<dyn JobProgressCallback>,
    active: Arc<Mutex<HashSet<JobId>>>,
}

impl ConversionOrchestrator {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn JobStore>,
        provider: Arc<dyn SpeechProvider>,
        media: Arc<dyn MediaToolkit>,
    ) -> Self {
        let callback: Arc<dyn JobProgressCallback> = config
            .progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgressCallback));
        Self {
            config: Arc::new(config),
            store,
            synthesizer: Synthesizer::new(provider),
            media,
            callback,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Wire the OpenAI provider and ffmpeg from `config`.
    pub fn from_config(
        config: PipelineConfig,
        store: Arc<dyn JobStore>,
    ) -> Result<Self, AudiobookError> {
        let provider = Arc::new(OpenAiSpeechProvider::from_config(&config.tts)?);
        let media = Arc::new(FfmpegToolkit::new(config.media.clone()));
        Ok(Self::new(config, store, provider, media))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Whether a run for `id` is in flight on this orchestrator.
    pub fn is_running(&self, id: JobId) -> bool {
        lock(&self.active).contains(&id)
    }

    /// Convert `text` for job `id` and return the job in its terminal state.
    pub async fn run(
        &self,
        id: JobId,
        text: &str,
        options: TtsOptions,
    ) -> Result<ConversionJob, AudiobookError> {
        let guard = self.claim(id)?;
        self.run_claimed(guard, text, options).await
    }

    /// Start the run on a tokio task.
    ///
    /// The job is claimed before this returns, so a second `spawn` or `run`
    /// for the same id fails immediately with
    /// [`AudiobookError::AlreadyRunning`].
    pub fn spawn(
        &self,
        id: JobId,
        text: String,
        options: TtsOptions,
    ) -> Result<JobHandle, AudiobookError> {
        let guard = self.claim(id)?;
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run_claimed(guard, &text, options).await });
        Ok(JobHandle { handle })
    }

    fn claim(&self, id: JobId) -> Result<ActiveGuard, AudiobookError> {
        if !lock(&self.active).insert(id) {
            return Err(AudiobookError::AlreadyRunning(id));
        }
        Ok(ActiveGuard {
            active: Arc::clone(&self.active),
            id,
        })
    }

    async fn run_claimed(
        &self,
        guard: ActiveGuard,
        text: &str,
        options: TtsOptions,
    ) -> Result<ConversionJob, AudiobookError> {
        let id = guard.id;
        let span = info_span!("conversion_job", job_id = %id);

        async move {
            let job = self
                .store
                .get(id)
                .await?
                .ok_or(AudiobookError::JobNotFound(id))?;
            if job.status.is_terminal() {
                return Err(AudiobookError::AlreadyFinished(id));
            }

            let started = Instant::now();
            let tracker = ProgressTracker::new(&job, self.store.as_ref(), self.callback.as_ref());

            let result = match self.execute(&job, &tracker, text, &options).await {
                Ok(done) => Ok(done),
                Err(AudiobookError::Store(e)) => {
                    let error = AudiobookError::Store(e);
                    if let Err(e) = self.fail(id, &error).await {
                        warn!("Could not record failure on job: {}", e);
                        self.callback.on_job_error(id, &error.to_string());
                    }
                    Err(error)
                }
                Err(stage_error) => self.fail(id, &stage_error).await,
            };

            if let Ok(ref finished) = result {
                info!(
                    status = %finished.status,
                    progress = finished.progress,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Conversion run finished"
                );
            }
            drop(guard);
            result
        }
        .instrument(span)
        .await
    }

    /// Record a stage failure on the job.
    async fn fail(
        &self,
        id: JobId,
        error: &AudiobookError,
    ) -> Result<ConversionJob, AudiobookError> {
        let message = error.to_string();
        warn!("Conversion failed: {}", message);
        let job = self.store.update(id, JobPatch::failed(&message)).await?;
        self.callback.on_job_error(id, &message);
        Ok(job)
    }

    async fn execute(
        &self,
        job: &ConversionJob,
        tracker: &ProgressTracker<'_>,
        text: &str,
        options: &TtsOptions,
    ) -> Result<ConversionJob, AudiobookError> {
        let id = job.id;

        // ── Stage 1: Initialise ──────────────────────────────────────────
        tracker.stage(Stage::Initializing);
        tracker
            .advance(
                Stage::Initializing,
                0,
                JobPatch::default().status(JobStatus::Processing),
            )
            .await?;

        let speakable = normalize_for_speech(text);
        let chunks = split_into_chunks(&speakable, self.config.max_chunk_chars);
        if chunks.is_empty() {
            return Err(SynthesisError::NoSpeakableText.into());
        }
        info!(
            "Normalised {} → {} chars, {} chunks",
            text.chars().count(),
            speakable.chars().count(),
            chunks.len()
        );

        let workspace = JobWorkspace::new(&self.config.work_dir, id);
        workspace.prepare().await?;
        self.callback.on_job_start(id, chunks.len());
        tracker
            .advance(Stage::Initializing, 10, JobPatch::default())
            .await?;

        // ── Stage 2: Synthesize ──────────────────────────────────────────
        tracker.stage(Stage::Synthesizing);
        let callback = self.callback.as_ref();
        let synthesized = self
            .synthesizer
            .synthesize_chunks(&chunks, options, workspace.audio_dir(), move |p| async move {
                callback.on_chunk_complete(id, p.index, p.total);
                tracker
                    .advance(
                        Stage::Synthesizing,
                        synthesis_progress(p.percent()),
                        JobPatch::default(),
                    )
                    .await?;
                Ok::<_, AudiobookError>(())
            })
            .await;
        let segments = match synthesized {
            Ok(segments) => segments,
            Err(e @ AudiobookError::Store(_)) => {
                let written: Vec<_> = chunks.iter().map(|c| workspace.chunk_path(c.index)).collect();
                let removed = remove_files_best_effort(&written).await;
                debug!("Removed {} chunk files after store failure", removed);
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        tracker
            .advance(Stage::Synthesizing, 70, JobPatch::default())
            .await?;

        // ── Stage 3: Assemble + probe ────────────────────────────────────
        tracker.stage(Stage::Assembling);
        let audio_path = workspace.complete_audio_path();
        let assembled = self.media.concat(&segments, &audio_path).await;
        // The chunks are spent whether or not the concat worked.
        let removed = remove_files_best_effort(&segments).await;
        debug!("Removed {}/{} chunk files", removed, segments.len());
        assembled?;

        let duration = self.media.probe_duration(&audio_path).await?;
        tracker
            .advance(
                Stage::Assembling,
                80,
                JobPatch::default()
                    .audio_path(&audio_path)
                    .duration_secs(duration),
            )
            .await?;

        // ── Stage 4: Mux ─────────────────────────────────────────────────
        tracker.stage(Stage::Muxing);
        let video_path = self
            .media
            .render_video(&audio_path, &job.label(), workspace.video_path(), duration)
            .await?;
        tracker
            .advance(Stage::Muxing, 99, JobPatch::default().video_path(&video_path))
            .await?;

        // ── Stage 5: Finalise ────────────────────────────────────────────
        tracker.stage(Stage::Finalizing);
        let done = tracker
            .advance(
                Stage::Finalizing,
                100,
                JobPatch::default()
                    .status(JobStatus::Complete)
                    .video_path(&video_path)
                    .duration_secs(duration),
            )
            .await?;
        self.callback.on_job_complete(&done);
        Ok(done)
    }
}

/// Handle to a spawned run.
pub struct JobHandle {
    handle: JoinHandle<Result<ConversionJob, AudiobookError>>,
}

impl JobHandle {
    /// Wait for the run to reach a terminal state.
    pub async fn wait(self) -> Result<ConversionJob, AudiobookError> {
        self.handle
            .await
            .map_err(|e| AudiobookError::Internal(format!("Conversion task failed: {}", e)))?
    }
}

/// Releases a claimed job id when the run ends, however it ends.
struct ActiveGuard {
    active: Arc<Mutex<HashSet<JobId>>>,
    id: JobId,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.id);
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Writes progress checkpoints, never lower than the last one written.
struct ProgressTracker<'a> {
    id: JobId,
    store: &'a dyn JobStore,
    callback: &'a dyn JobProgressCallback,
    last: AtomicU8,
}

impl<'a> ProgressTracker<'a> {
    fn new(job: &ConversionJob, store: &'a dyn JobStore, callback: &'a dyn JobProgressCallback) -> Self {
        Self {
            id: job.id,
            store,
            callback,
            last: AtomicU8::new(job.progress),
        }
    }

    fn stage(&self, stage: Stage) {
        debug!("Entering stage {}", stage);
        self.callback.on_stage(self.id, stage);
    }

    async fn advance(
        &self,
        stage: Stage,
        percent: u8,
        patch: JobPatch,
    ) -> Result<ConversionJob, StoreError> {
        let percent = percent.min(100).max(self.last.load(Ordering::SeqCst));
        let job = self
            .store
            .update(
                self.id,
                JobPatch {
                    progress: Some(percent),
                    ..patch
                },
            )
            .await?;
        self.last.store(percent, Ordering::SeqCst);
        self.callback.on_progress(self.id, stage, percent);
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AssemblyError, MuxError, ProbeError};
    use crate::job::NewJob;
    use crate::pipeline::synth::SpeechRequest;
    use crate::store::MemoryJobStore;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};

    struct Beep;

    #[async_trait]
    impl SpeechProvider for Beep {
        fn name(&self) -> &str {
            "beep"
        }

        async fn synthesize(&self, _r: &SpeechRequest) -> Result<Vec<u8>, SynthesisError> {
            Ok(b"ID3".to_vec())
        }
    }

    struct Touch;

    #[async_trait]
    impl MediaToolkit for Touch {
        async fn concat(&self, _s: &[PathBuf], output: &Path) -> Result<PathBuf, AssemblyError> {
            tokio::fs::write(output, b"mp3").await.unwrap();
            Ok(output.to_path_buf())
        }

        async fn probe_duration(&self, _audio: &Path) -> Result<f64, ProbeError> {
            Ok(3.0)
        }

        async fn render_video(
            &self,
            _audio: &Path,
            _label: &str,
            output: &Path,
            _d: f64,
        ) -> Result<PathBuf, MuxError> {
            tokio::fs::write(output, b"mp4").await.unwrap();
            Ok(output.to_path_buf())
        }
    }

    async fn setup(dir: &Path) -> (ConversionOrchestrator, Arc<MemoryJobStore>, JobId) {
        let store = Arc::new(MemoryJobStore::new());
        let job = store
            .create(NewJob::new("u1", "book.pdf", dir.join("book.pdf"), TtsOptions::default()))
            .await
            .unwrap();
        let config = PipelineConfig::builder().work_dir(dir).build().unwrap();
        let orchestrator =
            ConversionOrchestrator::new(config, store.clone(), Arc::new(Beep), Arc::new(Touch));
        (orchestrator, store, job.id)
    }

    #[tokio::test]
    async fn unknown_job_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let (orchestrator, _, _) = setup(tmp.path()).await;
        let err = orchestrator
            .run(JobId::new(), "Hello.", TtsOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AudiobookError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn successful_run_releases_the_claim() {
        let tmp = tempfile::tempdir().unwrap();
        let (orchestrator, _, id) = setup(tmp.path()).await;
        let job = orchestrator
            .run(id, "Hello there. General Kenobi.", TtsOptions::default())
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.progress, 100);
        assert!(!orchestrator.is_running(id));
    }

    #[tokio::test]
    async fn finished_job_cannot_be_rerun() {
        let tmp = tempfile::tempdir().unwrap();
        let (orchestrator, _, id) = setup(tmp.path()).await;
        orchestrator
            .run(id, "Once.", TtsOptions::default())
            .await
            .unwrap();
        let err = orchestrator
            .run(id, "Twice.", TtsOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AudiobookError::AlreadyFinished(_)));
    }

    #[tokio::test]
    async fn unspeakable_text_fails_the_job() {
        let tmp = tempfile::tempdir().unwrap();
        let (orchestrator, store, id) = setup(tmp.path()).await;
        let job = orchestrator
            .run(id, " ★ ☆ \n ", TtsOptions::default())
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.progress, 0);
        assert!(job
            .error_message
            .as_deref()
            .unwrap()
            .contains("no speakable text"));
        assert_eq!(store.get(id).await.unwrap().unwrap(), job);
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let tmp = tempfile::tempdir().unwrap();
        let (orchestrator, _, id) = setup(tmp.path()).await;
        let guard = orchestrator.claim(id).unwrap();
        assert!(orchestrator.is_running(id));
        assert!(matches!(
            orchestrator.claim(id),
            Err(AudiobookError::AlreadyRunning(_))
        ));
        drop(guard);
        assert!(!orchestrator.is_running(id));
    }
}
