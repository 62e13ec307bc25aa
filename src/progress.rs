//! Progress bands and observer hooks for conversion jobs.
//!
//! A run moves through five [`Stage`]s, each owning a fixed slice of the
//! 0–100 scale:
//!
//! | Stage | Band |
//! |---|---|
//! | [`Stage::Initializing`] | 0–10 |
//! | [`Stage::Synthesizing`] | 10–70 |
//! | [`Stage::Assembling`] | 70–80 |
//! | [`Stage::Muxing`] | 80–99 |
//! | [`Stage::Finalizing`] | 100 |
//!
//! Inject an [`Arc<dyn JobProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to observe a
//! run as it happens. The same values are persisted on the job record, so a
//! polling reader and an observer always agree.
//!
//! # Example
//!
//! ```rust
//! use pdf2audiobook::{JobId, JobProgressCallback, PipelineConfig, Stage};
//! use std::sync::{Arc, atomic::{AtomicU8, Ordering}};
//!
//! struct LastPercent(AtomicU8);
//!
//! impl JobProgressCallback for LastPercent {
//!     fn on_progress(&self, _job: JobId, _stage: Stage, percent: u8) {
//!         self.0.store(percent, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(LastPercent(AtomicU8::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::job::{ConversionJob, JobId};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

/// One phase of a conversion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initializing,
    Synthesizing,
    Assembling,
    Muxing,
    Finalizing,
}

impl Stage {
    /// Inclusive `(start, end)` percentages of this stage's band.
    pub const fn band(self) -> (u8, u8) {
        match self {
            Stage::Initializing => (0, 10),
            Stage::Synthesizing => (10, 70),
            Stage::Assembling => (70, 80),
            Stage::Muxing => (80, 99),
            Stage::Finalizing => (100, 100),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Initializing => "initializing",
            Stage::Synthesizing => "synthesizing",
            Stage::Assembling => "assembling",
            Stage::Muxing => "muxing",
            Stage::Finalizing => "finalizing",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map synthesis sub-progress `p ∈ [0, 100]` onto the overall scale:
/// `10 + round(p * 0.6)`.
pub fn synthesis_progress(p: f64) -> u8 {
    let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 100.0) };
    let (start, _) = Stage::Synthesizing.band();
    start + (p * 0.6).round() as u8
}

/// Percentage of chunks completed, as reported by the synthesizer.
pub fn batch_percent(completed: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    completed as f64 / total as f64 * 100.0
}

/// Called by the orchestrator as a job advances.
///
/// Implementations must be `Send + Sync`; different jobs run on different
/// tokio tasks and may report concurrently. Events for a single job arrive in
/// order. All methods default to no-ops.
pub trait JobProgressCallback: Send + Sync {
    /// The run has started and the text was split into `total_chunks`.
    fn on_job_start(&self, job_id: JobId, total_chunks: usize) {
        let _ = (job_id, total_chunks);
    }

    /// The job entered a new stage.
    fn on_stage(&self, job_id: JobId, stage: Stage) {
        let _ = (job_id, stage);
    }

    /// A chunk's audio was written.
    ///
    /// # Arguments
    /// * `index` — 0-based chunk index
    /// * `total` — number of chunks in the batch
    fn on_chunk_complete(&self, job_id: JobId, index: usize, total: usize) {
        let _ = (job_id, index, total);
    }

    /// The persisted progress moved to `percent`.
    fn on_progress(&self, job_id: JobId, stage: Stage, percent: u8) {
        let _ = (job_id, stage, percent);
    }

    /// The job reached `complete`.
    fn on_job_complete(&self, job: &ConversionJob) {
        let _ = job;
    }

    /// The job reached `error` with this message.
    fn on_job_error(&self, job_id: JobId, error: &str) {
        let _ = (job_id, error);
    }
}

/// Default when no callback is configured.
pub struct NoopProgressCallback;

impl JobProgressCallback for NoopProgressCallback {}

/// Type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn JobProgressCallback>;

// ── Broadcast adapter ────────────────────────────────────────────────────

/// Observer events in transport-neutral form.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Started { job_id: JobId, total_chunks: usize },
    StageChanged { job_id: JobId, stage: Stage },
    ChunkComplete { job_id: JobId, index: usize, total: usize },
    Progress { job_id: JobId, stage: Stage, percent: u8 },
    Completed { job_id: JobId, duration_secs: Option<f64> },
    Failed { job_id: JobId, message: String },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Started { job_id, .. }
            | JobEvent::StageChanged { job_id, .. }
            | JobEvent::ChunkComplete { job_id, .. }
            | JobEvent::Progress { job_id, .. }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::Failed { job_id, .. } => *job_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Completed { .. } | JobEvent::Failed { .. })
    }
}

/// Republishes every callback as a [`JobEvent`] on a broadcast channel.
///
/// Sending never blocks the run. A subscriber that falls more than
/// `capacity` events behind misses the oldest ones.
#[derive(Clone)]
pub struct ChannelProgressCallback {
    tx: broadcast::Sender<JobEvent>,
}

impl ChannelProgressCallback {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    /// All events, skipping any the subscriber lagged past.
    pub fn stream(&self) -> impl Stream<Item = JobEvent> + Send + 'static {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|r| r.ok())
    }

    /// Events of one job, ending with its terminal event.
    pub fn job_stream(&self, job_id: JobId) -> impl Stream<Item = JobEvent> + Send + 'static {
        let rx = self.tx.subscribe();
        futures::stream::unfold((rx, false), move |(mut rx, finished)| async move {
            if finished {
                return None;
            }
            loop {
                match rx.recv().await {
                    Ok(event) if event.job_id() == job_id => {
                        let terminal = event.is_terminal();
                        return Some((event, (rx, terminal)));
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return None,
                }
            }
        })
    }

    fn send(&self, event: JobEvent) {
        // No receivers is not an error.
        let _ = self.tx.send(event);
    }
}

impl Default for ChannelProgressCallback {
    fn default() -> Self {
        Self::new(256)
    }
}

impl JobProgressCallback for ChannelProgressCallback {
    fn on_job_start(&self, job_id: JobId, total_chunks: usize) {
        self.send(JobEvent::Started {
            job_id,
            total_chunks,
        });
    }

    fn on_stage(&self, job_id: JobId, stage: Stage) {
        self.send(JobEvent::StageChanged { job_id, stage });
    }

    fn on_chunk_complete(&self, job_id: JobId, index: usize, total: usize) {
        self.send(JobEvent::ChunkComplete {
            job_id,
            index,
            total,
        });
    }

    fn on_progress(&self, job_id: JobId, stage: Stage, percent: u8) {
        self.send(JobEvent::Progress {
            job_id,
            stage,
            percent,
        });
    }

    fn on_job_complete(&self, job: &ConversionJob) {
        self.send(JobEvent::Completed {
            job_id: job.id,
            duration_secs: job.duration_secs,
        });
    }

    fn on_job_error(&self, job_id: JobId, error: &str) {
        self.send(JobEvent::Failed {
            job_id,
            message: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_are_contiguous_and_ordered() {
        let stages = [
            Stage::Initializing,
            Stage::Synthesizing,
            Stage::Assembling,
            Stage::Muxing,
        ];
        for pair in stages.windows(2) {
            assert_eq!(pair[0].band().1, pair[1].band().0);
        }
        assert_eq!(Stage::Finalizing.band(), (100, 100));
    }

    #[test]
    fn synthesis_maps_into_its_band() {
        assert_eq!(synthesis_progress(0.0), 10);
        assert_eq!(synthesis_progress(50.0), 40);
        assert_eq!(synthesis_progress(100.0), 70);
        // 1/3 of chunks → 33.33 → 10 + round(20.0)
        assert_eq!(synthesis_progress(batch_percent(1, 3)), 30);
        assert_eq!(synthesis_progress(batch_percent(2, 3)), 50);
    }

    #[test]
    fn synthesis_progress_ignores_out_of_range() {
        assert_eq!(synthesis_progress(-5.0), 10);
        assert_eq!(synthesis_progress(250.0), 70);
        assert_eq!(synthesis_progress(f64::NAN), 10);
    }

    #[test]
    fn batch_percent_reaches_exactly_100() {
        for total in 1..=17 {
            assert_eq!(batch_percent(total, total), 100.0);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        let id = JobId::new();
        cb.on_job_start(id, 3);
        cb.on_stage(id, Stage::Synthesizing);
        cb.on_chunk_complete(id, 0, 3);
        cb.on_progress(id, Stage::Synthesizing, 30);
        cb.on_job_error(id, "boom");
    }

    #[tokio::test]
    async fn channel_callback_streams_one_job_until_terminal() {
        let channel = ChannelProgressCallback::new(16);
        let id = JobId::new();
        let other = JobId::new();
        let stream = channel.job_stream(id);

        channel.on_job_start(id, 1);
        channel.on_progress(other, Stage::Synthesizing, 40);
        channel.on_progress(id, Stage::Synthesizing, 70);
        channel.on_job_error(id, "Failed to convert text to speech: quota");
        channel.on_progress(id, Stage::Muxing, 99);

        let events: Vec<JobEvent> = stream.collect().await;
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.job_id() == id));
        assert!(matches!(events.last(), Some(JobEvent::Failed { .. })));
    }

    #[test]
    fn send_without_subscribers_is_silent() {
        let channel = ChannelProgressCallback::default();
        channel.on_job_start(JobId::new(), 2);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let id = JobId::new();
        let json = serde_json::to_value(JobEvent::Progress {
            job_id: id,
            stage: Stage::Assembling,
            percent: 80,
        })
        .unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["stage"], "assembling");
        assert_eq!(json["percent"], 80);
    }
}
