//! The conversion job record and its partial-update patch.
//!
//! A [`ConversionJob`] is the persisted state of one PDF → audiobook request.
//! The orchestrator is its only writer while a run is in flight. Every write
//! goes through a [`JobPatch`], so fields a stage does not touch keep their
//! value.

use crate::config::{TtsOptions, Voice};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

/// Opaque, immutable job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle status: `pending → processing → {complete | error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    Complete,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
        }
    }

    /// `complete` and `error` are final; no run ever leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Error)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "complete" => Ok(JobStatus::Complete),
            "error" => Ok(JobStatus::Error),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted state of one conversion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionJob {
    pub id: JobId,
    /// Owning user; opaque to the pipeline.
    pub owner: String,
    pub title: String,
    pub original_file_name: String,
    /// Uploaded PDF on disk.
    pub source_path: PathBuf,
    pub voice: Voice,
    pub speed: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<usize>,

    pub status: JobStatus,
    /// Integer percentage, 0–100, never decreasing during a run.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_path: Option<PathBuf>,
    /// Seconds of narrated audio.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversionJob {
    /// Materialise a new record from its creation request.
    pub fn from_new(new: NewJob) -> Self {
        let now = Utc::now();
        Self {
            id: new.id.unwrap_or_default(),
            owner: new.owner,
            title: new.title,
            original_file_name: new.original_file_name,
            source_path: new.source_path,
            voice: new.options.voice,
            speed: new.options.speed,
            pages: new.pages,
            status: new.status,
            progress: new.progress.min(100),
            error_message: None,
            audio_path: None,
            video_path: None,
            duration_secs: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn options(&self) -> TtsOptions {
        TtsOptions {
            voice: self.voice,
            speed: self.speed,
        }
    }

    /// Text burned into the video frame: the uploaded file's name without
    /// its extension, falling back to the stored file's name.
    pub fn label(&self) -> String {
        let from_original = file_stem(Path::new(&self.original_file_name));
        if !from_original.is_empty() {
            return from_original;
        }
        file_stem(&self.source_path)
    }

    /// File name offered for download: title with every non-alphanumeric
    /// character replaced by `_`, plus `.mp4`.
    pub fn download_filename(&self) -> String {
        let stem: String = self
            .title
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{stem}.mp4")
    }

    /// Apply a patch in place and stamp `updated_at`.
    pub fn apply(&mut self, patch: JobPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(progress) = patch.progress {
            self.progress = progress.min(100);
        }
        if let Some(message) = patch.error_message {
            self.error_message = Some(message);
        }
        if let Some(path) = patch.audio_path {
            self.audio_path = Some(path);
        }
        if let Some(path) = patch.video_path {
            self.video_path = Some(path);
        }
        if let Some(secs) = patch.duration_secs {
            self.duration_secs = Some(secs);
        }
        if let Some(pages) = patch.pages {
            self.pages = Some(pages);
        }
        self.updated_at = Utc::now();
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Creation request for [`crate::store::JobStore::create`].
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Caller-chosen id; a fresh one is generated when `None`.
    pub id: Option<JobId>,
    pub owner: String,
    pub title: String,
    pub original_file_name: String,
    pub source_path: PathBuf,
    pub options: TtsOptions,
    pub pages: Option<usize>,
    pub status: JobStatus,
    pub progress: u8,
}

impl NewJob {
    /// A `pending` job at 0 % with no page count yet.
    pub fn new(
        owner: impl Into<String>,
        original_file_name: impl Into<String>,
        source_path: impl Into<PathBuf>,
        options: TtsOptions,
    ) -> Self {
        let original_file_name = original_file_name.into();
        let title = file_stem(Path::new(&original_file_name));
        Self {
            id: None,
            owner: owner.into(),
            title,
            original_file_name,
            source_path: source_path.into(),
            options,
            pages: None,
            status: JobStatus::Pending,
            progress: 0,
        }
    }
}

/// Partial update. `None` fields are left untouched by the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub error_message: Option<String>,
    pub audio_path: Option<PathBuf>,
    pub video_path: Option<PathBuf>,
    pub duration_secs: Option<f64>,
    pub pages: Option<usize>,
}

impl JobPatch {
    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Error),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn audio_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.audio_path = Some(path.into());
        self
    }

    pub fn video_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.video_path = Some(path.into());
        self
    }

    pub fn duration_secs(mut self, secs: f64) -> Self {
        self.duration_secs = Some(secs);
        self
    }
}

/// Where a listener stopped in a finished audiobook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListeningProgress {
    pub owner: String,
    pub job_id: JobId,
    /// Playback position in seconds.
    pub current_time: f64,
    pub completed: bool,
    pub last_listened_at: DateTime<Utc>,
}

/// A job as listed for its owner, with their playback position if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobWithProgress {
    #[serde(flatten)]
    pub job: ConversionJob,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listening_progress: Option<ListeningProgress>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConversionJob {
        ConversionJob::from_new(NewJob::new(
            "user-1",
            "Moby Dick (1851).pdf",
            "/tmp/uploads/3f9a",
            TtsOptions::default(),
        ))
    }

    #[test]
    fn new_job_starts_pending_at_zero() {
        let job = sample();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert_eq!(job.title, "Moby Dick (1851)");
        assert!(job.error_message.is_none());
    }

    #[test]
    fn patch_leaves_untouched_fields() {
        let mut job = sample();
        job.apply(JobPatch::progress(40).audio_path("/a/complete.mp3"));
        job.apply(JobPatch::default().duration_secs(12.5));
        assert_eq!(job.progress, 40);
        assert_eq!(job.audio_path.as_deref(), Some(Path::new("/a/complete.mp3")));
        assert_eq!(job.duration_secs, Some(12.5));
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn apply_stamps_updated_at() {
        let mut job = sample();
        let before = job.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        job.apply(JobPatch::default());
        assert!(job.updated_at > before);
    }

    #[test]
    fn progress_is_capped_at_100() {
        let mut job = sample();
        job.apply(JobPatch::progress(250));
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn label_prefers_original_file_name() {
        let job = sample();
        assert_eq!(job.label(), "Moby Dick (1851)");

        let mut anonymous = sample();
        anonymous.original_file_name = String::new();
        assert_eq!(anonymous.label(), "3f9a");
    }

    #[test]
    fn download_filename_is_sanitised() {
        assert_eq!(sample().download_filename(), "Moby_Dick__1851_.mp4");
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Complete,
            JobStatus::Error,
        ] {
            assert_eq!(s.as_str().parse::<JobStatus>().unwrap(), s);
        }
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn job_id_parses_its_display_form() {
        let id = JobId::new();
        assert_eq!(id.to_string().parse::<JobId>().unwrap(), id);
    }
}
