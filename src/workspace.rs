//! On-disk layout of one job's artifacts.
//!
//! ```text
//! <work_dir>/
//!   uploads/<stored-name>          source PDF (owned by intake)
//!   audio/<job-id>/chunk_000.mp3   per-chunk speech, removed after assembly
//!   audio/<job-id>/complete.mp3    assembled track
//!   video/<job-id>.mp4             final video
//! ```
//!
//! Every path is keyed by job id, so concurrent runs never share a directory.

use crate::error::AudiobookError;
use crate::job::JobId;
use futures::future::join_all;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Paths owned by a single job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobWorkspace {
    audio_dir: PathBuf,
    video_path: PathBuf,
}

impl JobWorkspace {
    pub fn new(work_dir: &Path, id: JobId) -> Self {
        Self {
            audio_dir: work_dir.join("audio").join(id.to_string()),
            video_path: work_dir.join("video").join(format!("{id}.mp4")),
        }
    }

    /// Directory holding the chunk files and the assembled track.
    pub fn audio_dir(&self) -> &Path {
        &self.audio_dir
    }

    pub fn chunk_path(&self, index: usize) -> PathBuf {
        self.audio_dir.join(chunk_file_name(index))
    }

    pub fn complete_audio_path(&self) -> PathBuf {
        self.audio_dir.join("complete.mp3")
    }

    pub fn video_path(&self) -> &Path {
        &self.video_path
    }

    /// Create the audio directory and the video directory.
    pub async fn prepare(&self) -> Result<(), AudiobookError> {
        let video_dir = self.video_path.parent().unwrap_or(Path::new("."));
        for dir in [self.audio_dir.as_path(), video_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| AudiobookError::Workspace {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }
        Ok(())
    }
}

/// `chunk_000.mp3`, `chunk_001.mp3`, …
pub fn chunk_file_name(index: usize) -> String {
    format!("chunk_{index:03}.mp3")
}

/// Delete each file, logging failures instead of returning them.
/// Missing files are ignored. Returns how many files were actually removed.
pub async fn remove_files_best_effort<P: AsRef<Path>>(paths: &[P]) -> usize {
    let results = join_all(paths.iter().map(|p| async move {
        let path = p.as_ref();
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Removed artifact");
                true
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove artifact");
                false
            }
        }
    }))
    .await;
    results.into_iter().filter(|removed| *removed).count()
}

/// Remove a directory tree, logging failures. A missing directory is fine.
pub async fn remove_dir_best_effort(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!(path = %dir.display(), "Removed directory"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %dir.display(), error = %e, "Failed to remove directory"),
    }
}
