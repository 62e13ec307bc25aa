//! Request-side operations around the orchestrator.
//!
//! Transport (multipart parsing, auth) belongs to the host application. It
//! persists the uploaded bytes, then hands the stored file to
//! [`submit_upload`], which validates it synchronously and starts the run in
//! the background. Validation failures never reach the orchestrator.

use crate::config::{PipelineConfig, TtsOptions};
use crate::convert::{ConversionOrchestrator, JobHandle};
use crate::error::{AudiobookError, UploadError};
use crate::job::{ConversionJob, JobId, JobStatus, NewJob};
use crate::pipeline::extract::TextExtractor;
use crate::workspace::{remove_dir_best_effort, remove_files_best_effort, JobWorkspace};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

const PDF_CONTENT_TYPE: &str = "application/pdf";

/// A file the transport layer has already written to disk.
#[derive(Debug, Clone)]
pub struct Upload {
    pub owner: String,
    /// Name the client sent; used for the title fallback and the video label.
    pub original_file_name: String,
    /// Declared MIME type, if the transport knows it.
    pub content_type: Option<String>,
    pub stored_path: PathBuf,
    pub options: TtsOptions,
}

/// An accepted upload: the new job record and its running conversion.
pub struct Submitted {
    pub job: ConversionJob,
    pub handle: JobHandle,
}

impl Submitted {
    /// Wait for the conversion to end.
    ///
    /// With `discard_unfinished`, a run that ends anywhere but `complete`
    /// (including one that returns `Err`) has its files and record removed
    /// before this returns. Cleanup failures are logged, not returned.
    pub async fn finish(
        self,
        orchestrator: &ConversionOrchestrator,
        owner: &str,
        discard_unfinished: bool,
    ) -> Result<ConversionJob, AudiobookError> {
        let id = self.job.id;
        let outcome = self.handle.wait().await;
        let completed = matches!(&outcome, Ok(job) if job.status == JobStatus::Complete);
        if discard_unfinished && !completed {
            if let Err(e) = delete_job(orchestrator, id, owner).await {
                warn!(job_id = %id, error = %e, "Failed to discard unfinished job");
            }
        }
        outcome
    }
}

/// Validate an upload, create its job and start the conversion.
///
/// Checks, in order: declared content type, size limit, and that the
/// extractor can read it. Any failure deletes the stored file and returns
/// [`UploadError`]. The job starts as `processing` at 0 %, titled with the
/// PDF's Title metadata or else the original file name without extension.
pub async fn submit_upload(
    orchestrator: &ConversionOrchestrator,
    extractor: &dyn TextExtractor,
    upload: Upload,
) -> Result<Submitted, AudiobookError> {
    let path = upload.stored_path.clone();

    if let Some(declared) = upload.content_type.as_deref() {
        if !is_pdf_content_type(declared) {
            return reject(
                &path,
                UploadError::UnsupportedType {
                    content_type: declared.to_string(),
                },
            )
            .await;
        }
    }

    let size = match tokio::fs::metadata(&path).await {
        Ok(meta) => meta.len(),
        Err(source) => {
            return reject(&path, UploadError::Unreadable { path: path.clone(), source }).await
        }
    };
    let limit = orchestrator.config().max_upload_bytes;
    if size > limit {
        return reject(&path, UploadError::TooLarge { size, limit }).await;
    }

    let info = match extractor.extract(&path).await {
        Ok(info) => info,
        Err(e) => return reject(&path, UploadError::InvalidPdf(e)).await,
    };

    let mut new_job = NewJob::new(
        upload.owner,
        upload.original_file_name,
        &path,
        upload.options,
    );
    if let Some(title) = info.title.clone() {
        new_job.title = title;
    }
    if new_job.title.trim().is_empty() {
        new_job.title = "Untitled".to_string();
    }
    new_job.pages = Some(info.num_pages);
    new_job.status = JobStatus::Processing;
    new_job.progress = 0;

    let job = match orchestrator.store().create(new_job).await {
        Ok(job) => job,
        Err(e) => {
            remove_files_best_effort(&[&path]).await;
            return Err(e.into());
        }
    };
    info!(
        job_id = %job.id,
        pages = info.num_pages,
        "Accepted upload '{}'",
        job.original_file_name
    );

    let handle = orchestrator.spawn(job.id, info.text, upload.options)?;
    Ok(Submitted { job, handle })
}

async fn reject<T>(path: &Path, error: UploadError) -> Result<T, AudiobookError> {
    warn!("Rejected upload {}: {}", path.display(), error);
    remove_files_best_effort(&[path]).await;
    Err(error.into())
}

/// `application/pdf`, ignoring case and parameters.
fn is_pdf_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|base| base.trim().eq_ignore_ascii_case(PDF_CONTENT_TYPE))
        .unwrap_or(false)
}

/// Copy `bytes` into `<work_dir>/uploads/` under a fresh name.
pub async fn stage_bytes(config: &PipelineConfig, bytes: &[u8]) -> Result<PathBuf, UploadError> {
    let path = fresh_upload_path(config);
    write_staged(&path, async { tokio::fs::write(&path, bytes).await }).await
}

/// Copy an existing file into `<work_dir>/uploads/` under a fresh name.
/// The original is left untouched.
pub async fn stage_file(config: &PipelineConfig, source: &Path) -> Result<PathBuf, UploadError> {
    let path = fresh_upload_path(config);
    write_staged(&path, async {
        tokio::fs::copy(source, &path).await.map(|_| ())
    })
    .await
}

fn fresh_upload_path(config: &PipelineConfig) -> PathBuf {
    config
        .uploads_dir()
        .join(format!("{}.pdf", Uuid::new_v4().simple()))
}

async fn write_staged<F>(path: &Path, write: F) -> Result<PathBuf, UploadError>
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    let unreadable = |source| UploadError::Unreadable {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await.map_err(unreadable)?;
    }
    write.await.map_err(unreadable)?;
    Ok(path.to_path_buf())
}

/// Delete a job owned by `owner`: its files first (best-effort), then the record.
///
/// A job that is still converting is refused with
/// [`AudiobookError::AlreadyRunning`]. Another owner's job reads as not found.
pub async fn delete_job(
    orchestrator: &ConversionOrchestrator,
    id: JobId,
    owner: &str,
) -> Result<(), AudiobookError> {
    let store = orchestrator.store();
    let job = owned_job(store.as_ref(), id, owner).await?;
    if orchestrator.is_running(id) {
        return Err(AudiobookError::AlreadyRunning(id));
    }

    let mut files: Vec<PathBuf> = vec![job.source_path.clone()];
    files.extend(job.audio_path.clone());
    files.extend(job.video_path.clone());
    remove_files_best_effort(&files).await;

    let workspace = JobWorkspace::new(&orchestrator.config().work_dir, id);
    remove_dir_best_effort(workspace.audio_dir()).await;

    store.delete(id).await?;
    info!(job_id = %id, "Deleted job");
    Ok(())
}

/// Where to stream a finished audiobook from, and the file name to offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub path: PathBuf,
    pub file_name: String,
}

/// Resolve the video of a `complete` job owned by `owner`.
///
/// Fails with [`AudiobookError::NotReady`] until the job is complete, or if
/// its video file has gone missing.
pub async fn download_target(
    store: &dyn crate::store::JobStore,
    id: JobId,
    owner: &str,
) -> Result<DownloadTarget, AudiobookError> {
    let job = owned_job(store, id, owner).await?;
    if job.status != JobStatus::Complete {
        return Err(AudiobookError::NotReady(id));
    }
    let path = job.video_path.clone().ok_or(AudiobookError::NotReady(id))?;
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(AudiobookError::NotReady(id));
    }
    Ok(DownloadTarget {
        path,
        file_name: job.download_filename(),
    })
}

async fn owned_job(
    store: &dyn crate::store::JobStore,
    id: JobId,
    owner: &str,
) -> Result<ConversionJob, AudiobookError> {
    match store.get(id).await? {
        Some(job) if job.owner == owner => Ok(job),
        _ => Err(AudiobookError::JobNotFound(id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_matching() {
        assert!(is_pdf_content_type("application/pdf"));
        assert!(is_pdf_content_type("Application/PDF; charset=binary"));
        assert!(!is_pdf_content_type("application/octet-stream"));
        assert!(!is_pdf_content_type("text/plain"));
        assert!(!is_pdf_content_type(""));
    }

    #[tokio::test]
    async fn staging_uses_fresh_names_under_uploads() {
        let tmp = tempfile::tempdir().unwrap();
        let config = PipelineConfig::builder().work_dir(tmp.path()).build().unwrap();

        let a = stage_bytes(&config, b"%PDF-1.4").await.unwrap();
        let b = stage_bytes(&config, b"%PDF-1.4").await.unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with(config.uploads_dir()));
        assert_eq!(a.extension().unwrap(), "pdf");

        let original = tmp.path().join("mine.pdf");
        std::fs::write(&original, b"%PDF-1.7").unwrap();
        let staged = stage_file(&config, &original).await.unwrap();
        assert!(original.exists());
        assert_eq!(std::fs::read(staged).unwrap(), b"%PDF-1.7");
    }

    #[tokio::test]
    async fn staging_missing_file_is_unreadable() {
        let tmp = tempfile::tempdir().unwrap();
        let config = PipelineConfig::builder().work_dir(tmp.path()).build().unwrap();
        let err = stage_file(&config, &tmp.path().join("absent.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Unreadable { .. }));
    }
}
