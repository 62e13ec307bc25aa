//! Error types for the pdf2audiobook library.
//!
//! Each pipeline component owns one error type, so a failure can be traced to
//! the stage that produced it:
//!
//! * [`ExtractionError`] — the PDF could not be read or parsed.
//! * [`SynthesisError`]  — the text-to-speech provider (or writing its audio) failed.
//! * [`AssemblyError`]   — concatenating the per-chunk audio failed.
//! * [`ProbeError`]      — measuring the assembled audio's duration failed.
//! * [`MuxError`]        — rendering the final video failed.
//!
//! The three media errors wrap a [`ToolError`], the shared failure type of
//! the external-process runner.
//!
//! [`AudiobookError`] is the crate-level umbrella. Component errors are
//! wrapped `transparent`ly: the message stored in a failed job's
//! `error_message` is exactly the component's own message.
//!
//! [`UploadError`] is never seen by the orchestrator; upload validation is
//! reported synchronously to whoever submitted the file.

use crate::job::JobId;
use std::path::PathBuf;
use thiserror::Error;

/// Crate-level error returned by the public entry points.
#[derive(Debug, Error)]
pub enum AudiobookError {
    // ── Pipeline stages ───────────────────────────────────────────────────
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Mux(#[from] MuxError),

    // ── Collaborators ─────────────────────────────────────────────────────
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    // ── Job lifecycle ─────────────────────────────────────────────────────
    /// No job record exists for the id.
    #[error("Job {0} not found")]
    JobNotFound(JobId),

    /// A conversion run for this id is already in progress.
    #[error("Job {0} is already being converted")]
    AlreadyRunning(JobId),

    /// The job is already `complete` or `error`; runs never leave those states.
    #[error("Job {0} has already finished")]
    AlreadyFinished(JobId),

    /// The job has not reached `complete`, or its video is gone.
    #[error("Audiobook {0} is not ready for download")]
    NotReady(JobId),

    /// Could not create the per-job working directories.
    #[error("Failed to prepare working directory '{path}': {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (e.g. a panicked background task).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure to read text out of a PDF.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Failed to extract text from PDF: file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    #[error("Failed to extract text from PDF: cannot read '{path}': {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file was read but does not start with the `%PDF` signature.
    #[error("Failed to extract text from PDF: '{path}' is not a PDF (first bytes: {magic:?})")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    #[error("Failed to extract text from PDF: '{path}' is encrypted and requires a password")]
    PasswordRequired { path: PathBuf },

    #[error("Failed to extract text from PDF: '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy."
    )]
    PdfiumBindingFailed(String),

    #[error("Failed to extract text from PDF: {0}")]
    Internal(String),
}

/// Failure to turn a chunk of text into audio.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// The provider answered, but with an error.
    #[error("Failed to convert text to speech: {message}")]
    Provider {
        status: Option<u16>,
        message: String,
    },

    /// The request never produced a response (DNS, TLS, timeout, …).
    #[error("Failed to convert text to speech: {0}")]
    Transport(String),

    /// The provider returned a successful but empty body.
    #[error("Failed to convert text to speech: provider returned no audio")]
    EmptyAudio,

    /// Normalisation left nothing to read aloud.
    #[error("Failed to convert text to speech: document contains no speakable text")]
    NoSpeakableText,

    #[error("Failed to write audio segment '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of an external media process.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The binary could not be started at all (missing from `PATH`, …).
    #[error("Failed to start {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The process ran and exited non-zero (`None` = killed by a signal).
    #[error("{tool} process exited with code {}{}", fmt_code(.code), fmt_last_line(.stderr))]
    Exit {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },
}

fn fmt_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none (terminated by signal)".to_string(), |c| c.to_string())
}

fn fmt_last_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| format!(": {l}"))
        .unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("No audio segments to assemble")]
    NoSegments,

    #[error("Failed to write concat list '{path}': {source}")]
    ConcatList {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Audio assembly failed: {0}")]
    Tool(#[from] ToolError),
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Duration probe failed: {0}")]
    Tool(#[from] ToolError),

    /// The probe exited 0 but its JSON had no usable duration.
    #[error("Duration probe returned malformed output: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("Video rendering failed: {0}")]
    Tool(#[from] ToolError),
}

/// Failure of the job record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job {0} not found in store")]
    NotFound(JobId),

    #[error("Job store backend error: {0}")]
    Backend(String),
}

/// Synchronous rejection of an uploaded file.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Only PDF files are allowed (got '{content_type}')")]
    UnsupportedType { content_type: String },

    #[error("File is too large: {size} bytes (limit {limit} bytes)")]
    TooLarge { size: u64, limit: u64 },

    #[error("Invalid PDF file: {0}")]
    InvalidPdf(#[source] ExtractionError),

    #[error("Uploaded file '{path}' is unreadable: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
