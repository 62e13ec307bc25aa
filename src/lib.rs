//! # pdf2audiobook
//!
//! Turn PDF documents into narrated MP4 audiobooks.
//!
//! ## Why this crate?
//!
//! Text-to-speech APIs cap the size of a single request, and a plain audio
//! file is awkward to share on video platforms. This crate pulls the text
//! layer out of a PDF, cleans it up for reading aloud, packs it into
//! sentence-aligned chunks under the provider's limit, narrates them in
//! order, and stitches the result into a single video with a title card.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Extract    text, page count, title via pdfium (spawn_blocking)
//!  ├─ 2. Normalise  line breaks → pauses, strip unreadable symbols
//!  ├─ 3. Chunk      sentence-packed pieces ≤ 4000 chars
//!  ├─ 4. Synthesize one TTS request per chunk, strictly in order
//!  ├─ 5. Assemble   ffmpeg concat (stream copy) + ffprobe duration
//!  └─ 6. Mux        ffmpeg title card + narration → MP4
//! ```
//!
//! Every step is recorded on a [`ConversionJob`] in a [`JobStore`], with
//! progress moving through fixed bands (0–10 setup, 10–70 synthesis,
//! 70–80 assembly, 80–99 video, 100 done).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2audiobook::{
//!     ConversionOrchestrator, JobStore, MemoryJobStore, NewJob, PdfiumExtractor,
//!     PipelineConfig, TextExtractor, TtsOptions, Voice,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // API key read from OPENAI_API_KEY by the caller
//!     let config = PipelineConfig::builder()
//!         .api_key(std::env::var("OPENAI_API_KEY")?)
//!         .work_dir("data")
//!         .build()?;
//!     let store = Arc::new(MemoryJobStore::new());
//!     let orchestrator = ConversionOrchestrator::from_config(config, store.clone())?;
//!
//!     let info = PdfiumExtractor::new().extract("book.pdf".as_ref()).await?;
//!     let options = TtsOptions::new(Voice::Nova, 1.1);
//!     let job = store
//!         .create(NewJob::new("me", "book.pdf", "book.pdf", options))
//!         .await?;
//!
//!     let done = orchestrator.run(job.id, &info.text, options).await?;
//!     println!("{} → {:?}", done.status, done.video_path);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2audiobook` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdf2audiobook = { version = "0.1", default-features = false }
//! ```
//!
//! ## External Tools
//!
//! | Tool | Used for |
//! |------|----------|
//! | pdfium (shared library) | text extraction; path via [`PdfiumExtractor::with_library_path`] |
//! | `ffmpeg`  | concatenation and video rendering |
//! | `ffprobe` | duration measurement |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod intake;
pub mod job;
pub mod pipeline;
pub mod progress;
pub mod store;
pub mod workspace;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{MediaConfig, PipelineConfig, PipelineConfigBuilder, TtsConfig, TtsOptions, Voice};
pub use convert::{ConversionOrchestrator, JobHandle};
pub use error::{
    AssemblyError, AudiobookError, ExtractionError, MuxError, ProbeError, StoreError,
    SynthesisError, ToolError, UploadError,
};
pub use intake::{delete_job, download_target, submit_upload, DownloadTarget, Submitted, Upload};
pub use job::{ConversionJob, JobId, JobPatch, JobStatus, JobWithProgress, ListeningProgress, NewJob};
pub use pipeline::extract::{PdfInfo, PdfiumExtractor, TextExtractor};
pub use pipeline::media::{FfmpegToolkit, MediaToolkit};
pub use pipeline::synth::{OpenAiSpeechProvider, SpeechProvider, SpeechRequest};
pub use progress::{
    ChannelProgressCallback, JobEvent, JobProgressCallback, NoopProgressCallback,
    ProgressCallback, Stage,
};
pub use store::{JobStore, MemoryJobStore};
