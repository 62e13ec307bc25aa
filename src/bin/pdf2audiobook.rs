//! CLI binary for pdf2audiobook.
//!
//! A thin shim over the library crate: maps CLI flags to `PipelineConfig`,
//! runs one job against an in-memory store and copies the video out.

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf2audiobook::pipeline::chunk::split_into_chunks;
use pdf2audiobook::pipeline::normalize::normalize_for_speech;
use pdf2audiobook::{
    delete_job, submit_upload, ConversionJob, ConversionOrchestrator, FfmpegToolkit, JobId,
    JobProgressCallback, JobStatus, MemoryJobStore, PdfiumExtractor, PipelineConfig,
    ProgressCallback, Stage, TextExtractor, TtsOptions, Upload, Voice,
};
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const CLI_OWNER: &str = "cli";

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

/// Terminal progress callback: one bar tracking the job's persisted
/// percentage, plus a log line per synthesized chunk.
struct CliProgressCallback {
    bar: ProgressBar,
    started: Instant,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold:<12} \
             [{bar:42.green/238}] {pos:>3}%  ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            started: Instant::now(),
        })
    }
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Initializing => "Preparing",
        Stage::Synthesizing => "Narrating",
        Stage::Assembling => "Assembling",
        Stage::Muxing => "Rendering",
        Stage::Finalizing => "Finishing",
    }
}

impl JobProgressCallback for CliProgressCallback {
    fn on_job_start(&self, _job_id: JobId, total_chunks: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Narrating {total_chunks} chunks…"))
        ));
    }

    fn on_stage(&self, _job_id: JobId, stage: Stage) {
        self.bar.set_prefix(stage_label(stage));
        self.bar.set_message("");
    }

    fn on_chunk_complete(&self, _job_id: JobId, index: usize, total: usize) {
        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {}",
            green("✓"),
            index + 1,
            total,
            dim(&format!("{:.1}s", self.started.elapsed().as_secs_f64())),
        ));
        self.bar.set_message(format!("chunk {}/{}", index + 1, total));
    }

    fn on_progress(&self, _job_id: JobId, _stage: Stage, percent: u8) {
        self.bar.set_position(u64::from(percent));
    }

    fn on_job_complete(&self, job: &ConversionJob) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} Audiobook ready  {}",
            green("✔"),
            dim(&format!(
                "{:.1}s of audio",
                job.duration_secs.unwrap_or_default()
            )),
        );
    }

    fn on_job_error(&self, _job_id: JobId, error: &str) {
        self.bar.finish_and_clear();
        let msg = if error.chars().count() > 120 {
            let head: String = error.chars().take(119).collect();
            format!("{head}\u{2026}")
        } else {
            error.to_string()
        };
        eprintln!("{} {}", red("✘"), red(&msg));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Basic conversion (writes book.mp4 next to the current directory)
  pdf2audiobook book.pdf

  # Choose the output, the narrator and the pace
  pdf2audiobook book.pdf -o out/book.mp4 --voice nova --speed 1.25

  # Inspect the PDF (no API key or ffmpeg needed)
  pdf2audiobook --inspect-only book.pdf

  # Print the normalised text chunks that would be narrated
  pdf2audiobook --text-only book.pdf

  # Any OpenAI-compatible speech endpoint
  pdf2audiobook --base-url http://localhost:8880/v1 book.pdf

VOICES:
  alloy (default), echo, fable, onyx, nova, shimmer

SPEED:
  0.25 – 4.0; values outside the range are clamped.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY                 Speech API key
  PDF2AUDIOBOOK_TTS_BASE_URL     Speech API base URL
  PDF2AUDIOBOOK_TTS_MODEL        Speech model (default tts-1)
  PDF2AUDIOBOOK_WORK_DIR         Working directory (default ./data)
  PDF2AUDIOBOOK_FFMPEG           ffmpeg binary
  PDF2AUDIOBOOK_FFPROBE          ffprobe binary
  PDFIUM_LIB_PATH                Path to libpdfium (file or directory)
  RUST_LOG                       Log filter, overrides -v / -q

SETUP:
  1. Install ffmpeg (provides ffprobe) and a pdfium shared library.
  2. Set API key:     export OPENAI_API_KEY=sk-...
  3. Convert:         pdf2audiobook book.pdf
"#;

/// Turn a PDF into a narrated MP4 audiobook.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2audiobook",
    version,
    about = "Turn a PDF into a narrated MP4 audiobook",
    long_about = "Extract the text of a PDF, narrate it with a text-to-speech API and render \
it as an MP4 video with a title card. Works with OpenAI and any endpoint speaking the same \
/audio/speech protocol.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file.
    input: PathBuf,

    /// Write the MP4 here (default: <input stem>.mp4 in the current directory).
    #[arg(short, long, env = "PDF2AUDIOBOOK_OUTPUT")]
    output: Option<PathBuf>,

    /// Narrator voice.
    #[arg(long, env = "PDF2AUDIOBOOK_VOICE", value_enum, default_value = "alloy")]
    voice: VoiceArg,

    /// Playback speed, 0.25–4.0 (clamped).
    #[arg(long, env = "PDF2AUDIOBOOK_SPEED", default_value_t = 1.0)]
    speed: f32,

    /// Speech API key.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Speech API base URL.
    #[arg(long, env = "PDF2AUDIOBOOK_TTS_BASE_URL")]
    base_url: Option<String>,

    /// Speech model.
    #[arg(long, env = "PDF2AUDIOBOOK_TTS_MODEL")]
    model: Option<String>,

    /// Per-request timeout for the speech API, in seconds.
    #[arg(long, env = "PDF2AUDIOBOOK_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Maximum characters per narrated chunk (1–4096).
    #[arg(long, env = "PDF2AUDIOBOOK_MAX_CHUNK_CHARS", default_value_t = 4000)]
    max_chunk_chars: usize,

    /// Directory for uploads, intermediate audio and rendered video.
    #[arg(long, env = "PDF2AUDIOBOOK_WORK_DIR", default_value = "data")]
    work_dir: PathBuf,

    /// ffmpeg binary.
    #[arg(long, env = "PDF2AUDIOBOOK_FFMPEG", default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// ffprobe binary.
    #[arg(long, env = "PDF2AUDIOBOOK_FFPROBE", default_value = "ffprobe")]
    ffprobe: PathBuf,

    /// Path to libpdfium, or the directory containing it.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Keep the job's files in the work directory after copying the video out.
    #[arg(long)]
    keep_work: bool,

    /// Print PDF metadata only, no conversion.
    #[arg(long)]
    inspect_only: bool,

    /// Print the normalised text chunks only, no conversion.
    #[arg(long)]
    text_only: bool,

    /// Print machine-readable JSON (with --inspect-only or --text-only).
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2AUDIOBOOK_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2AUDIOBOOK_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2AUDIOBOOK_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum VoiceArg {
    Alloy,
    Echo,
    Fable,
    Onyx,
    Nova,
    Shimmer,
}

impl From<VoiceArg> for Voice {
    fn from(v: VoiceArg) -> Self {
        match v {
            VoiceArg::Alloy => Voice::Alloy,
            VoiceArg::Echo => Voice::Echo,
            VoiceArg::Fable => Voice::Fable,
            VoiceArg::Onyx => Voice::Onyx,
            VoiceArg::Nova => Voice::Nova,
            VoiceArg::Shimmer => Voice::Shimmer,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InspectReport<'a> {
    file: &'a Path,
    title: Option<&'a str>,
    num_pages: usize,
    text_chars: usize,
    speakable_chars: usize,
    chunks: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless -v is given.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.inspect_only && !cli.text_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let extractor = match cli.pdfium_lib {
        Some(ref path) => PdfiumExtractor::with_library_path(path),
        None => PdfiumExtractor::new(),
    };

    // ── Inspect / text-only modes ────────────────────────────────────────
    if cli.inspect_only || cli.text_only {
        return preview(&cli, &extractor).await;
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn JobProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    FfmpegToolkit::new(config.media.clone())
        .check_available()
        .await
        .context("ffmpeg and ffprobe are required; install ffmpeg or pass --ffmpeg/--ffprobe")?;

    let output_path = cli.output.clone().unwrap_or_else(|| default_output(&cli.input));
    let store = Arc::new(MemoryJobStore::new());
    let orchestrator = ConversionOrchestrator::from_config(config, store)
        .context("Invalid configuration")?;

    // ── Run conversion ───────────────────────────────────────────────────
    let started = Instant::now();
    // The job owns (and may delete) its source, so hand it a copy.
    let staged = pdf2audiobook::intake::stage_file(orchestrator.config(), &cli.input)
        .await
        .with_context(|| format!("Failed to read {}", cli.input.display()))?;
    let file_name = cli
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string());

    let submitted = submit_upload(
        &orchestrator,
        &extractor,
        Upload {
            owner: CLI_OWNER.to_string(),
            original_file_name: file_name,
            content_type: None,
            stored_path: staged,
            options: TtsOptions::new(cli.voice.into(), cli.speed),
        },
    )
    .await
    .context("PDF rejected")?;

    let job = submitted
        .finish(&orchestrator, CLI_OWNER, !cli.keep_work)
        .await
        .context("Conversion failed")?;
    if job.status != JobStatus::Complete {
        bail!(
            "Conversion failed: {}",
            job.error_message.as_deref().unwrap_or("unknown error")
        );
    }
    let video = job
        .video_path
        .as_deref()
        .context("Finished job has no video path")?;

    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::copy(video, &output_path)
        .await
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    if !cli.keep_work {
        delete_job(&orchestrator, job.id, CLI_OWNER)
            .await
            .context("Failed to clean up work directory")?;
    }

    if !cli.quiet {
        eprintln!(
            "{}  {} pages  {:.1}s audio  {}ms  →  {}",
            green("✔"),
            job.pages.unwrap_or_default(),
            job.duration_secs.unwrap_or_default(),
            started.elapsed().as_millis(),
            bold(&output_path.display().to_string()),
        );
    }

    Ok(())
}

/// `--inspect-only` and `--text-only`: extraction and text preparation
/// without touching the speech API or ffmpeg.
async fn preview(cli: &Cli, extractor: &PdfiumExtractor) -> Result<()> {
    let info = extractor
        .extract(&cli.input)
        .await
        .context("Failed to read PDF")?;
    let speakable = normalize_for_speech(&info.text);
    let chunks = split_into_chunks(&speakable, cli.max_chunk_chars);

    let stdout = io::stdout();
    let mut out = stdout.lock();

    if cli.text_only {
        if cli.json {
            let json = serde_json::to_string_pretty(&chunks).context("Failed to serialise chunks")?;
            writeln!(out, "{json}").context("Failed to write to stdout")?;
        } else {
            for chunk in &chunks {
                writeln!(
                    out,
                    "{}\n{}\n",
                    dim(&format!("── chunk {} ({} chars) ──", chunk.index + 1, chunk.char_count())),
                    chunk.text
                )
                .context("Failed to write to stdout")?;
            }
        }
        return Ok(());
    }

    let report = InspectReport {
        file: &cli.input,
        title: info.title.as_deref(),
        num_pages: info.num_pages,
        text_chars: info.text.chars().count(),
        speakable_chars: speakable.chars().count(),
        chunks: chunks.len(),
    };
    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        writeln!(out, "{json}").context("Failed to write to stdout")?;
    } else {
        writeln!(out, "File:             {}", report.file.display())?;
        if let Some(title) = report.title {
            writeln!(out, "Title:            {}", title)?;
        }
        writeln!(out, "Pages:            {}", report.num_pages)?;
        writeln!(out, "Text chars:       {}", report.text_chars)?;
        writeln!(out, "Speakable chars:  {}", report.speakable_chars)?;
        writeln!(out, "Chunks:           {}", report.chunks)?;
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let Some(api_key) = cli.api_key.clone() else {
        bail!("No speech API key: set OPENAI_API_KEY or pass --api-key");
    };

    let mut builder = PipelineConfig::builder()
        .api_key(api_key)
        .work_dir(&cli.work_dir)
        .max_chunk_chars(cli.max_chunk_chars)
        .request_timeout_secs(cli.api_timeout)
        .ffmpeg_path(&cli.ffmpeg)
        .ffprobe_path(&cli.ffprobe);

    if let Some(ref url) = cli.base_url {
        builder = builder.tts_base_url(url);
    }
    if let Some(ref model) = cli.model {
        builder = builder.tts_model(model);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audiobook".to_string());
    PathBuf::from(format!("{stem}.mp4"))
}
