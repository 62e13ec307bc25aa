//! Configuration types for PDF-to-audiobook conversion.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. Provider credentials and tool paths live
//! here as well. The core never reads the process environment; whoever builds
//! the config (the CLI, a web server) decides where a key comes from.

use crate::error::AudiobookError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Hard input ceiling of the speech endpoint, in characters.
pub const PROVIDER_MAX_INPUT_CHARS: usize = 4096;

/// Slowest speed the speech endpoint accepts.
pub const MIN_SPEED: f32 = 0.25;
/// Fastest speed the speech endpoint accepts.
pub const MAX_SPEED: f32 = 4.0;

/// Configuration for the conversion pipeline.
///
/// # Example
/// ```rust
/// use pdf2audiobook::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .api_key("sk-test")
///     .work_dir("/var/lib/audiobooks")
///     .max_chunk_chars(3000)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_chunk_chars, 3000);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Longest text chunk sent in one speech request. Range: 1–4096. Default: 4000.
    ///
    /// Kept a little under the provider's 4096-character ceiling.
    pub max_chunk_chars: usize,

    /// Root of all generated files: `uploads/`, `audio/<job-id>/`, `video/`.
    /// Default: `./data`.
    pub work_dir: PathBuf,

    /// Largest accepted upload in bytes. Default: 50 MiB.
    pub max_upload_bytes: u64,

    /// Speech provider settings.
    pub tts: TtsConfig,

    /// External media tool settings.
    pub media: MediaConfig,

    /// Optional observer for job events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 4000,
            work_dir: PathBuf::from("data"),
            max_upload_bytes: 50 * 1024 * 1024,
            tts: TtsConfig::default(),
            media: MediaConfig::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("max_chunk_chars", &self.max_chunk_chars)
            .field("work_dir", &self.work_dir)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("tts", &self.tts)
            .field("media", &self.media)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn JobProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.work_dir.join("uploads")
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.work_dir.join("audio")
    }

    pub fn video_dir(&self) -> PathBuf {
        self.work_dir.join("video")
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn max_chunk_chars(mut self, n: usize) -> Self {
        self.config.max_chunk_chars = n.clamp(1, PROVIDER_MAX_INPUT_CHARS);
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = dir.into();
        self
    }

    pub fn max_upload_bytes(mut self, n: u64) -> Self {
        self.config.max_upload_bytes = n;
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.tts.api_key = Some(key.into());
        self
    }

    pub fn tts_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.tts.base_url = url.into();
        self
    }

    pub fn tts_model(mut self, model: impl Into<String>) -> Self {
        self.config.tts.model = model.into();
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.tts.request_timeout_secs = secs.max(1);
        self
    }

    pub fn ffmpeg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.media.ffmpeg_path = path.into();
        self
    }

    pub fn ffprobe_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.media.ffprobe_path = path.into();
        self
    }

    pub fn video_size(mut self, width: u32, height: u32) -> Self {
        self.config.media.width = width;
        self.config.media.height = height;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, AudiobookError> {
        let c = &self.config;
        if c.max_chunk_chars == 0 || c.max_chunk_chars > PROVIDER_MAX_INPUT_CHARS {
            return Err(AudiobookError::InvalidConfig(format!(
                "max_chunk_chars must be 1–{}, got {}",
                PROVIDER_MAX_INPUT_CHARS, c.max_chunk_chars
            )));
        }
        if c.media.width == 0 || c.media.height == 0 {
            return Err(AudiobookError::InvalidConfig(format!(
                "video size must be non-zero, got {}x{}",
                c.media.width, c.media.height
            )));
        }
        // libx264 with yuv420p rejects odd dimensions.
        if c.media.width % 2 != 0 || c.media.height % 2 != 0 {
            return Err(AudiobookError::InvalidConfig(format!(
                "video size must be even, got {}x{}",
                c.media.width, c.media.height
            )));
        }
        if c.tts.base_url.trim().is_empty() {
            return Err(AudiobookError::InvalidConfig(
                "TTS base URL must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Provider ─────────────────────────────────────────────────────────────

/// Speech provider connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// Bearer credential. Required by the HTTP provider, never logged.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Default: `https://api.openai.com/v1`.
    pub base_url: String,
    /// Default: `tts-1`.
    pub model: String,
    /// Container the provider encodes to. Default: `mp3`.
    pub response_format: String,
    /// Per-request timeout. Default: 120 s.
    pub request_timeout_secs: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "tts-1".to_string(),
            response_format: "mp3".to_string(),
            request_timeout_secs: 120,
        }
    }
}

impl fmt::Debug for TtsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtsConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("response_format", &self.response_format)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

// ── Media tools ──────────────────────────────────────────────────────────

/// ffmpeg / ffprobe invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// lavfi colour name for the static background.
    pub background: String,
    pub font_color: String,
    pub font_size: u32,
    pub video_codec: String,
    pub audio_codec: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            width: 1280,
            height: 720,
            background: "black".to_string(),
            font_color: "white".to_string(),
            font_size: 48,
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
        }
    }
}

// ── Per-job options ──────────────────────────────────────────────────────

/// Narrator voice offered by the speech endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    #[default]
    Alloy,
    Echo,
    Fable,
    Onyx,
    Nova,
    Shimmer,
}

impl Voice {
    pub const ALL: [Voice; 6] = [
        Voice::Alloy,
        Voice::Echo,
        Voice::Fable,
        Voice::Onyx,
        Voice::Nova,
        Voice::Shimmer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Alloy => "alloy",
            Voice::Echo => "echo",
            Voice::Fable => "fable",
            Voice::Onyx => "onyx",
            Voice::Nova => "nova",
            Voice::Shimmer => "shimmer",
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Voice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Voice::ALL
            .into_iter()
            .find(|v| v.as_str() == wanted)
            .ok_or_else(|| format!("Unknown voice '{}'", s))
    }
}

/// Narration options chosen per job.
///
/// `speed` is stored as requested; the synthesizer clamps it to
/// [`MIN_SPEED`]–[`MAX_SPEED`] right before each provider call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TtsOptions {
    pub voice: Voice,
    pub speed: f32,
}

impl Default for TtsOptions {
    fn default() -> Self {
        Self {
            voice: Voice::default(),
            speed: 1.0,
        }
    }
}

impl TtsOptions {
    pub fn new(voice: Voice, speed: f32) -> Self {
        Self { voice, speed }
    }

    /// Speed as sent to the provider. NaN falls back to 1.0.
    pub fn clamped_speed(&self) -> f32 {
        if self.speed.is_nan() {
            return 1.0;
        }
        self.speed.clamp(MIN_SPEED, MAX_SPEED)
    }
}
