//! The media-tool seam used by the orchestrator.
//!
//! [`FfmpegToolkit`] is the real implementation. Tests substitute a fake
//! that writes placeholder files, so the orchestrator can be exercised
//! without ffmpeg installed.

use crate::config::MediaConfig;
use crate::error::{AssemblyError, MuxError, ProbeError, ToolError};
use crate::pipeline::{assemble, mux, runner};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Losslessly join `segments` in order into `output`.
    async fn concat(&self, segments: &[PathBuf], output: &Path) -> Result<PathBuf, AssemblyError>;

    /// Duration of `audio` in seconds.
    async fn probe_duration(&self, audio: &Path) -> Result<f64, ProbeError>;

    /// Mux `audio` under a title card showing `label`.
    async fn render_video(
        &self,
        audio: &Path,
        label: &str,
        output: &Path,
        duration_secs: f64,
    ) -> Result<PathBuf, MuxError>;
}

/// [`MediaToolkit`] that shells out to ffmpeg and ffprobe.
#[derive(Debug, Clone, Default)]
pub struct FfmpegToolkit {
    config: MediaConfig,
}

impl FfmpegToolkit {
    pub fn new(config: MediaConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    /// Run `-version` on both tools; fails with the first one missing.
    pub async fn check_available(&self) -> Result<(), ToolError> {
        runner::run_tool(&self.config.ffmpeg_path, ["-version"]).await?;
        runner::run_tool(&self.config.ffprobe_path, ["-version"]).await?;
        Ok(())
    }
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn concat(&self, segments: &[PathBuf], output: &Path) -> Result<PathBuf, AssemblyError> {
        assemble::concat_audio(&self.config, segments, output).await
    }

    async fn probe_duration(&self, audio: &Path) -> Result<f64, ProbeError> {
        assemble::probe_duration(&self.config, audio).await
    }

    async fn render_video(
        &self,
        audio: &Path,
        label: &str,
        output: &Path,
        duration_secs: f64,
    ) -> Result<PathBuf, MuxError> {
        mux::render_video(&self.config, audio, label, output, duration_secs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_tools_are_reported() {
        let toolkit = FfmpegToolkit::new(MediaConfig {
            ffmpeg_path: PathBuf::from("/nonexistent/ffmpeg"),
            ..MediaConfig::default()
        });
        let err = toolkit.check_available().await.unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn present_tools_pass_check() {
        // `true` ignores its arguments and exits 0.
        let toolkit = FfmpegToolkit::new(MediaConfig {
            ffmpeg_path: PathBuf::from("true"),
            ffprobe_path: PathBuf::from("true"),
            ..MediaConfig::default()
        });
        toolkit.check_available().await.unwrap();
    }
}
