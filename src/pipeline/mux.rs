//! Video muxing: put the narration under a static title card.
//!
//! The picture is a solid lavfi colour source with the label drawn centred.
//! `-shortest` trims the result to the audio's length.

use crate::config::MediaConfig;
use crate::error::MuxError;
use crate::pipeline::runner::run_tool;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::info;

/// Render `audio` with a `label` title card into `output`.
pub async fn render_video(
    media: &MediaConfig,
    audio: &Path,
    label: &str,
    output: &Path,
    duration_secs: f64,
) -> Result<PathBuf, MuxError> {
    let args = mux_args(media, audio, label, output, duration_secs);
    run_tool(&media.ffmpeg_path, &args).await?;
    info!(
        "Rendered {:.1}s video to {}",
        duration_secs,
        output.display()
    );
    Ok(output.to_path_buf())
}

fn mux_args(
    media: &MediaConfig,
    audio: &Path,
    label: &str,
    output: &Path,
    duration_secs: f64,
) -> Vec<OsString> {
    let source = format!(
        "color=c={}:size={}x{}:duration={:.3}",
        media.background,
        media.width,
        media.height,
        duration_secs.max(0.0)
    );
    let filter = format!(
        "drawtext=text='{}':fontcolor={}:fontsize={}:x=(w-tw)/2:y=(h-th)/2",
        escape_drawtext(label),
        media.font_color,
        media.font_size
    );

    let mut args: Vec<OsString> = Vec::new();
    args.extend(["-f", "lavfi", "-i"].map(OsString::from));
    args.push(source.into());
    args.push("-i".into());
    args.push(audio.as_os_str().to_os_string());
    args.push("-vf".into());
    args.push(filter.into());
    args.extend(["-c:v", media.video_codec.as_str()].map(OsString::from));
    args.extend(["-pix_fmt", "yuv420p"].map(OsString::from));
    args.extend(["-c:a", media.audio_codec.as_str()].map(OsString::from));
    args.extend(["-shortest", "-y"].map(OsString::from));
    args.push(output.as_os_str().to_os_string());
    args
}

/// Escape `text` for use inside `drawtext=text='…'`.
///
/// The value passes through three parsers: the filtergraph, the filter
/// option list, then drawtext's own expansion. A quote has to leave the
/// quoted section to be escaped at all.
pub fn escape_drawtext(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\'' => out.push_str(r"'\\\''"),
            '\\' => out.push_str(r"\\\\"),
            ':' => out.push_str(r"\:"),
            '%' => out.push_str(r"\\%"),
            c if c.is_control() => out.push(' '),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_mux_argument_contract() {
        let args = strings(&mux_args(
            &MediaConfig::default(),
            Path::new("/d/audio/j/complete.mp3"),
            "Moby Dick",
            Path::new("/d/video/j.mp4"),
            61.25,
        ));
        assert_eq!(
            args,
            [
                "-f",
                "lavfi",
                "-i",
                "color=c=black:size=1280x720:duration=61.250",
                "-i",
                "/d/audio/j/complete.mp3",
                "-vf",
                "drawtext=text='Moby Dick':fontcolor=white:fontsize=48:x=(w-tw)/2:y=(h-th)/2",
                "-c:v",
                "libx264",
                "-pix_fmt",
                "yuv420p",
                "-c:a",
                "aac",
                "-shortest",
                "-y",
                "/d/video/j.mp4",
            ]
        );
    }

    #[test]
    fn test_escape_plain_text_unchanged() {
        assert_eq!(escape_drawtext("Chapter 1 - The Loomings"), "Chapter 1 - The Loomings");
    }

    #[test]
    fn test_escape_special_characters() {
        assert_eq!(escape_drawtext("a:b"), r"a\:b");
        assert_eq!(escape_drawtext("100%"), r"100\\%");
        assert_eq!(escape_drawtext(r"a\b"), r"a\\\\b");
        assert_eq!(escape_drawtext("it's"), r"it'\\\''s");
        assert_eq!(escape_drawtext("tab\there"), "tab here");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_render_failure_is_mux_error() {
        let media = MediaConfig {
            ffmpeg_path: PathBuf::from("false"),
            ..MediaConfig::default()
        };
        let err = render_video(
            &media,
            Path::new("a.mp3"),
            "x",
            Path::new("out.mp4"),
            1.0,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().starts_with("Video rendering failed: false process exited with code 1"));
    }
}
