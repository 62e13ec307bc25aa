//! Audio assembly: concatenate chunk files into one track, and measure it.
//!
//! Concatenation uses ffmpeg's concat demuxer with stream copy, so segments
//! are joined losslessly without re-encoding. All segments come from the same
//! provider and share one codec, which that demuxer requires.

use crate::config::MediaConfig;
use crate::error::{AssemblyError, ProbeError};
use crate::pipeline::runner::run_tool;
use serde_json::Value;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const CONCAT_LIST_NAME: &str = "filelist.txt";

/// Join `segments`, in order, into `output`.
///
/// A `filelist.txt` concat list is written next to `output` and removed
/// afterwards, whether ffmpeg succeeded or not.
pub async fn concat_audio(
    media: &MediaConfig,
    segments: &[PathBuf],
    output: &Path,
) -> Result<PathBuf, AssemblyError> {
    if segments.is_empty() {
        return Err(AssemblyError::NoSegments);
    }

    let list_dir = output.parent().unwrap_or(Path::new("."));
    let list_path = list_dir.join(CONCAT_LIST_NAME);
    let list = concat_list(segments).map_err(|source| AssemblyError::ConcatList {
        path: list_path.clone(),
        source,
    })?;
    tokio::fs::write(&list_path, list)
        .await
        .map_err(|source| AssemblyError::ConcatList {
            path: list_path.clone(),
            source,
        })?;

    let mut args: Vec<OsString> = Vec::new();
    args.extend(["-f", "concat", "-safe", "0", "-i"].map(OsString::from));
    args.push(list_path.clone().into_os_string());
    args.extend(["-c", "copy", "-y"].map(OsString::from));
    args.push(output.as_os_str().to_os_string());

    let result = run_tool(&media.ffmpeg_path, &args).await;

    if let Err(e) = tokio::fs::remove_file(&list_path).await {
        warn!(path = %list_path.display(), error = %e, "Failed to remove concat list");
    }

    result?;
    info!(
        "Assembled {} segments into {}",
        segments.len(),
        output.display()
    );
    Ok(output.to_path_buf())
}

/// Concat-demuxer list: one `file '<absolute path>'` line per segment.
fn concat_list(segments: &[PathBuf]) -> std::io::Result<String> {
    let mut lines = Vec::with_capacity(segments.len());
    for segment in segments {
        let absolute = std::path::absolute(segment)?;
        lines.push(format!("file '{}'", quote_concat_path(&absolute)));
    }
    Ok(lines.join("\n"))
}

/// Inside single quotes the concat demuxer allows no escapes, so a literal `'`
/// closes the quote, emits an escaped quote and reopens.
fn quote_concat_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', r"'\''")
}

/// Duration of `audio` in seconds, via `ffprobe -show_format`.
pub async fn probe_duration(media: &MediaConfig, audio: &Path) -> Result<f64, ProbeError> {
    let mut args: Vec<OsString> = Vec::new();
    args.extend(["-v", "quiet", "-print_format", "json", "-show_format"].map(OsString::from));
    args.push(audio.as_os_str().to_os_string());

    let output = run_tool(&media.ffprobe_path, &args).await?;
    let duration = parse_probe_output(&output.stdout)?;
    debug!("Probed {}: {:.3}s", audio.display(), duration);
    Ok(duration)
}

/// Read `format.duration` from ffprobe's JSON. ffprobe prints it as a string;
/// a bare number is accepted too. It must be finite and non-negative.
pub fn parse_probe_output(stdout: &str) -> Result<f64, ProbeError> {
    let json: Value = serde_json::from_str(stdout)
        .map_err(|e| ProbeError::Malformed(format!("invalid JSON: {}", e)))?;

    let raw = json
        .pointer("/format/duration")
        .ok_or_else(|| ProbeError::Malformed("missing format.duration".into()))?;

    let duration = match raw {
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ProbeError::Malformed(format!("unparseable duration '{}'", s)))?,
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ProbeError::Malformed(format!("unparseable duration {}", n)))?,
        other => {
            return Err(ProbeError::Malformed(format!(
                "unexpected duration value {}",
                other
            )))
        }
    };

    if !duration.is_finite() || duration < 0.0 {
        return Err(ProbeError::Malformed(format!(
            "duration out of range: {}",
            duration
        )));
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_string_duration() {
        let out = r#"{"format":{"filename":"complete.mp3","duration":"123.456000","bit_rate":"64000"}}"#;
        assert_eq!(parse_probe_output(out).unwrap(), 123.456);
    }

    #[test]
    fn test_probe_numeric_duration() {
        assert_eq!(
            parse_probe_output(r#"{"format":{"duration":7.5}}"#).unwrap(),
            7.5
        );
    }

    #[test]
    fn test_probe_rejects_bad_output() {
        for bad in [
            "",
            "not json",
            r#"{"format":{}}"#,
            r#"{"format":{"duration":"N/A"}}"#,
            r#"{"format":{"duration":"-1.0"}}"#,
            r#"{"format":{"duration":"inf"}}"#,
            r#"{"format":{"duration":null}}"#,
        ] {
            assert!(
                matches!(parse_probe_output(bad), Err(ProbeError::Malformed(_))),
                "accepted: {bad:?}"
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_concat_list_lines() {
        let list = concat_list(&[
            PathBuf::from("/data/audio/j/chunk_000.mp3"),
            PathBuf::from("/data/audio/j/chunk_001.mp3"),
        ])
        .unwrap();
        assert_eq!(
            list,
            "file '/data/audio/j/chunk_000.mp3'\nfile '/data/audio/j/chunk_001.mp3'"
        );
    }

    #[test]
    fn test_concat_list_paths_are_absolute() {
        let list = concat_list(&[PathBuf::from("chunk_000.mp3")]).unwrap();
        let quoted = list.trim_start_matches("file '").trim_end_matches('\'');
        assert!(Path::new(quoted).is_absolute(), "got: {list}");
    }

    #[test]
    fn test_quote_concat_path() {
        assert_eq!(
            quote_concat_path(Path::new("/tmp/it's.mp3")),
            r"/tmp/it'\''s.mp3"
        );
    }

    #[tokio::test]
    async fn test_concat_without_segments() {
        let err = concat_audio(&MediaConfig::default(), &[], Path::new("/tmp/out.mp3"))
            .await
            .unwrap_err();
        assert!(matches!(err, AssemblyError::NoSegments));
    }

    #[cfg(unix)]
    mod with_fake_tools {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[tokio::test]
        async fn concat_removes_list_on_success_and_failure() {
            let tmp = tempfile::tempdir().unwrap();
            let seg = tmp.path().join("chunk_000.mp3");
            std::fs::write(&seg, b"ID3").unwrap();
            let out = tmp.path().join("complete.mp3");

            // Copies the concat list to list.copy, then writes the output (last arg).
            let ok = script(
                tmp.path(),
                "ffmpeg-ok",
                r#"cp "$6" "$(dirname "$6")/list.copy"; for last; do :; done; printf mp3 > "$last""#,
            );
            let media = MediaConfig {
                ffmpeg_path: ok,
                ..MediaConfig::default()
            };
            concat_audio(&media, &[seg.clone()], &out).await.unwrap();
            assert!(out.exists());
            assert!(!tmp.path().join("filelist.txt").exists());
            let copied = std::fs::read_to_string(tmp.path().join("list.copy")).unwrap();
            assert!(copied.starts_with("file '/"));
            assert!(copied.ends_with("chunk_000.mp3'"));

            let bad = script(tmp.path(), "ffmpeg-bad", "echo 'Invalid data' >&2; exit 1");
            let media = MediaConfig {
                ffmpeg_path: bad,
                ..MediaConfig::default()
            };
            let err = concat_audio(&media, &[seg], &out).await.unwrap_err();
            assert!(err.to_string().contains("exited with code 1"), "got: {err}");
            assert!(!tmp.path().join("filelist.txt").exists());
        }

        #[tokio::test]
        async fn probe_reads_duration_from_tool() {
            let tmp = tempfile::tempdir().unwrap();
            let probe = script(
                tmp.path(),
                "ffprobe",
                r#"echo '{"format":{"duration":"61.250000"}}'"#,
            );
            let media = MediaConfig {
                ffprobe_path: probe,
                ..MediaConfig::default()
            };
            let d = probe_duration(&media, &tmp.path().join("complete.mp3"))
                .await
                .unwrap();
            assert_eq!(d, 61.25);
        }
    }
}
