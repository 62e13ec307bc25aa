//! External process execution for the media tools.
//!
//! Every ffmpeg/ffprobe call goes through [`run_tool`]: spawn, await, capture
//! both streams, map a non-zero exit to [`ToolError::Exit`]. The child is
//! killed if the awaiting future is dropped.

use crate::error::ToolError;
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Captured output of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Run `program` with `args` to completion.
///
/// Exit code 0 is success. Anything else becomes [`ToolError::Exit`] carrying
/// the tail of stderr.
pub async fn run_tool<I, S>(program: &Path, args: I) -> Result<CommandOutput, ToolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let tool = tool_name(program);
    let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
    debug!(
        "Running {} {}",
        program.display(),
        args.iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    );

    let output = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ToolError::Spawn {
            tool: tool.clone(),
            source,
        })?;

    let result = CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        code: output.status.code(),
    };

    if !result.success() {
        let stderr = stderr_tail(&result.stderr, 20);
        warn!(tool = %tool, code = ?result.code, "{} failed: {}", tool, stderr);
        return Err(ToolError::Exit {
            tool,
            code: result.code,
            stderr,
        });
    }

    Ok(result)
}

/// File name of the program, for messages (`/usr/bin/ffmpeg` → `ffmpeg`).
fn tool_name(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}

/// Last `lines` non-empty lines of a stderr dump. ffmpeg prints its banner
/// first and the actual error last.
fn stderr_tail(stderr: &str, lines: usize) -> String {
    let kept: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = kept.len().saturating_sub(lines);
    kept[start..].join("\n")
}
