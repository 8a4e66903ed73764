//! Tool executor: runs parsed tool calls against a working directory.
//!
//! The executor keeps no state between calls. The working directory is passed
//! to every operation, and each operation writes its `tool_use` record before
//! touching the filesystem or spawning a process. Failures are returned as
//! [`ToolOutcome::Failure`] values, never as errors.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::tools::ToolCall;
use crate::core::types::ToolOutcome;
use crate::io::process::{run_command, shell_command};
use crate::io::transcript::{LogRecord, Transcript};

/// Fixed success marker for file mutations.
pub const SUCCESS_MARKER: &str = "success";

/// Process limits applied to `run_shell`.
#[derive(Debug, Clone, Copy)]
pub struct ShellLimits {
    /// `None` waits for the command indefinitely.
    pub timeout: Option<Duration>,
    pub output_limit_bytes: usize,
}

impl Default for ShellLimits {
    fn default() -> Self {
        Self {
            timeout: None,
            output_limit_bytes: 1_000_000,
        }
    }
}

pub struct ToolExecutor<'a> {
    transcript: &'a Transcript,
    limits: ShellLimits,
}

impl<'a> ToolExecutor<'a> {
    pub fn new(transcript: &'a Transcript, limits: ShellLimits) -> Self {
        Self { transcript, limits }
    }

    /// Execute one parsed call. The `tool_use` record is written before the call runs.
    #[instrument(skip_all, fields(tool = call.kind().name()))]
    pub fn dispatch(&self, root: &Path, call: &ToolCall) -> ToolOutcome {
        self.transcript.record(&LogRecord::ToolUse {
            tool: call.kind().name().to_string(),
            args: call.audit_args(),
        });
        let started = Instant::now();
        let outcome = match call {
            ToolCall::RunShell { command } => self.run_shell(root, command),
            ToolCall::ReadFile { path } => self.read_file(root, path),
            ToolCall::WriteFile { path, content } => self.write_file(root, path, content),
            ToolCall::EditFile {
                path,
                old_str,
                new_str,
            } => self.edit_file(root, path, old_str, new_str),
        };
        debug!(
            failed = outcome.is_failure(),
            duration_ms = started.elapsed().as_millis() as u64,
            "tool call finished"
        );
        outcome
    }

    /// Run `command` via `sh -c` in `root`. A non-zero exit is a normal value.
    fn run_shell(&self, root: &Path, command: &str) -> ToolOutcome {
        let output = match run_command(
            shell_command(command, root),
            self.limits.timeout,
            self.limits.output_limit_bytes,
        ) {
            Ok(output) => output,
            Err(err) => return ToolOutcome::failure(format!("{err:#}")),
        };
        let mut value = output.combined();
        if !value.is_empty() && !value.ends_with('\n') {
            value.push('\n');
        }
        match output.exit_code() {
            Some(code) => value.push_str(&format!("[exit code: {code}]")),
            None => value.push_str("[exit code: signal]"),
        }
        ToolOutcome::Success(value)
    }

    fn read_file(&self, root: &Path, path: &str) -> ToolOutcome {
        let full_path = resolve(root, path);
        match fs::read_to_string(&full_path) {
            Ok(contents) => ToolOutcome::Success(contents),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                ToolOutcome::failure(format!("file {path} not found"))
            }
            Err(err) => ToolOutcome::failure(format!("read {path}: {err}")),
        }
    }

    fn write_file(&self, root: &Path, path: &str, content: &str) -> ToolOutcome {
        let full_path = resolve(root, path);
        match write_atomic(&full_path, content) {
            Ok(()) => ToolOutcome::success(SUCCESS_MARKER),
            Err(err) => ToolOutcome::failure(format!("{err:#}")),
        }
    }

    /// Replace every occurrence of `old_str`. Absent anchors leave the file untouched.
    fn edit_file(&self, root: &Path, path: &str, old_str: &str, new_str: &str) -> ToolOutcome {
        if old_str.is_empty() {
            return ToolOutcome::failure("old_str must not be empty");
        }
        let full_path = resolve(root, path);
        let contents = match fs::read_to_string(&full_path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return ToolOutcome::failure(format!("file {path} not found"));
            }
            Err(err) => return ToolOutcome::failure(format!("read {path}: {err}")),
        };
        if !contents.contains(old_str) {
            return ToolOutcome::failure("target string not found");
        }
        let updated = contents.replace(old_str, new_str);
        match write_atomic(&full_path, &updated) {
            Ok(()) => ToolOutcome::success(SUCCESS_MARKER),
            Err(err) => ToolOutcome::failure(format!("{err:#}")),
        }
    }
}

/// Resolve `path` against `root` unless it is absolute.
pub fn resolve(root: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    }
}

/// Write via a sibling temp file and rename, creating parent directories first.
///
/// Symlinks are written through to their target, and an existing file keeps
/// its permission bits.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let resolved;
    let path = match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => {
            resolved = fs::canonicalize(path)
                .with_context(|| format!("resolve symlink {}", path.display()))?;
            resolved.as_path()
        }
        _ => path,
    };
    let permissions = fs::metadata(path).ok().map(|meta| meta.permissions());
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let file_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".patchloop.tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    let applied = permissions.map_or(Ok(()), |perms| fs::set_permissions(&tmp_path, perms));
    if let Err(err) = applied {
        let _ = fs::remove_file(&tmp_path);
        return Err(err).with_context(|| format!("copy permissions onto {}", tmp_path.display()));
    }
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err).with_context(|| format!("replace {}", path.display()));
    }
    Ok(())
}
