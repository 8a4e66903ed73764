//! End-of-run artifacts written to the output directory.
//!
//! Each artifact is written once per run at a fixed name, replacing any file
//! left by a previous run.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::core::conversation::{Conversation, TurnContent};
use crate::core::types::{LoopState, StopReason, VerificationPhase, VerificationStatus};
use crate::io::gateway::Usage;
use crate::io::git::Git;
use crate::io::verify::VerificationCapture;

pub const PRE_VERIFICATION_LOG: &str = "pre_verification.log";
pub const POST_VERIFICATION_LOG: &str = "post_verification.log";
pub const CHANGES_PATCH: &str = "changes.patch";
pub const SESSION_TRANSCRIPT: &str = "prompts.md";
pub const RUN_SUMMARY: &str = "run_summary.json";

#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub dir: PathBuf,
    pub pre_verification: PathBuf,
    pub post_verification: PathBuf,
    pub patch: PathBuf,
    pub transcript: PathBuf,
    pub summary: PathBuf,
}

impl ArtifactPaths {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            pre_verification: dir.join(PRE_VERIFICATION_LOG),
            post_verification: dir.join(POST_VERIFICATION_LOG),
            patch: dir.join(CHANGES_PATCH),
            transcript: dir.join(SESSION_TRANSCRIPT),
            summary: dir.join(RUN_SUMMARY),
        }
    }

    pub fn verification(&self, phase: VerificationPhase) -> &Path {
        match phase {
            VerificationPhase::Pre => &self.pre_verification,
            VerificationPhase::Post => &self.post_verification,
        }
    }
}

/// Write the raw combined output of a verification run.
pub fn write_verification(paths: &ArtifactPaths, capture: &VerificationCapture) -> Result<()> {
    write_text(paths.verification(capture.phase), &capture.output)
}

/// Capture `git diff` of the working copy, untracked files included, into `changes.patch`.
///
/// A working copy that cannot be diffed yields an empty patch; the failure is
/// only reported through tracing. Returns the patch text.
pub fn write_patch(paths: &ArtifactPaths, workdir: &Path) -> Result<String> {
    let patch = match Git::new(workdir).diff() {
        Ok(patch) => patch,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "git diff failed, writing empty patch");
            String::new()
        }
    };
    write_text(&paths.patch, &patch)?;
    Ok(patch)
}

/// Files reported by `git status`, or an empty list when git is unavailable.
pub fn changed_files(workdir: &Path) -> Vec<String> {
    match Git::new(workdir).status_porcelain() {
        Ok(entries) => entries.into_iter().map(|entry| entry.path).collect(),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "git status failed");
            Vec::new()
        }
    }
}

/// Markdown rendering of every turn, in order, with pretty-printed content.
pub fn render_session_transcript(conversation: &Conversation) -> Result<String> {
    let mut out = String::from("# Autonomous Agent Session history\n\n");
    for turn in conversation.turns() {
        let content = match &turn.content {
            TurnContent::Text(text) => serde_json::to_string_pretty(text),
            TurnContent::Blocks(blocks) => serde_json::to_string_pretty(blocks),
        }
        .context("serialize turn content")?;
        let _ = write!(
            out,
            "## {}\n\n{content}\n\n",
            turn.role.as_str().to_uppercase()
        );
    }
    Ok(out)
}

pub fn write_session_transcript(paths: &ArtifactPaths, conversation: &Conversation) -> Result<()> {
    let rendered = render_session_transcript(conversation)?;
    write_text(&paths.transcript, &rendered)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationSummary {
    pub status: VerificationStatus,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl From<&VerificationCapture> for VerificationSummary {
    fn from(capture: &VerificationCapture) -> Self {
        Self {
            status: capture.status(),
            exit_code: capture.exit_code,
            timed_out: capture.timed_out,
        }
    }
}

/// Machine-readable overview of one run (`run_summary.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub task: String,
    pub model: String,
    pub rounds: u32,
    pub max_rounds: u32,
    pub state: LoopState,
    pub stop: StopReason,
    pub pre_verification: VerificationSummary,
    pub post_verification: VerificationSummary,
    pub files_changed: Vec<String>,
    pub patch_bytes: usize,
    pub usage: Usage,
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: u64,
}

pub fn write_summary(paths: &ArtifactPaths, summary: &RunSummary) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(summary).context("serialize run summary")?;
    buf.push('\n');
    write_text(&paths.summary, &buf)?;
    info!(path = %paths.summary.display(), "run summary written");
    Ok(())
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::conversation::{ContentBlock, Turn};
    use serde_json::json;

    #[test]
    fn artifact_paths_are_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ArtifactPaths::new(temp.path());
        assert!(paths.pre_verification.ends_with("pre_verification.log"));
        assert!(paths.post_verification.ends_with("post_verification.log"));
        assert!(paths.patch.ends_with("changes.patch"));
        assert!(paths.transcript.ends_with("prompts.md"));
        assert!(paths.summary.ends_with("run_summary.json"));
        assert_eq!(
            paths.verification(VerificationPhase::Post),
            paths.post_verification.as_path()
        );
    }

    #[test]
    fn verification_output_replaces_previous_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ArtifactPaths::new(temp.path());
        fs::write(&paths.pre_verification, "stale output from an older run").expect("write");

        write_verification(
            &paths,
            &VerificationCapture {
                phase: VerificationPhase::Pre,
                output: "1 failed".to_string(),
                exit_code: Some(1),
                timed_out: false,
            },
        )
        .expect("write");
        assert_eq!(
            fs::read_to_string(&paths.pre_verification).expect("read"),
            "1 failed"
        );
    }

    #[test]
    fn patch_outside_git_is_empty() {
        let work = tempfile::tempdir().expect("workdir");
        let out = tempfile::tempdir().expect("outdir");
        let paths = ArtifactPaths::new(out.path());

        let patch = write_patch(&paths, work.path()).expect("write");
        assert_eq!(patch, "");
        assert_eq!(fs::read_to_string(&paths.patch).expect("read"), "");
        assert!(changed_files(work.path()).is_empty());
    }

    #[test]
    fn transcript_lists_every_turn_in_order() {
        let mut conversation = Conversation::seeded("fix it");
        conversation
            .push(Turn::assistant_blocks(vec![ContentBlock::invocation(
                "tu_1",
                "read_file",
                json!({"path": "a.py"}),
            )]))
            .expect("push");
        conversation
            .push(Turn::user_blocks(vec![ContentBlock::ToolResult {
                tool_use_id: "tu_1".to_string(),
                content: "x = 1".to_string(),
                is_error: false,
            }]))
            .expect("push");

        let rendered = render_session_transcript(&conversation).expect("render");
        assert!(rendered.starts_with("# Autonomous Agent Session history\n\n## USER\n\n\"fix it\"\n\n"));
        let user = rendered.find("## USER").expect("user");
        let assistant = rendered.find("## ASSISTANT").expect("assistant");
        let last_user = rendered.rfind("## USER").expect("user");
        assert!(user < assistant && assistant < last_user);
        assert!(rendered.contains("\"tool_use_id\": \"tu_1\""));
    }

    #[test]
    fn summary_serializes_status_and_stop_reason() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ArtifactPaths::new(temp.path());
        let verification = VerificationSummary {
            status: VerificationStatus::Failed,
            exit_code: Some(1),
            timed_out: false,
        };
        let summary = RunSummary {
            task: "demo".to_string(),
            model: "claude-3-5-sonnet-20241022".to_string(),
            rounds: 3,
            max_rounds: 12,
            state: LoopState::Aborted,
            stop: StopReason::GatewayError {
                message: "transport error: reset".to_string(),
            },
            pre_verification: verification.clone(),
            post_verification: verification,
            files_changed: vec!["foo.py".to_string()],
            patch_bytes: 0,
            usage: Usage::default(),
            started_at: "2024-01-01T00:00:00Z".to_string(),
            finished_at: "2024-01-01T00:01:00Z".to_string(),
            duration_ms: 60_000,
        };
        write_summary(&paths, &summary).expect("write");

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&paths.summary).expect("read"))
                .expect("json");
        assert_eq!(value["state"], json!("aborted"));
        assert_eq!(
            value["stop"],
            json!({"reason": "gateway_error", "message": "transport error: reset"})
        );
        assert_eq!(value["pre_verification"]["status"], json!("failed"));
    }
}
