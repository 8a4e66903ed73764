//! Verify → fix → verify pipeline for one task.
//!
//! Preconditions are checked before anything touches the working copy. Once
//! they pass, the pipeline always runs post-verification and writes every
//! artifact, whatever happened inside the agent loop.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::agent_loop::{AgentLoop, LoopConfig, LoopOutcome};
use crate::core::conversation::{Conversation, validate_tool_pairing};
use crate::core::tools::tool_manifest;
use crate::core::types::{LoopState, StopReason, VerificationPhase};
use crate::io::artifacts::{
    ArtifactPaths, RunSummary, changed_files, write_patch, write_session_transcript,
    write_summary, write_verification,
};
use crate::io::config::AgentConfig;
use crate::io::gateway::{ModelGateway, Usage};
use crate::io::prompt::PromptEngine;
use crate::io::task::{TaskDescriptor, load_task};
use crate::io::tools::{ShellLimits, ToolExecutor};
use crate::io::transcript::Transcript;
use crate::io::verify::{VerificationCapture, Verifier, VerifyRequest};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Conditions that stop a run before any verification or model call.
#[derive(Debug, Error)]
pub enum PreconditionError {
    #[error("{var} not set")]
    MissingCredential { var: String },
    #[error("task file {path} unreadable: {message}")]
    TaskUnreadable { path: PathBuf, message: String },
    #[error("working directory {path} does not exist")]
    MissingWorkdir { path: PathBuf },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Everything a run needs once its preconditions hold.
#[derive(Debug, Clone)]
pub struct Preflight {
    pub task: TaskDescriptor,
    pub api_key: Option<String>,
}

/// Validate the config and credential first, then the task file and working directory.
///
/// `api_key` is the raw value of the configured credential variable. With
/// `require_credential = false` a missing key is allowed (used by `check`).
pub fn check_preconditions(
    config: &AgentConfig,
    task_path: &Path,
    workdir: &Path,
    api_key: Option<String>,
    require_credential: bool,
) -> Result<Preflight, PreconditionError> {
    config
        .validate()
        .map_err(|err| PreconditionError::InvalidConfig(format!("{err:#}")))?;
    let api_key = api_key
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty());
    if require_credential && api_key.is_none() {
        return Err(PreconditionError::MissingCredential {
            var: config.api_key_env.clone(),
        });
    }
    let task = load_task(task_path).map_err(|err| PreconditionError::TaskUnreadable {
        path: task_path.to_path_buf(),
        message: format!("{err:#}"),
    })?;
    if !workdir.is_dir() {
        return Err(PreconditionError::MissingWorkdir {
            path: workdir.to_path_buf(),
        });
    }
    Ok(Preflight { task, api_key })
}

/// Inputs for [`run_pipeline`].
#[derive(Debug, Clone, Copy)]
pub struct PipelineRequest<'a> {
    pub task: &'a TaskDescriptor,
    pub workdir: &'a Path,
    pub out_dir: &'a Path,
    pub config: &'a AgentConfig,
}

#[derive(Debug)]
pub struct PipelineOutcome {
    pub loop_outcome: LoopOutcome,
    pub pre: VerificationCapture,
    pub post: VerificationCapture,
    pub conversation: Conversation,
    pub summary: RunSummary,
    pub paths: ArtifactPaths,
    /// Artifact writes that failed. Every other artifact was still attempted.
    pub artifact_errors: Vec<String>,
}

/// Run pre-verification, the agent loop, post-verification and artifact emission.
///
/// `on_verified` is called after each verification run. An `Err` is returned
/// only when the run cannot start (log files or prompts); from the first
/// verification on, problems are recorded in the outcome instead.
#[instrument(skip_all, fields(task = %request.task.title))]
pub fn run_pipeline<G: ModelGateway, V: Verifier, F: FnMut(&VerificationCapture)>(
    request: &PipelineRequest<'_>,
    gateway: &G,
    verifier: &V,
    mut on_verified: F,
) -> Result<PipelineOutcome> {
    let started_at = Utc::now();
    let started = Instant::now();
    let config = request.config;
    let transcript = Transcript::create(request.out_dir)?;
    let paths = ArtifactPaths::new(request.out_dir);
    let tools = tool_manifest();
    let engine = PromptEngine::new();
    let workdir_label = config
        .working_dir_label
        .clone()
        .unwrap_or_else(|| request.workdir.display().to_string());
    let system_prompt = engine.render_system(request.task, &workdir_label, &tools)?;

    let mut artifact_errors = Vec::new();
    let mut record = |result: Result<()>| {
        if let Err(err) = result {
            error!(err = %format!("{err:#}"), "artifact write failed");
            artifact_errors.push(format!("{err:#}"));
        }
    };

    let pre = verifier.verify(&VerifyRequest {
        phase: VerificationPhase::Pre,
        command: &request.task.verification_command,
        workdir: request.workdir,
    });
    on_verified(&pre);
    record(write_verification(&paths, &pre));

    let mut conversation = Conversation::seeded(engine.render_seed(&pre.output)?);
    let executor = ToolExecutor::new(
        &transcript,
        ShellLimits {
            timeout: config.shell_timeout(),
            output_limit_bytes: config.output_limit_bytes,
        },
    );
    let mut agent = AgentLoop::new(
        gateway,
        executor,
        &transcript,
        &system_prompt,
        &tools,
        LoopConfig::from(config),
    );
    let loop_outcome = match agent.run(request.workdir, &mut conversation) {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(err = %format!("{err:#}"), "agent loop failed");
            LoopOutcome {
                state: LoopState::Aborted,
                stop: StopReason::ControllerError {
                    message: format!("{err:#}"),
                },
                rounds: agent.rounds(),
                usage: agent.usage(),
            }
        }
    };
    info!(
        state = ?loop_outcome.state,
        rounds = loop_outcome.rounds,
        "agent loop finished"
    );
    for problem in validate_tool_pairing(&conversation) {
        warn!(problem = %problem, "conversation tool pairing");
    }

    let post = verifier.verify(&VerifyRequest {
        phase: VerificationPhase::Post,
        command: &request.task.verification_command,
        workdir: request.workdir,
    });
    on_verified(&post);
    record(write_verification(&paths, &post));

    let patch_bytes = match write_patch(&paths, request.workdir) {
        Ok(patch) => patch.len(),
        Err(err) => {
            record(Err(err));
            0
        }
    };
    record(write_session_transcript(&paths, &conversation));

    let finished_at = Utc::now();
    let summary = RunSummary {
        task: request.task.title.clone(),
        model: config.model.clone(),
        rounds: loop_outcome.rounds,
        max_rounds: config.max_rounds,
        state: loop_outcome.state,
        stop: loop_outcome.stop.clone(),
        pre_verification: (&pre).into(),
        post_verification: (&post).into(),
        files_changed: changed_files(request.workdir),
        patch_bytes,
        usage: loop_outcome.usage,
        started_at: started_at.format(TIMESTAMP_FORMAT).to_string(),
        finished_at: finished_at.format(TIMESTAMP_FORMAT).to_string(),
        duration_ms: started.elapsed().as_millis() as u64,
    };
    record(write_summary(&paths, &summary));

    Ok(PipelineOutcome {
        loop_outcome,
        pre,
        post,
        conversation,
        summary,
        paths,
        artifact_errors,
    })
}

/// Sum of token usage, for display.
pub fn format_usage(usage: Usage) -> String {
    format!(
        "{} input / {} output tokens",
        usage.input_tokens, usage.output_tokens
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const TASK: &str = "description: fix foo\ntests:\n  test_command: pytest -k test_foo\n";

    #[test]
    fn missing_credential_is_reported_with_variable_name() {
        let temp = tempfile::tempdir().expect("tempdir");
        let task_path = temp.path().join("task.yaml");
        fs::write(&task_path, TASK).expect("write");

        let err = check_preconditions(
            &AgentConfig::default(),
            &task_path,
            temp.path(),
            Some("   ".to_string()),
            true,
        )
        .expect_err("blank key");
        assert_eq!(err.to_string(), "ANTHROPIC_API_KEY not set");
    }

    #[test]
    fn unreadable_task_and_missing_workdir_are_preconditions() {
        let temp = tempfile::tempdir().expect("tempdir");
        let key = Some("sk-ant-test".to_string());

        let err = check_preconditions(
            &AgentConfig::default(),
            &temp.path().join("missing.yaml"),
            temp.path(),
            key.clone(),
            true,
        )
        .expect_err("missing task");
        assert!(matches!(err, PreconditionError::TaskUnreadable { .. }));

        let task_path = temp.path().join("task.yaml");
        fs::write(&task_path, TASK).expect("write");
        let err = check_preconditions(
            &AgentConfig::default(),
            &task_path,
            &temp.path().join("testbed"),
            key,
            true,
        )
        .expect_err("missing workdir");
        assert!(matches!(err, PreconditionError::MissingWorkdir { .. }));
    }

    #[test]
    fn check_mode_allows_a_missing_credential() {
        let temp = tempfile::tempdir().expect("tempdir");
        let task_path = temp.path().join("task.yaml");
        fs::write(&task_path, TASK).expect("write");

        let preflight =
            check_preconditions(&AgentConfig::default(), &task_path, temp.path(), None, false)
                .expect("preflight");
        assert_eq!(preflight.api_key, None);
        assert_eq!(preflight.task.verification_command, "pytest -k test_foo");
    }

    #[test]
    fn invalid_config_is_a_precondition() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = AgentConfig {
            max_rounds: 0,
            ..AgentConfig::default()
        };
        let err = check_preconditions(
            &config,
            &temp.path().join("task.yaml"),
            temp.path(),
            Some("key".to_string()),
            true,
        )
        .expect_err("invalid config");
        assert!(matches!(err, PreconditionError::InvalidConfig(_)));
    }
}
