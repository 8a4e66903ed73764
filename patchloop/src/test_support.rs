//! Test-only doubles: a scripted model gateway, a scripted verifier, and a
//! temporary git working copy.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::core::conversation::ContentBlock;
use crate::core::types::VerificationPhase;
use crate::io::gateway::{GatewayError, ModelGateway, ModelReply, ModelRequest, Usage};
use crate::io::verify::{VerificationCapture, Verifier, VerifyRequest};

/// One queued gateway response.
#[derive(Debug)]
pub struct ScriptedReply {
    result: Result<ModelReply, GatewayError>,
}

impl ScriptedReply {
    /// A reply with a single text block and no tool calls.
    pub fn text(text: &str) -> Self {
        Self::blocks(vec![ContentBlock::text(text)])
    }

    /// A reply invoking tools, given as `(id, name, input)`.
    pub fn tools(calls: Vec<(&str, &str, Value)>) -> Self {
        Self::blocks(
            calls
                .into_iter()
                .map(|(id, name, input)| ContentBlock::invocation(id, name, input))
                .collect(),
        )
    }

    pub fn blocks(content: Vec<ContentBlock>) -> Self {
        let stop_reason = if content
            .iter()
            .any(|block| matches!(block, ContentBlock::ToolInvocation { .. }))
        {
            "tool_use"
        } else {
            "end_turn"
        };
        let raw = json!({ "content": &content, "stop_reason": stop_reason });
        Self {
            result: Ok(ModelReply {
                stop_reason: Some(stop_reason.to_string()),
                content,
                usage: None,
                raw,
            }),
        }
    }

    pub fn error(err: GatewayError) -> Self {
        Self { result: Err(err) }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        if let Ok(reply) = &mut self.result {
            reply.usage = Some(usage);
        }
        self
    }
}

/// Gateway that replays queued replies in order. Once the queue is empty every
/// call fails with [`GatewayError::Malformed`].
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    queue: RefCell<VecDeque<ScriptedReply>>,
    calls: Cell<usize>,
    seen_turns: RefCell<Vec<usize>>,
}

impl ScriptedGateway {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            queue: RefCell::new(replies.into()),
            calls: Cell::new(0),
            seen_turns: RefCell::new(Vec::new()),
        }
    }

    /// Number of `send` calls made so far, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    /// Conversation length observed by each call.
    pub fn seen_turns(&self) -> Vec<usize> {
        self.seen_turns.borrow().clone()
    }
}

impl ModelGateway for ScriptedGateway {
    fn send(&self, request: &ModelRequest<'_>) -> Result<ModelReply, GatewayError> {
        self.calls.set(self.calls.get() + 1);
        self.seen_turns
            .borrow_mut()
            .push(request.conversation.len());
        match self.queue.borrow_mut().pop_front() {
            Some(reply) => reply.result,
            None => Err(GatewayError::Malformed(
                "scripted gateway exhausted".to_string(),
            )),
        }
    }
}

/// One queued verification result.
#[derive(Debug, Clone)]
pub struct ScriptedVerification {
    pub output: String,
    pub exit_code: Option<i32>,
}

impl ScriptedVerification {
    pub fn failed(output: &str) -> Self {
        Self {
            output: output.to_string(),
            exit_code: Some(1),
        }
    }

    pub fn passed(output: &str) -> Self {
        Self {
            output: output.to_string(),
            exit_code: Some(0),
        }
    }
}

/// Verifier that returns queued results and records the phases it ran.
#[derive(Debug, Default)]
pub struct ScriptedVerifier {
    queue: RefCell<VecDeque<ScriptedVerification>>,
    phases: RefCell<Vec<VerificationPhase>>,
}

impl ScriptedVerifier {
    pub fn new(results: Vec<ScriptedVerification>) -> Self {
        Self {
            queue: RefCell::new(results.into()),
            phases: RefCell::new(Vec::new()),
        }
    }

    pub fn phases(&self) -> Vec<VerificationPhase> {
        self.phases.borrow().clone()
    }
}

impl Verifier for ScriptedVerifier {
    fn verify(&self, request: &VerifyRequest<'_>) -> VerificationCapture {
        self.phases.borrow_mut().push(request.phase);
        let scripted = self
            .queue
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| ScriptedVerification::passed(""));
        VerificationCapture {
            phase: request.phase,
            output: scripted.output,
            exit_code: scripted.exit_code,
            timed_out: false,
        }
    }
}

/// Temporary git repository with one commit, used as a working copy.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    /// Create a repository containing `files` (relative path, contents), committed.
    pub fn with_files(files: &[(&str, &str)]) -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp repo")?;
        let repo = Self { dir };
        repo.git(&["init", "-q"])?;
        repo.git(&["config", "user.email", "agent@example.com"])?;
        repo.git(&["config", "user.name", "agent"])?;
        for (path, contents) in files {
            repo.write(path, contents)?;
        }
        repo.git(&["add", "-A"])?;
        repo.git(&["commit", "-q", "--allow-empty", "-m", "init"])?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, path: &str, contents: &str) -> Result<()> {
        let full = self.path().join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&full, contents).with_context(|| format!("write {}", full.display()))
    }

    pub fn read(&self, path: &str) -> Result<String> {
        let full = self.path().join(path);
        fs::read_to_string(&full).with_context(|| format!("read {}", full.display()))
    }

    fn git(&self, args: &[&str]) -> Result<()> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(())
    }
}
