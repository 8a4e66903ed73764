//! Agent loop controller: alternates model calls with tool dispatch.
//!
//! The controller owns the conversation for the duration of [`AgentLoop::run`].
//! Each round makes one model call (plus configured retries), appends the reply
//! as an assistant turn, executes every tool invocation in listed order, and
//! appends all results as one user turn. The loop ends when a reply has no
//! invocations, when the round budget is spent, or when the gateway fails.

use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::core::conversation::{ContentBlock, Conversation, Turn, TurnContent};
use crate::core::tools::{ToolCall, ToolSpec};
use crate::core::types::{LoopState, StopReason, ToolOutcome};
use crate::io::config::AgentConfig;
use crate::io::gateway::{GatewayError, ModelGateway, ModelReply, ModelRequest, Usage};
use crate::io::tools::ToolExecutor;
use crate::io::transcript::{LogRecord, Transcript};

/// Logged as the request content when the last user turn carries tool results.
const TOOL_INPUT_PLACEHOLDER: &str = "Tool input";
/// Logged as the response content when the reply has no text.
const TOOL_EXECUTION_PLACEHOLDER: &str = "[Tool Use Execution]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    pub max_rounds: u32,
    pub gateway_retries: u32,
    /// Delay before retry `n` is `n * retry_backoff`.
    pub retry_backoff: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_rounds: 12,
            gateway_retries: 0,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

impl LoopConfig {
    /// Delay before retry `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_backoff.saturating_mul(attempt)
    }
}

impl From<&AgentConfig> for LoopConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_rounds: config.max_rounds,
            gateway_retries: config.gateway_retries,
            retry_backoff: Duration::from_millis(config.gateway_retry_backoff_ms),
        }
    }
}

/// Summary of a finished loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub state: LoopState,
    pub stop: StopReason,
    /// Rounds that issued a model call, including the failing one on abort.
    pub rounds: u32,
    pub usage: Usage,
}

pub struct AgentLoop<'a, G: ModelGateway> {
    gateway: &'a G,
    executor: ToolExecutor<'a>,
    transcript: &'a Transcript,
    system_prompt: &'a str,
    tools: &'a [ToolSpec],
    config: LoopConfig,
    state: LoopState,
    rounds: u32,
    usage: Usage,
}

impl<'a, G: ModelGateway> AgentLoop<'a, G> {
    pub fn new(
        gateway: &'a G,
        executor: ToolExecutor<'a>,
        transcript: &'a Transcript,
        system_prompt: &'a str,
        tools: &'a [ToolSpec],
        config: LoopConfig,
    ) -> Self {
        Self {
            gateway,
            executor,
            transcript,
            system_prompt,
            tools,
            config,
            state: LoopState::Init,
            rounds: 0,
            usage: Usage::default(),
        }
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    /// Drive the conversation to a terminal state.
    ///
    /// `conversation` must end with a user turn. Gateway failures end the loop
    /// as [`LoopState::Aborted`] and are reported in the outcome. An `Err` is
    /// returned when the conversation itself cannot be extended, or when the
    /// loop has already been started.
    #[instrument(skip_all, fields(max_rounds = self.config.max_rounds))]
    pub fn run(&mut self, workdir: &Path, conversation: &mut Conversation) -> Result<LoopOutcome> {
        if self.state != LoopState::Init {
            bail!("agent loop already started (state {:?})", self.state);
        }
        self.state = LoopState::Running;

        while self.rounds < self.config.max_rounds {
            self.rounds += 1;
            info!(round = self.rounds, "requesting model reply");

            let request = ModelRequest {
                system_prompt: self.system_prompt,
                conversation: &*conversation,
                tools: self.tools,
            };
            let reply = match self.send_with_retries(&request) {
                Ok(reply) => reply,
                Err(err) => {
                    warn!(round = self.rounds, err = %err, "model gateway failed, aborting loop");
                    return Ok(self.finish(
                        LoopState::Aborted,
                        StopReason::GatewayError {
                            message: err.to_string(),
                        },
                    ));
                }
            };
            self.record_response(conversation, &reply)?;

            let assistant = Turn::assistant_blocks(reply.content);
            let invocations: Vec<(String, String, Value)> = assistant
                .tool_invocations()
                .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
                .collect();
            conversation
                .push(assistant)
                .context("append assistant turn")?;

            if invocations.is_empty() {
                info!(round = self.rounds, "model finished without tool calls");
                return Ok(self.finish(LoopState::Done, StopReason::Finished));
            }

            let results: Vec<ContentBlock> = invocations
                .iter()
                .map(|(id, name, input)| self.execute(workdir, id, name, input))
                .collect();
            conversation
                .push(Turn::user_blocks(results))
                .context("append tool results")?;
        }

        info!(rounds = self.rounds, "round budget exhausted");
        Ok(self.finish(LoopState::Done, StopReason::RoundBudgetExhausted))
    }

    fn finish(&mut self, state: LoopState, stop: StopReason) -> LoopOutcome {
        self.state = state;
        LoopOutcome {
            state,
            stop,
            rounds: self.rounds,
            usage: self.usage,
        }
    }

    fn send_with_retries(&mut self, request: &ModelRequest<'_>) -> Result<ModelReply, GatewayError> {
        let mut attempt = 0u32;
        loop {
            self.record_request(request.conversation);
            match self.gateway.send(request) {
                Ok(reply) => {
                    if let Some(usage) = reply.usage {
                        self.usage.input_tokens += usage.input_tokens;
                        self.usage.output_tokens += usage.output_tokens;
                    }
                    return Ok(reply);
                }
                Err(err) if err.is_retryable() && attempt < self.config.gateway_retries => {
                    attempt += 1;
                    let delay = self.config.backoff(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        err = %err,
                        "retrying model request"
                    );
                    thread::sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Parse and run one invocation. Rejected calls become error results.
    fn execute(&self, workdir: &Path, id: &str, name: &str, input: &Value) -> ContentBlock {
        let outcome = match ToolCall::parse(name, input) {
            Ok(call) => self.executor.dispatch(workdir, &call),
            Err(err) => {
                warn!(tool = name, err = %err, "rejected tool call");
                self.transcript.record(&LogRecord::ToolUse {
                    tool: name.to_string(),
                    args: input.clone(),
                });
                ToolOutcome::failure(err.to_string())
            }
        };
        ContentBlock::ToolResult {
            tool_use_id: id.to_string(),
            is_error: outcome.is_failure(),
            content: outcome.text().to_string(),
        }
    }

    fn record_request(&self, conversation: &Conversation) {
        let content = match conversation.last().map(|turn| &turn.content) {
            Some(TurnContent::Text(text)) => text.clone(),
            _ => TOOL_INPUT_PLACEHOLDER.to_string(),
        };
        self.transcript.record(&LogRecord::Request { content });
    }

    fn record_response(&self, conversation: &Conversation, reply: &ModelReply) -> Result<()> {
        let text: String = reply
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        let content = if text.is_empty() {
            TOOL_EXECUTION_PLACEHOLDER.to_string()
        } else {
            text
        };
        self.transcript.record(&LogRecord::Response { content });

        let request = serde_json::to_value(conversation).context("serialize conversation")?;
        self.transcript.capture_exchange(&request, &reply.raw);
        Ok(())
    }
}
