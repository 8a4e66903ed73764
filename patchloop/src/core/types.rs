//! Shared types for the loop controller, tool executor and verification.
//!
//! These types carry no I/O and serialize to the stable shapes written into
//! `run_summary.json`.

use serde::{Deserialize, Serialize};

/// Result of executing one tool call. Exactly one of value or error exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "text", rename_all = "lowercase")]
pub enum ToolOutcome {
    Success(String),
    Failure(String),
}

impl ToolOutcome {
    pub fn success(value: impl Into<String>) -> Self {
        ToolOutcome::Success(value.into())
    }

    pub fn failure(message: impl Into<String>) -> Self {
        ToolOutcome::Failure(message.into())
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ToolOutcome::Failure(_))
    }

    /// Text handed back to the model: the value, or the error message.
    pub fn text(&self) -> &str {
        match self {
            ToolOutcome::Success(value) => value,
            ToolOutcome::Failure(message) => message,
        }
    }
}

/// Agent loop controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    Init,
    Running,
    Done,
    Aborted,
}

/// Why the loop left `Running`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// The model replied without tool invocations.
    Finished,
    /// `max_rounds` model calls were made and the model still wanted tools.
    RoundBudgetExhausted,
    /// The model gateway failed; no further model calls were made.
    GatewayError { message: String },
    /// The controller itself failed mid-loop (conversation invariant or log I/O).
    ControllerError { message: String },
}

/// Which verification run a capture belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationPhase {
    Pre,
    Post,
}

impl VerificationPhase {
    pub fn label(self) -> &'static str {
        match self {
            VerificationPhase::Pre => "pre-verification",
            VerificationPhase::Post => "post-verification",
        }
    }
}

/// Classified verification result.
///
/// A non-zero exit means the tests ran and failed. A harness error means the
/// command could not produce a verdict (spawn failure, timeout, signal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Passed,
    Failed,
    HarnessError,
}

impl VerificationStatus {
    pub fn classify(exit_code: Option<i32>, timed_out: bool) -> Self {
        match (exit_code, timed_out) {
            (_, true) | (None, false) => VerificationStatus::HarnessError,
            (Some(0), false) => VerificationStatus::Passed,
            (Some(_), false) => VerificationStatus::Failed,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            VerificationStatus::Passed => "PASSED",
            VerificationStatus::Failed => "FAILED",
            VerificationStatus::HarnessError => "HARNESS ERROR",
        }
    }
}
