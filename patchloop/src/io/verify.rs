//! Verification runner: executes the task's test command in the working copy.

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use crate::core::types::{VerificationPhase, VerificationStatus};
use crate::io::process::{run_command, shell_command};

/// One verification run.
#[derive(Debug, Clone, Copy)]
pub struct VerifyRequest<'a> {
    pub phase: VerificationPhase,
    pub command: &'a str,
    pub workdir: &'a Path,
}

/// Captured output of one verification run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationCapture {
    pub phase: VerificationPhase,
    /// Combined stdout and stderr. On spawn failure, the error text.
    pub output: String,
    /// `None` when the command was killed or could not be started.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl VerificationCapture {
    pub fn status(&self) -> VerificationStatus {
        VerificationStatus::classify(self.exit_code, self.timed_out)
    }

    /// Human-readable line, e.g. `pre-verification: FAILED (exit 1)`.
    pub fn banner(&self) -> String {
        let detail = match (self.exit_code, self.timed_out) {
            (_, true) => "timed out".to_string(),
            (Some(code), false) => format!("exit {code}"),
            (None, false) => "no exit code".to_string(),
        };
        format!(
            "{}: {} ({detail})",
            self.phase.label(),
            self.status().label()
        )
    }
}

/// Runs the verification command. Never fails: problems running the command
/// are part of the capture.
pub trait Verifier {
    fn verify(&self, request: &VerifyRequest<'_>) -> VerificationCapture;
}

/// Runs the command through `sh -c` with the configured limits.
#[derive(Debug, Clone, Copy)]
pub struct ShellVerifier {
    pub timeout: Option<Duration>,
    pub output_limit_bytes: usize,
}

impl Verifier for ShellVerifier {
    #[instrument(skip_all, fields(phase = request.phase.label()))]
    fn verify(&self, request: &VerifyRequest<'_>) -> VerificationCapture {
        info!(command = request.command, "running {}", request.phase.label());
        let started = Instant::now();
        let capture = match run_command(
            shell_command(request.command, request.workdir),
            self.timeout,
            self.output_limit_bytes,
        ) {
            Ok(output) => VerificationCapture {
                phase: request.phase,
                output: output.combined(),
                exit_code: output.exit_code(),
                timed_out: output.timed_out,
            },
            Err(err) => {
                warn!(err = %format!("{err:#}"), "verification command could not run");
                VerificationCapture {
                    phase: request.phase,
                    output: format!("{err:#}"),
                    exit_code: None,
                    timed_out: false,
                }
            }
        };
        info!(
            duration_ms = started.elapsed().as_millis() as u64,
            "{}",
            capture.banner()
        );
        capture
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> ShellVerifier {
        ShellVerifier {
            timeout: None,
            output_limit_bytes: 1024,
        }
    }

    #[test]
    fn failing_command_is_captured_not_raised() {
        let temp = tempfile::tempdir().expect("tempdir");
        let capture = verifier().verify(&VerifyRequest {
            phase: VerificationPhase::Pre,
            command: "echo 'FAILED test_foo'; exit 1",
            workdir: temp.path(),
        });
        assert_eq!(capture.output, "FAILED test_foo\n");
        assert_eq!(capture.exit_code, Some(1));
        assert_eq!(capture.status(), VerificationStatus::Failed);
        assert_eq!(capture.banner(), "pre-verification: FAILED (exit 1)");
    }

    #[test]
    fn passing_command_reports_passed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let capture = verifier().verify(&VerifyRequest {
            phase: VerificationPhase::Post,
            command: "true",
            workdir: temp.path(),
        });
        assert_eq!(capture.banner(), "post-verification: PASSED (exit 0)");
    }

    #[test]
    fn missing_workdir_is_a_harness_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let capture = verifier().verify(&VerifyRequest {
            phase: VerificationPhase::Post,
            command: "true",
            workdir: &temp.path().join("gone"),
        });
        assert_eq!(capture.status(), VerificationStatus::HarnessError);
        assert!(capture.output.contains("spawn"), "{}", capture.output);
    }

    #[test]
    fn timeout_is_a_harness_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let capture = ShellVerifier {
            timeout: Some(Duration::from_millis(100)),
            output_limit_bytes: 1024,
        }
        .verify(&VerifyRequest {
            phase: VerificationPhase::Pre,
            command: "exec sleep 5",
            workdir: temp.path(),
        });
        assert!(capture.timed_out);
        assert_eq!(capture.banner(), "pre-verification: HARNESS ERROR (timed out)");
    }
}
