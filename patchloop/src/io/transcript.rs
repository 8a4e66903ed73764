//! Append-only product logs for a run.
//!
//! - `agent.log`: one JSON record per line (`tool_use`, `request`, `response`).
//! - `prompts.log`: one raw `{req, res}` capture per model exchange.
//!
//! Both files are recreated at run start. Every record is written with a single
//! `write_all` on an unbuffered append handle before the caller proceeds, so the
//! files always reflect program order.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

pub const AGENT_LOG: &str = "agent.log";
pub const PROMPTS_LOG: &str = "prompts.log";

/// Timestamp format used in `agent.log`.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// One entry in `agent.log`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogRecord {
    ToolUse { tool: String, args: Value },
    Request { content: String },
    Response { content: String },
}

#[derive(Serialize)]
struct Stamped<'a> {
    timestamp: String,
    #[serde(flatten)]
    record: &'a LogRecord,
}

#[derive(Serialize)]
struct Exchange<'a> {
    req: &'a Value,
    res: &'a Value,
}

/// Writer for the run's append-only logs. The only writer to either file.
#[derive(Debug)]
pub struct Transcript {
    agent_log_path: PathBuf,
    prompts_log_path: PathBuf,
    agent_log: File,
    prompts_log: File,
}

impl Transcript {
    /// Delete any previous logs in `dir` and open fresh append handles.
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("create log dir {}", dir.display()))?;
        let agent_log_path = dir.join(AGENT_LOG);
        let prompts_log_path = dir.join(PROMPTS_LOG);
        let agent_log = open_fresh(&agent_log_path)?;
        let prompts_log = open_fresh(&prompts_log_path)?;
        debug!(dir = %dir.display(), "transcript logs created");
        Ok(Self {
            agent_log_path,
            prompts_log_path,
            agent_log,
            prompts_log,
        })
    }

    pub fn agent_log_path(&self) -> &Path {
        &self.agent_log_path
    }

    pub fn prompts_log_path(&self) -> &Path {
        &self.prompts_log_path
    }

    /// Append a timestamped record to `agent.log`.
    pub fn try_record(&self, record: &LogRecord) -> Result<()> {
        let stamped = Stamped {
            timestamp: Utc::now().format(TIMESTAMP_FORMAT).to_string(),
            record,
        };
        let mut line = serde_json::to_string(&stamped).context("serialize log record")?;
        line.push('\n');
        append(&self.agent_log, &line)
            .with_context(|| format!("append {}", self.agent_log_path.display()))
    }

    /// Like [`Transcript::try_record`], but a failed write is reported through tracing
    /// instead of interrupting the caller.
    pub fn record(&self, record: &LogRecord) {
        if let Err(err) = self.try_record(record) {
            warn!(err = %format!("{err:#}"), "failed to write agent log record");
        }
    }

    /// Append one raw request/response pair to `prompts.log`.
    pub fn capture_exchange(&self, request: &Value, response: &Value) {
        let result = serde_json::to_string(&Exchange {
            req: request,
            res: response,
        })
        .context("serialize exchange")
        .and_then(|mut line| {
            line.push('\n');
            append(&self.prompts_log, &line)
                .with_context(|| format!("append {}", self.prompts_log_path.display()))
        });
        if let Err(err) = result {
            warn!(err = %format!("{err:#}"), "failed to write prompts log");
        }
    }
}

fn open_fresh(path: &Path) -> Result<File> {
    if path.exists() {
        fs::remove_file(path).with_context(|| format!("remove stale {}", path.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))
}

fn append(mut file: &File, line: &str) -> std::io::Result<()> {
    file.write_all(line.as_bytes())?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn read_lines(path: &Path) -> Vec<Value> {
        fs::read_to_string(path)
            .expect("read log")
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect()
    }

    #[test]
    fn create_discards_previous_run_logs() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join(AGENT_LOG), "old\n").expect("write");
        fs::write(temp.path().join(PROMPTS_LOG), "old\n").expect("write");

        let transcript = Transcript::create(temp.path()).expect("create");
        assert_eq!(
            fs::read_to_string(transcript.agent_log_path()).expect("read"),
            ""
        );
        assert_eq!(
            fs::read_to_string(transcript.prompts_log_path()).expect("read"),
            ""
        );
    }

    #[test]
    fn records_are_appended_in_order_with_timestamps() {
        let temp = tempfile::tempdir().expect("tempdir");
        let transcript = Transcript::create(temp.path()).expect("create");

        transcript.record(&LogRecord::Request {
            content: "fix it".to_string(),
        });
        transcript.record(&LogRecord::ToolUse {
            tool: "read_file".to_string(),
            args: json!({"path": "a.py"}),
        });
        transcript.record(&LogRecord::Response {
            content: "done".to_string(),
        });

        let lines = read_lines(transcript.agent_log_path());
        let kinds: Vec<&str> = lines
            .iter()
            .map(|line| line["type"].as_str().expect("type"))
            .collect();
        assert_eq!(kinds, vec!["request", "tool_use", "response"]);
        assert_eq!(lines[1]["tool"], json!("read_file"));
        assert_eq!(lines[1]["args"], json!({"path": "a.py"}));

        let timestamp = lines[0]["timestamp"].as_str().expect("timestamp");
        assert_eq!(timestamp.len(), "2024-01-01T00:00:00Z".len());
        assert!(timestamp.ends_with('Z'));
    }

    #[test]
    fn exchanges_are_captured_as_req_res_pairs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let transcript = Transcript::create(temp.path()).expect("create");

        transcript.capture_exchange(&json!([{"role": "user"}]), &json!({"content": []}));

        let lines = read_lines(transcript.prompts_log_path());
        assert_eq!(
            lines,
            vec![json!({"req": [{"role": "user"}], "res": {"content": []}})]
        );
    }
}
