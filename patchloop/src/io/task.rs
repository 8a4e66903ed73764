//! Task descriptor loading (`task.yaml`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

/// Immutable description of the work for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescriptor {
    pub title: String,
    pub description: String,
    pub requirements: String,
    pub interface: String,
    pub verification_command: String,
}

#[derive(Debug, Deserialize)]
struct TaskFile {
    #[serde(default)]
    title: Option<String>,
    description: String,
    #[serde(default)]
    requirements: TextOrList,
    #[serde(default)]
    interface: TextOrList,
    tests: TestsSection,
}

#[derive(Debug, Deserialize)]
struct TestsSection {
    test_command: String,
}

/// YAML authors write these either as one block string or as a list of lines.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TextOrList {
    Text(String),
    List(Vec<String>),
}

impl Default for TextOrList {
    fn default() -> Self {
        TextOrList::Text(String::new())
    }
}

impl TextOrList {
    fn into_text(self) -> String {
        match self {
            TextOrList::Text(text) => text,
            TextOrList::List(lines) => lines.join("\n"),
        }
    }
}

/// Read and validate a task file. The title falls back to the file stem.
pub fn load_task(path: &Path) -> Result<TaskDescriptor> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let fallback_title = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "task".to_string());
    parse_task(&contents, &fallback_title).with_context(|| format!("parse {}", path.display()))
}

pub fn parse_task(contents: &str, fallback_title: &str) -> Result<TaskDescriptor> {
    let file: TaskFile = serde_yaml::from_str(contents).context("decode task yaml")?;

    let verification_command = file.tests.test_command.trim().to_string();
    if verification_command.is_empty() {
        return Err(anyhow!("tests.test_command must not be empty"));
    }
    if file.description.trim().is_empty() {
        return Err(anyhow!("description must not be empty"));
    }

    let title = file
        .title
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| fallback_title.to_string());

    Ok(TaskDescriptor {
        title,
        description: file.description,
        requirements: file.requirements.into_text(),
        interface: file.interface.into_text(),
        verification_command,
    })
}
