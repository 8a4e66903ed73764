//! System prompt and seed message rendering.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::tools::ToolSpec;
use crate::io::task::TaskDescriptor;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const SEED_TEMPLATE: &str = include_str!("prompts/seed.md");

#[derive(Debug, Clone, Serialize)]
struct TaskContext<'a> {
    title: &'a str,
    description: &'a str,
    requirements: &'a str,
    interface: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct ToolContext<'a> {
    name: &'a str,
    description: &'a str,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("system", SYSTEM_TEMPLATE)
            .expect("system template should be valid");
        env.add_template("seed", SEED_TEMPLATE)
            .expect("seed template should be valid");
        Self { env }
    }

    pub fn render_system(
        &self,
        task: &TaskDescriptor,
        workdir_label: &str,
        tools: &[ToolSpec],
    ) -> Result<String> {
        let template = self.env.get_template("system")?;
        let tools: Vec<ToolContext<'_>> = tools
            .iter()
            .map(|spec| ToolContext {
                name: &spec.name,
                description: &spec.description,
            })
            .collect();
        let rendered = template.render(context! {
            task => TaskContext {
                title: &task.title,
                description: &task.description,
                requirements: task.requirements.trim(),
                interface: task.interface.trim(),
            },
            workdir => workdir_label,
            verification_command => &task.verification_command,
            tools => tools,
        })?;
        Ok(rendered)
    }

    /// First user message: fixed instruction followed by the baseline output verbatim.
    pub fn render_seed(&self, baseline: &str) -> Result<String> {
        let template = self.env.get_template("seed")?;
        Ok(template.render(context! { baseline => baseline })?)
    }
}
