//! Agent loop CLI: verify, let the model fix the working copy, verify again.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use patchloop::exit_codes;
use patchloop::io::config::{AgentConfig, load_config};
use patchloop::io::gateway::{AnthropicGateway, AnthropicSettings};
use patchloop::io::verify::ShellVerifier;
use patchloop::pipeline::{
    PipelineRequest, PreconditionError, Preflight, check_preconditions, format_usage,
    run_pipeline,
};

#[derive(Parser)]
#[command(
    name = "patchloop",
    version,
    about = "Drive a language model to fix a failing test in a working copy"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run pre-verification, the agent loop, post-verification and write artifacts.
    Run(RunArgs),
    /// Validate the task file and config without running anything.
    Check(RunArgs),
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Task descriptor (YAML).
    #[arg(long, default_value = "task.yaml")]
    task: PathBuf,
    /// Working copy the agent edits and the tests run in.
    #[arg(long, default_value = "/testbed")]
    workdir: PathBuf,
    /// Directory for logs and artifacts.
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
    /// Config file (TOML). Defaults apply when missing.
    #[arg(long, default_value = "patchloop.toml")]
    config: PathBuf,
    /// Override `max_rounds` from the config.
    #[arg(long)]
    max_rounds: Option<u32>,
    /// Override `model` from the config.
    #[arg(long)]
    model: Option<String>,
}

impl RunArgs {
    fn resolve_config(&self) -> Result<AgentConfig> {
        let mut config = load_config(&self.config)?;
        if let Some(max_rounds) = self.max_rounds {
            config.max_rounds = max_rounds;
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        Ok(config)
    }

    fn preflight(
        &self,
        config: &AgentConfig,
        require_credential: bool,
    ) -> Result<Preflight, PreconditionError> {
        let api_key = env::var(&config.api_key_env).ok();
        check_preconditions(
            config,
            &self.task,
            &self.workdir,
            api_key,
            require_credential,
        )
    }
}

fn main() {
    patchloop::logging::init();
    let cli = Cli::parse();
    let code = match cli.command {
        Command::Run(args) => cmd_run(&args),
        Command::Check(args) => cmd_check(&args),
    };
    std::process::exit(code);
}

fn cmd_check(args: &RunArgs) -> i32 {
    let config = match args.resolve_config() {
        Ok(config) => config,
        Err(err) => return precondition_failed(&format!("{err:#}")),
    };
    match args.preflight(&config, false) {
        Ok(preflight) => {
            println!("task: {}", preflight.task.title);
            println!("verification command: {}", preflight.task.verification_command);
            println!("model: {} (max {} rounds)", config.model, config.max_rounds);
            if preflight.api_key.is_none() {
                println!("warning: {} is not set", config.api_key_env);
            }
            exit_codes::OK
        }
        Err(err) => precondition_failed(&err.to_string()),
    }
}

fn cmd_run(args: &RunArgs) -> i32 {
    let config = match args.resolve_config() {
        Ok(config) => config,
        Err(err) => return precondition_failed(&format!("{err:#}")),
    };
    let preflight = match args.preflight(&config, true) {
        Ok(preflight) => preflight,
        Err(err) => return precondition_failed(&err.to_string()),
    };
    let gateway = match AnthropicGateway::new(AnthropicSettings {
        api_key: preflight.api_key.clone().unwrap_or_default(),
        model: config.model.clone(),
        max_tokens: config.max_tokens,
        base_url: config.api_base_url.clone(),
        timeout: config.request_timeout(),
    }) {
        Ok(gateway) => gateway,
        Err(err) => return precondition_failed(&format!("create model gateway: {err}")),
    };
    match run(args, &config, &preflight, &gateway) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            exit_codes::ARTIFACT_WRITE
        }
    }
}

fn run(
    args: &RunArgs,
    config: &AgentConfig,
    preflight: &Preflight,
    gateway: &AnthropicGateway,
) -> Result<i32> {
    let verifier = ShellVerifier {
        timeout: config.verify_timeout(),
        output_limit_bytes: config.output_limit_bytes,
    };
    let request = PipelineRequest {
        task: &preflight.task,
        workdir: &args.workdir,
        out_dir: &args.out_dir,
        config,
    };

    let outcome = run_pipeline(&request, gateway, &verifier, |capture| {
        println!("{}", capture.banner());
    })?;

    println!(
        "agent loop: {:?} after {} round(s), {}",
        outcome.loop_outcome.stop,
        outcome.loop_outcome.rounds,
        format_usage(outcome.loop_outcome.usage)
    );
    println!("artifacts: {}", display_dir(&outcome.paths.dir));
    info!(files_changed = outcome.summary.files_changed.len(), "run complete");

    if outcome.artifact_errors.is_empty() {
        Ok(exit_codes::OK)
    } else {
        for err in &outcome.artifact_errors {
            eprintln!("error: {err}");
        }
        Ok(exit_codes::ARTIFACT_WRITE)
    }
}

fn precondition_failed(message: &str) -> i32 {
    eprintln!("error: {message}");
    exit_codes::PRECONDITION
}

fn display_dir(path: &Path) -> String {
    path.canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}
