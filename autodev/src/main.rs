//! Automated code-modification agent.
//!
//! Takes tasks from `TODO.md`, the command line or the terminal, asks a
//! generator for file contents, verifies them with the project's checker and
//! commits the result. Each task leaves a JSON log under the log directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;

use autodev::analyze::{analyze_log_dir, render_summary, show_attempts};
use autodev::exit_codes;
use autodev::io::config::{AgentConfig, CONFIG_FILE_NAME, load_config};
use autodev::io::generator::build_generator;
use autodev::io::git::Git;
use autodev::io::prompter::TerminalPrompter;
use autodev::io::task_log::{TaskLogStore, load_task_log};
use autodev::io::verifier::CommandVerifier;
use autodev::logging;
use autodev::looping::{LoopStop, RunMode, preview_next_task, run_loop};
use autodev::pipeline::{Collaborators, PipelineConfig};

#[derive(Parser, Debug)]
#[command(
    name = "autodev",
    version,
    about = "Generate, verify and commit repository changes task by task"
)]
struct Cli {
    /// Repository to work in.
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Config file (default: `<repo>/autodev.toml`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Documentation file included in the generator context.
    #[arg(long)]
    context: Option<PathBuf>,

    /// Generator model.
    #[arg(long)]
    model: Option<String>,

    /// Maximum backlog tasks per run.
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Generation attempts per task.
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Commit locally without pushing.
    #[arg(long)]
    no_push: bool,

    /// Ask before each push.
    #[arg(long)]
    confirm_push: bool,

    /// Run a single task instead of the backlog.
    #[arg(long, conflicts_with = "interactive")]
    task: Option<String>,

    /// Read tasks from the terminal until `quit`.
    #[arg(long)]
    interactive: bool,

    /// Directory for task logs and the run log (default: `<repo>/<log_dir>`).
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Print the next backlog task without running it.
    #[arg(long, conflicts_with_all = ["task", "interactive"])]
    dry_run: bool,

    /// Summarize task logs and exit.
    #[arg(long, conflicts_with_all = ["task", "interactive", "dry_run"])]
    analyze_logs: bool,

    /// Display the attempts recorded in a task log and exit.
    #[arg(long, value_name = "FILE", conflicts_with_all = ["task", "interactive", "dry_run", "analyze_logs"])]
    show_log: Option<PathBuf>,

    /// Attempt to display with `--show-log` (1-based).
    #[arg(long, requires = "show_log")]
    attempt: Option<usize>,
}

impl Cli {
    fn run_mode(&self, cfg: &AgentConfig) -> RunMode {
        if let Some(task) = &self.task {
            RunMode::Single(task.clone())
        } else if self.interactive {
            RunMode::Interactive
        } else {
            RunMode::Backlog {
                max_iterations: cfg.max_iterations,
            }
        }
    }
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    if let Some(path) = &cli.show_log {
        let log = load_task_log(path)?;
        print!("{}", show_attempts(&log, cli.attempt)?);
        return Ok(exit_codes::OK);
    }

    let explicit_log_dir = cli
        .log_dir
        .as_deref()
        .map(std::path::absolute)
        .transpose()
        .context("resolve log directory")?;
    if cli.analyze_logs
        && let Some(log_dir) = &explicit_log_dir
    {
        return analyze(log_dir);
    }

    let repo = cli
        .repo
        .canonicalize()
        .with_context(|| format!("resolve repository {}", cli.repo.display()))?;
    let cfg = resolve_config(&cli, &repo)?;
    let log_dir = explicit_log_dir.unwrap_or_else(|| repo.join(&cfg.log_dir));

    if cli.analyze_logs {
        return analyze(&log_dir);
    }

    let git = Git::new(&repo);
    if !git.is_repository() {
        bail!("{} is not a git repository", repo.display());
    }
    let pipeline = PipelineConfig::from_config(&repo, &cfg);

    if cli.dry_run {
        logging::init(None)?;
        match preview_next_task(&pipeline)? {
            Some(task) => println!("next task ({:?}): {}", task.origin, task.description),
            None => println!("no pending tasks"),
        }
        return Ok(exit_codes::OK);
    }

    logging::init(Some(&log_dir))?;
    let generator = build_generator(&cfg.generator, repo.clone())?;
    let verifier = CommandVerifier::from_config(&cfg.verifier, &repo);
    let prompter = TerminalPrompter;
    let tools = Collaborators {
        generator: generator.as_ref(),
        verifier: &verifier,
        vcs: &git,
        prompter: &prompter,
    };
    let store = TaskLogStore::new(&log_dir);

    let outcome = run_loop(&pipeline, tools, &store, &cli.run_mode(&cfg), |task, outcome| {
        println!(
            "{} ({} attempts): {} [log {}]",
            outcome.status,
            outcome.attempts,
            task.description,
            outcome.log_path.display()
        );
    })?;

    match &outcome.stop {
        LoopStop::BacklogEmpty => println!("backlog complete"),
        LoopStop::MaxIterations { max_iterations } => {
            println!("stopped after {max_iterations} iterations");
        }
        LoopStop::TaskFailed { task, status } => println!("stopped: {task:?} ended with {status}"),
        LoopStop::SingleDone | LoopStop::InputEnded => {}
    }
    println!(
        "tasks: {} run, {} succeeded, {} failed",
        outcome.tasks_run, outcome.succeeded, outcome.failed
    );

    Ok(if outcome.failed > 0 {
        exit_codes::TASK_FAILED
    } else {
        exit_codes::OK
    })
}

fn analyze(log_dir: &Path) -> Result<i32> {
    let summary = analyze_log_dir(log_dir)?;
    print!("{}", render_summary(log_dir, &summary));
    Ok(exit_codes::OK)
}

/// Load the config file and apply command line overrides.
fn resolve_config(cli: &Cli, repo: &Path) -> Result<AgentConfig> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| repo.join(CONFIG_FILE_NAME));
    let mut cfg = load_config(&path)?;

    if let Some(docs) = &cli.context {
        cfg.context.docs_file = Some(docs.clone());
    }
    if let Some(model) = &cli.model {
        cfg.generator.model.clone_from(model);
    }
    if let Some(n) = cli.max_iterations {
        cfg.max_iterations = n;
    }
    if let Some(n) = cli.max_attempts {
        cfg.max_attempts = n;
    }
    if cli.no_push {
        cfg.push = false;
    }
    if cli.confirm_push {
        cfg.confirm_push = true;
    }
    cfg.validate().context("invalid command line overrides")?;
    Ok(cfg)
}
