//! frontpipe - front-end build runner
//!
//! Compiles pug templates and scss stylesheets, serves the result with live
//! reload and recompiles on change.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use console::style;

mod cli;

use cli::{Cli, Commands, EffectiveCommand, GraphFormat, ListFormat};
use frontpipe::config::{Action, Config, CONFIG_FILES, DEFAULT_TASK};
use frontpipe::error::{PipeError, Result};
use frontpipe::executor::{Executor, ExecutorConfig};
use frontpipe::graph::{ExecutionPlan, TaskGraph, TaskNode};
use frontpipe::reload::ReloadChannel;
use frontpipe::style::StyleCompiler;
use frontpipe::watch::WatchSet;
use frontpipe::Toolchain;

/// Exit status after Ctrl-C ends a long-lived run
const INTERRUPTED: u8 = 130;

enum Finish {
    Done,
    Interrupted,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Set up panic handler for nice error messages
    miette::set_panic_hook();

    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "frontpipe=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    // Handle --no-color
    if cli.no_color {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    match run(cli).await {
        Ok(Finish::Done) => ExitCode::SUCCESS,
        Ok(Finish::Interrupted) => ExitCode::from(INTERRUPTED),
        Err(e) => {
            eprintln!("{}: {:?}", style("error").red().bold(), miette::Report::new(e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<Finish> {
    // Change working directory if specified
    if let Some(cwd) = &cli.cwd {
        std::env::set_current_dir(cwd)?;
    }

    match cli.effective_command() {
        EffectiveCommand::Subcommand(cmd) => run_command(cmd, &cli).await,
        EffectiveCommand::RunTasks(tasks) => run_tasks(tasks, false, &cli).await,
        EffectiveCommand::Default => run_tasks(&[DEFAULT_TASK.to_string()], false, &cli).await,
    }
}

async fn run_command(cmd: &Commands, cli: &Cli) -> Result<Finish> {
    match cmd {
        Commands::Run { tasks, dry_run } => run_tasks(tasks, *dry_run, cli).await,

        Commands::List { format, deps } => {
            let (config, _) = Config::load(cli.config.as_deref())?;
            let graph = TaskGraph::from_config(&config)?;
            print_task_list(&graph, format.clone(), *deps);
            Ok(Finish::Done)
        }

        Commands::Graph { task, format } => {
            let (config, _) = Config::load(cli.config.as_deref())?;
            let graph = TaskGraph::from_config(&config)?;
            print_graph(&graph, task.as_deref(), format.clone())?;
            Ok(Finish::Done)
        }

        Commands::Init { force } => {
            init_config(*force)?;
            Ok(Finish::Done)
        }

        Commands::Check => {
            let (config, path) = Config::load(cli.config.as_deref())?;
            let graph = TaskGraph::from_config(&config)?;
            let watch = WatchSet::from_config(&config, &graph)?;
            StyleCompiler::new(config.style_load_paths(), &config.style.browsers)?;

            let source = path
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "built-in configuration".to_string());
            println!(
                "{} {} is valid ({} tasks, {} watch patterns)",
                style("✓").green(),
                source,
                graph.task_names().count(),
                watch.registrations().len()
            );
            Ok(Finish::Done)
        }
    }
}

async fn run_tasks(tasks: &[String], dry_run: bool, cli: &Cli) -> Result<Finish> {
    let (config, _) = Config::load(cli.config.as_deref())?;
    let graph = Arc::new(TaskGraph::from_config(&config)?);
    let watch = Arc::new(WatchSet::from_config(&config, &graph)?);

    // Resolve every requested task before anything runs
    for task in tasks {
        graph.execution_order(task)?;
    }

    let toolchain = Toolchain::new(Arc::new(config), ReloadChannel::new())?.quiet(cli.quiet);
    let exec_config = ExecutorConfig {
        dry_run,
        quiet: cli.quiet,
        verbose: cli.verbose,
    };
    let executor = Executor::new(graph, Arc::new(toolchain), exec_config).with_watch(watch);

    let mut long_lived = false;
    for task in tasks {
        long_lived |= executor.keeps_running(task)?;
        executor.execute(task).await?;
    }

    if dry_run || !long_lived {
        return Ok(Finish::Done);
    }

    tracing::debug!(watchers = executor.active_watchers(), "running until interrupted");
    tokio::signal::ctrl_c().await?;
    Ok(Finish::Interrupted)
}

fn print_task_list(graph: &TaskGraph, format: ListFormat, show_deps: bool) {
    let names = graph.sorted_names();
    let tasks: Vec<&TaskNode> = names.iter().filter_map(|n| graph.get_task(n)).collect();

    match format {
        ListFormat::Table => {
            println!("{}", style("Tasks:").bold());

            let width = names.iter().map(String::len).max().unwrap_or(0);
            for task in tasks {
                let action = task.action().map(Action::as_str).unwrap_or("-");
                let mut line = format!(
                    "  {:<width$}  {:<8}  {}",
                    task.name,
                    action,
                    task.config.desc.as_deref().unwrap_or("")
                );
                if show_deps && !task.config.depends.is_empty() {
                    line.push_str(&format!(" (after {})", task.config.depends.join(", ")));
                }
                println!("{}", style(line.trim_end()).cyan());
            }
        }

        ListFormat::Json => {
            let listing: serde_json::Map<String, serde_json::Value> = tasks
                .iter()
                .map(|task| {
                    let mut entry = serde_json::json!({
                        "description": task.config.desc,
                        "action": task.action().map(Action::as_str),
                    });
                    if show_deps {
                        entry["depends"] = serde_json::json!(task.config.depends);
                    }
                    (task.name.clone(), entry)
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&listing).unwrap_or_default());
        }

        ListFormat::Plain => {
            for name in names {
                println!("{name}");
            }
        }
    }
}

fn print_graph(graph: &TaskGraph, task: Option<&str>, format: GraphFormat) -> Result<()> {
    let tasks = match task {
        Some(name) => graph.execution_order(name)?,
        None => graph.all_tasks_ordered()?,
    };

    let edges: Vec<(&str, &str)> = tasks
        .iter()
        .flat_map(|&t| {
            t.config
                .depends
                .iter()
                .map(move |dep| (dep.as_str(), t.name.as_str()))
        })
        .collect();

    match format {
        GraphFormat::Text => {
            let plan = ExecutionPlan::from_tasks(tasks, graph);
            for (stage, group) in plan.parallel_groups.iter().enumerate() {
                let names: Vec<_> = group.iter().map(|t| t.name.as_str()).collect();
                println!(
                    "{} {}",
                    style(format!("{}.", stage + 1)).dim(),
                    style(names.join("  ")).cyan().bold()
                );
            }
        }

        GraphFormat::Dot => {
            println!("digraph frontpipe {{");
            println!("  rankdir=LR;");
            println!("  node [shape=box];");
            for (from, to) in &edges {
                println!("  \"{from}\" -> \"{to}\";");
            }
            println!("}}");
        }

        GraphFormat::Json => {
            let nodes: Vec<_> = tasks
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "id": t.name,
                        "description": t.config.desc,
                        "action": t.action().map(Action::as_str),
                    })
                })
                .collect();
            let edges: Vec<_> = edges
                .iter()
                .map(|(from, to)| serde_json::json!({ "from": from, "to": to }))
                .collect();

            let output = serde_json::json!({ "nodes": nodes, "edges": edges });
            println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
        }
    }

    Ok(())
}

fn init_config(force: bool) -> Result<()> {
    let path = Path::new(CONFIG_FILES[0]);

    if path.exists() && !force {
        return Err(PipeError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} already exists (use --force to overwrite)", path.display()),
        )));
    }

    let header = "# frontpipe.toml - front-end build configuration\n\
                  # Relative paths resolve against this file's directory.\n\n";
    std::fs::write(path, format!("{header}{}", Config::default().to_toml()))?;

    println!(
        "{} Created {}",
        style("✓").green(),
        style(path.display()).bold()
    );

    Ok(())
}
