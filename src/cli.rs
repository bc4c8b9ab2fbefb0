//! CLI command definitions and handling
//!
//! Uses `clap` derive API for argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// frontpipe - compile pug and scss, serve with live reload
#[derive(Parser, Debug)]
#[command(name = "frontpipe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to frontpipe.toml config file
    #[arg(short, long, global = true, env = "FRONTPIPE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress progress output (quiet mode)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Working directory
    #[arg(long, global = true)]
    pub cwd: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Tasks to run (shorthand for `frontpipe run <task>`; default: `default`)
    #[arg(trailing_var_arg = true)]
    pub task: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one or more tasks
    Run {
        /// Tasks to run
        #[arg(required = true)]
        tasks: Vec<String>,

        /// Show execution plan without running
        #[arg(long)]
        dry_run: bool,
    },

    /// List available tasks
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: ListFormat,

        /// Show task dependencies
        #[arg(long)]
        deps: bool,
    },

    /// Show task dependency graph
    Graph {
        /// Task to show graph for (all tasks if not specified)
        task: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: GraphFormat,
    },

    /// Write a frontpipe.toml with the default settings
    Init {
        /// Overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Validate configuration, task graph and watch patterns
    Check,
}

#[derive(ValueEnum, Clone, Debug, Default)]
pub enum ListFormat {
    #[default]
    Table,
    Json,
    Plain,
}

#[derive(ValueEnum, Clone, Debug, Default)]
pub enum GraphFormat {
    #[default]
    Text,
    Dot,
    Json,
}

impl Cli {
    /// Get the effective command, treating bare task names as `run <task>`
    pub fn effective_command(&self) -> EffectiveCommand<'_> {
        if let Some(cmd) = &self.command {
            EffectiveCommand::Subcommand(cmd)
        } else if !self.task.is_empty() {
            EffectiveCommand::RunTasks(&self.task)
        } else {
            EffectiveCommand::Default
        }
    }
}

pub enum EffectiveCommand<'a> {
    Subcommand(&'a Commands),
    RunTasks(&'a [String]),
    /// No arguments: run the `default` task
    Default,
}
