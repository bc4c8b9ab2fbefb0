//! Error types for frontpipe
//!
//! Uses `miette` for pretty error reporting with source spans and help text.
//! [`PipeError`] covers everything that aborts an invocation; [`CompileError`]
//! is the per-file diagnostic a compile task reports and then moves past.

use miette::{Diagnostic, NamedSource, SourceSpan};
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for frontpipe operations
#[derive(Error, Diagnostic, Debug)]
pub enum PipeError {
    #[error("Configuration file not found")]
    #[diagnostic(
        code(frontpipe::config::not_found),
        help("Create one with `frontpipe init`, or drop --config to use the built-in defaults")
    )]
    ConfigNotFound { searched: Vec<PathBuf> },

    #[error("Failed to parse configuration {}", path.display())]
    #[diagnostic(code(frontpipe::config::parse))]
    ConfigParse {
        #[source]
        source: toml::de::Error,
        path: PathBuf,
    },

    #[error("Task '{name}' not found")]
    #[diagnostic(
        code(frontpipe::task::not_found),
        help("Run `frontpipe list` to see available tasks")
    )]
    TaskNotFound { name: String, available: Vec<String> },

    #[error("Circular dependency detected: {cycle}")]
    #[diagnostic(
        code(frontpipe::task::cycle),
        help("Check the 'depends' field in your task definitions")
    )]
    CyclicDependency { cycle: String },

    #[error("Invalid task '{task}': {reason}")]
    #[diagnostic(code(frontpipe::config::invalid_task))]
    InvalidTask { task: String, reason: String },

    #[error("Invalid watch pattern '{pattern}'")]
    #[diagnostic(code(frontpipe::watch::glob))]
    InvalidGlob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("Invalid browser targets: {message}")]
    #[diagnostic(
        code(frontpipe::style::targets),
        help("Use browserslist queries such as \"last 2 versions\" or \"> 1%\"")
    )]
    BrowserTargets { message: String },

    #[error("Source directory {} does not exist", path.display())]
    #[diagnostic(code(frontpipe::source::missing))]
    MissingSource { path: PathBuf },

    #[error("Task '{task}' failed: {message}")]
    #[diagnostic(code(frontpipe::exec::failed))]
    TaskFailed { task: String, message: String },

    #[error("Could not start server on {address}: {message}")]
    #[diagnostic(
        code(frontpipe::server::bind),
        help("Another process may hold the port; change [server] port in frontpipe.toml")
    )]
    Server { address: String, message: String },

    #[error("I/O error")]
    #[diagnostic(code(frontpipe::io))]
    Io(#[from] std::io::Error),

    #[error("Watch error")]
    #[diagnostic(code(frontpipe::watch))]
    Watch {
        #[source]
        source: notify::Error,
    },
}

/// Result type alias for frontpipe operations
pub type Result<T> = std::result::Result<T, PipeError>;

/// A single source file that failed to compile
#[derive(Error, Diagnostic, Debug)]
pub enum CompileError {
    #[error("{message}")]
    #[diagnostic(code(frontpipe::template))]
    Template {
        message: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("here")]
        span: SourceSpan,
        line: usize,
    },

    #[error("{}: {message}", path.display())]
    #[diagnostic(code(frontpipe::style))]
    Style { path: PathBuf, message: String },

    #[error("Failed to read {}", path.display())]
    #[diagnostic(code(frontpipe::compile::io))]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CompileError {
    /// Line of a template error (1-based), if known
    pub fn line(&self) -> Option<usize> {
        match self {
            CompileError::Template { line, .. } => Some(*line),
            _ => None,
        }
    }
}
