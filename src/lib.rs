//! frontpipe - a front-end build runner
//!
//! This crate provides both a CLI tool and a library for compiling a small
//! static front end.
//!
//! # Features
//!
//! - **Task graph** - `pug`, `sass`, `rebuild`, `browser-sync`, `watch`,
//!   `build` and `default`, each run at most once per invocation
//! - **Templates** - pug to pretty-printed HTML
//! - **Stylesheets** - scss to minified, vendor-prefixed CSS
//! - **Dev server** - static files with injected live reload
//! - **File watching** - glob-mapped recompilation
//!
//! # Example
//!
//! ```toml
//! # frontpipe.toml
//!
//! [paths]
//! dist = "../templates/"
//!
//! [server]
//! port = 8080
//!
//! [[watch]]
//! glob = "./src/sass/**/*.scss"
//! task = "sass"
//! ```
//!
//! # Library Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use frontpipe::{Config, Executor, ExecutorConfig, ReloadChannel, TaskGraph, Toolchain};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (config, _) = Config::load(None)?;
//!     let graph = Arc::new(TaskGraph::from_config(&config)?);
//!     let toolchain = Toolchain::new(Arc::new(config), ReloadChannel::new())?;
//!
//!     let executor = Executor::new(graph, Arc::new(toolchain), ExecutorConfig::default());
//!     executor.execute("build").await?;
//!
//!     Ok(())
//! }
//! ```

pub mod actions;
pub mod config;
pub mod error;
pub mod executor;
pub mod graph;
pub mod pipeline;
pub mod reload;
pub mod server;
pub mod style;
pub mod template;
pub mod watch;

// Re-export main types
pub use actions::Toolchain;
pub use config::Config;
pub use error::{CompileError, PipeError, Result};
pub use executor::{ActionHandler, Executor, ExecutorConfig, Outcome, TaskResult};
pub use graph::{ExecutionPlan, TaskGraph, TaskNode};
pub use reload::{ReloadChannel, ReloadEvent};
pub use server::DevServer;
pub use watch::WatchSet;
