//! File watching for automatic task re-execution
//!
//! Each `[[watch]]` registration maps a glob to a task. The literal directory
//! at the front of the glob is watched with `notify` (recursively when the
//! glob contains `**`), and every create/modify/remove event under it that
//! matches the glob dispatches the task on its own tokio task. Events are not
//! debounced or coalesced, and a path matching two registrations dispatches
//! twice.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{GlobBuilder, GlobMatcher};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{Config, WatchConfig};
use crate::error::{PipeError, Result};
use crate::executor::Executor;
use crate::graph::TaskGraph;

/// One glob → task mapping, ready to match event paths
#[derive(Debug, Clone)]
pub struct Registration {
    pub pattern: String,
    pub task: String,
    root: PathBuf,
    matcher: GlobMatcher,
    recursive: bool,
}

impl Registration {
    /// Directory the watcher is attached to
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    pub fn matches(&self, path: &Path) -> bool {
        path.strip_prefix(&self.root)
            .is_ok_and(|relative| self.matcher.is_match(relative))
    }
}

/// All registrations of a project
#[derive(Debug, Clone, Default)]
pub struct WatchSet {
    registrations: Vec<Registration>,
}

impl WatchSet {
    pub fn from_config(config: &Config, graph: &TaskGraph) -> Result<Self> {
        Self::new(&config.root, &config.watch, graph)
    }

    /// Compile registrations relative to `base`; every task must exist
    pub fn new(base: &Path, entries: &[WatchConfig], graph: &TaskGraph) -> Result<Self> {
        let mut registrations = Vec::with_capacity(entries.len());

        for entry in entries {
            if !graph.has_task(&entry.task) {
                return Err(PipeError::TaskNotFound {
                    name: entry.task.clone(),
                    available: graph.sorted_names(),
                });
            }

            let (literal, rest) = split_glob(&entry.glob);
            let matcher = GlobBuilder::new(&rest)
                .literal_separator(true)
                .build()
                .map_err(|source| PipeError::InvalidGlob {
                    pattern: entry.glob.clone(),
                    source,
                })?
                .compile_matcher();

            let root = base.join(literal);
            let root = root.canonicalize().unwrap_or(root);

            registrations.push(Registration {
                pattern: entry.glob.clone(),
                task: entry.task.clone(),
                root,
                matcher,
                recursive: rest.contains("**") || rest.contains('/'),
            });
        }

        Ok(Self { registrations })
    }

    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Tasks to run for a change at `path`, one entry per matching registration
    pub fn dispatch_targets(&self, path: &Path) -> Vec<&str> {
        self.registrations
            .iter()
            .filter(|r| r.matches(path))
            .map(|r| r.task.as_str())
            .collect()
    }

    /// Directories to watch; a directory shared by several registrations is
    /// watched once, recursively if any of them needs it
    fn watch_roots(&self) -> Vec<(PathBuf, RecursiveMode)> {
        let mut roots: Vec<(PathBuf, bool)> = Vec::new();

        for reg in &self.registrations {
            match roots.iter_mut().find(|(root, _)| *root == reg.root) {
                Some((_, recursive)) => *recursive |= reg.recursive,
                None => roots.push((reg.root.clone(), reg.recursive)),
            }
        }

        roots
            .into_iter()
            .map(|(root, recursive)| {
                let mode = if recursive {
                    RecursiveMode::Recursive
                } else {
                    RecursiveMode::NonRecursive
                };
                (root, mode)
            })
            .collect()
    }
}

/// Split a glob into its literal directory prefix and the pattern below it
pub fn split_glob(glob: &str) -> (PathBuf, String) {
    let glob = glob.strip_prefix("./").unwrap_or(glob);
    let parts: Vec<&str> = glob.split('/').filter(|p| !p.is_empty()).collect();

    let first_magic = parts
        .iter()
        .position(|p| p.contains(['*', '?', '[', '{']))
        .unwrap_or(parts.len().saturating_sub(1));

    let literal: PathBuf = parts[..first_magic]
        .iter()
        .filter(|p| **p != ".")
        .collect();

    (literal, parts[first_magic..].join("/"))
}

fn is_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// A running watcher; dropping it stops the notifications
pub struct WatchHandle {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Start watching and dispatching through `executor`
pub fn spawn(set: Arc<WatchSet>, executor: Executor) -> Result<WatchHandle> {
    let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let _ = tx.send(res);
    })
    .map_err(|source| PipeError::Watch { source })?;

    for (root, mode) in set.watch_roots() {
        if !root.exists() {
            tracing::warn!(dir = %root.display(), "watch directory does not exist, skipping");
            continue;
        }
        watcher
            .watch(&root, mode)
            .map_err(|source| PipeError::Watch { source })?;
        tracing::debug!(dir = %root.display(), ?mode, "watching");
    }

    let task = tokio::spawn(async move {
        while let Some(res) = rx.recv().await {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!("watch error: {e}");
                    continue;
                }
            };

            if !is_change(&event.kind) {
                continue;
            }

            for path in &event.paths {
                for target in set.dispatch_targets(path) {
                    tracing::debug!(path = %path.display(), task = target, "change detected");
                    let executor = executor.clone();
                    let target = target.to_string();

                    tokio::spawn(async move {
                        if let Err(e) = executor.execute(&target).await {
                            executor.report_error(&target, e);
                        }
                    });
                }
            }
        }
    });

    Ok(WatchHandle {
        _watcher: watcher,
        task,
    })
}
