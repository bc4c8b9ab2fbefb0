//! Task execution engine
//!
//! Resolves a task into an [`ExecutionPlan`] and runs it group by group:
//! tasks in a group run concurrently, a group starts once the previous one
//! has finished, and every task runs at most once per invocation. The work
//! itself is delegated to an [`ActionHandler`]; blocking compile work runs on
//! `spawn_blocking`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use console::style;
use futures::future::join_all;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use parking_lot::Mutex;

use crate::config::Action;
use crate::error::{PipeError, Result};
use crate::graph::{ExecutionPlan, TaskGraph};
use crate::watch::{self, WatchHandle, WatchSet};

/// Performs the action of a task
pub trait ActionHandler: Send + Sync + 'static {
    fn run(&self, task: &str, action: Action) -> Result<Outcome>;
}

/// What an action produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Files written
    pub written: usize,
    /// Files that failed to compile and were skipped
    pub failed: usize,
}

/// Result of executing a single task
#[derive(Debug)]
pub struct TaskResult {
    pub name: String,
    pub duration: Duration,
    pub outcome: Outcome,
}

/// Executor configuration
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// Print the plan instead of running it
    pub dry_run: bool,
    /// Suppress progress lines
    pub quiet: bool,
    /// Show per-task detail
    pub verbose: bool,
}

/// Task executor; clones share the graph, handler and live watchers
#[derive(Clone)]
pub struct Executor {
    graph: Arc<TaskGraph>,
    handler: Arc<dyn ActionHandler>,
    watch_set: Option<Arc<WatchSet>>,
    config: ExecutorConfig,
    watchers: Arc<Mutex<Vec<WatchHandle>>>,
    progress: MultiProgress,
    interactive: bool,
}

impl Executor {
    pub fn new(graph: Arc<TaskGraph>, handler: Arc<dyn ActionHandler>, config: ExecutorConfig) -> Self {
        let interactive = !config.quiet && console::Term::stderr().is_term();
        let progress = if interactive {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };

        Self {
            graph,
            handler,
            watch_set: None,
            config,
            watchers: Arc::new(Mutex::new(Vec::new())),
            progress,
            interactive,
        }
    }

    /// Registrations started by `watch` actions
    pub fn with_watch(mut self, watch_set: Arc<WatchSet>) -> Self {
        self.watch_set = Some(watch_set);
        self
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Whether running `task` leaves a server or watcher behind
    pub fn keeps_running(&self, task: &str) -> Result<bool> {
        let plan = ExecutionPlan::from_tasks(self.graph.execution_order(task)?, &self.graph);
        Ok(plan.is_long_lived())
    }

    /// Number of watchers started so far
    pub fn active_watchers(&self) -> usize {
        self.watchers.lock().len()
    }

    /// Execute a task and everything it depends on
    pub async fn execute(&self, task_name: &str) -> Result<Vec<TaskResult>> {
        let tasks = self.graph.execution_order(task_name)?;
        let plan = ExecutionPlan::from_tasks(tasks, &self.graph);

        if self.config.dry_run {
            self.print_dry_run(&plan);
            return Ok(Vec::new());
        }

        let mut all_results = Vec::new();
        // A server or watcher outlives a source directory that is not there yet
        let long_lived = plan.is_long_lived();

        // Groups run sequentially, tasks within a group concurrently
        for group in &plan.parallel_groups {
            let handles: Vec<_> = group
                .iter()
                .map(|task| {
                    let this = self.clone();
                    let name = task.name.clone();
                    let action = task.action();
                    tokio::spawn(async move { this.run_task(name, action).await })
                })
                .collect();

            let mut first_error = None;
            for (task, joined) in group.iter().zip(join_all(handles).await) {
                let result = joined.unwrap_or_else(|e| {
                    Err(PipeError::TaskFailed {
                        task: task.name.clone(),
                        message: e.to_string(),
                    })
                });

                match result {
                    Ok(result) => all_results.push(result),
                    Err(e @ PipeError::MissingSource { .. }) if long_lived => {
                        self.report_error(&task.name, e)
                    }
                    Err(e) if first_error.is_none() => first_error = Some(e),
                    Err(e) => tracing::debug!("additional failure: {e}"),
                }
            }

            if let Some(e) = first_error {
                return Err(e);
            }
        }

        Ok(all_results)
    }

    async fn run_task(&self, name: String, action: Option<Action>) -> Result<TaskResult> {
        self.log_line(format!(
            "{} Starting '{}'...",
            timestamp(),
            style(&name).cyan()
        ));

        let spinner = self.spinner(&name, action);
        let start = Instant::now();
        let result = self.perform(&name, action).await;
        let duration = start.elapsed();

        if let Some(pb) = spinner {
            pb.finish_and_clear();
        }

        match result {
            Ok(outcome) => {
                let mut line = format!(
                    "{} Finished '{}' after {}",
                    timestamp(),
                    style(&name).cyan(),
                    style(format_duration(duration)).magenta()
                );
                if self.config.verbose && (outcome.written > 0 || outcome.failed > 0) {
                    line.push_str(&format!(
                        " {}",
                        style(format!("({} written, {} failed)", outcome.written, outcome.failed))
                            .dim()
                    ));
                }
                self.log_line(line);

                Ok(TaskResult {
                    name,
                    duration,
                    outcome,
                })
            }
            Err(e) => {
                self.log_line(format!(
                    "{} '{}' {} after {}",
                    timestamp(),
                    style(&name).cyan(),
                    style("errored").red(),
                    style(format_duration(duration)).magenta()
                ));
                Err(e)
            }
        }
    }

    async fn perform(&self, name: &str, action: Option<Action>) -> Result<Outcome> {
        let Some(action) = action else {
            return Ok(Outcome::default());
        };

        let handler = Arc::clone(&self.handler);
        let task = name.to_string();
        let outcome = tokio::task::spawn_blocking(move || handler.run(&task, action))
            .await
            .map_err(|e| PipeError::TaskFailed {
                task: name.to_string(),
                message: e.to_string(),
            })??;

        if action == Action::Watch {
            self.start_watching()?;
        }

        Ok(outcome)
    }

    fn start_watching(&self) -> Result<()> {
        let Some(set) = &self.watch_set else {
            tracing::debug!("no watch registrations configured");
            return Ok(());
        };

        let handle = watch::spawn(Arc::clone(set), self.clone())?;
        for reg in set.registrations() {
            tracing::debug!(pattern = %reg.pattern, task = %reg.task, "watch registered");
        }
        self.watchers.lock().push(handle);
        Ok(())
    }

    /// Report a failure that does not end the process
    pub fn report_error(&self, task: &str, error: PipeError) {
        tracing::warn!(task, "continuing after failure: {error}");
        if !self.config.quiet {
            self.progress
                .suspend(|| eprintln!("{:?}", miette::Report::new(error)));
        }
    }

    fn spinner(&self, name: &str, action: Option<Action>) -> Option<ProgressBar> {
        let short_lived = action.is_some_and(|a| !a.is_long_lived());
        if !self.interactive || !short_lived {
            return None;
        }

        let pb = self.progress.add(ProgressBar::new_spinner());
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("Running {name}"));
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    }

    fn log_line(&self, line: String) {
        if self.config.quiet {
            return;
        }
        if self.interactive {
            let _ = self.progress.println(line);
        } else {
            println!("{line}");
        }
    }

    /// Print dry-run execution plan
    fn print_dry_run(&self, plan: &ExecutionPlan) {
        println!("{}", style("Execution plan (dry run):").bold().cyan());
        println!();

        for (i, group) in plan.parallel_groups.iter().enumerate() {
            let parallel_note = if group.len() > 1 { " (parallel)" } else { "" };
            println!(
                "{} {}{}",
                style(format!("Stage {}:", i + 1)).bold(),
                group
                    .iter()
                    .map(|t| t.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                style(parallel_note).dim()
            );

            for task in group {
                match task.action() {
                    Some(action) => println!("    {} {}", style("→").dim(), action.as_str()),
                    None => println!("    {} {}", style("→").dim(), style("[group]").italic()),
                }
            }
        }

        if plan.is_long_lived() {
            println!();
            println!("{}", style("Keeps running until interrupted").dim());
        }
    }
}

fn timestamp() -> String {
    format!(
        "[{}]",
        style(chrono::Local::now().format("%H:%M:%S")).dim()
    )
}

/// Human-readable duration, e.g. `12 ms` or `1.46 s`
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{millis} ms")
    } else {
        format!("{:.2} s", duration.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::config::Config;

    /// Records the order actions run in; optionally fails or panics in one task
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail: Option<&'static str>,
        panic: Option<&'static str>,
        missing: Option<&'static str>,
    }

    impl ActionHandler for Recorder {
        fn run(&self, task: &str, _action: Action) -> Result<Outcome> {
            std::thread::sleep(Duration::from_millis(5));
            self.calls.lock().push(task.to_string());

            if self.panic == Some(task) {
                panic!("{task} blew up");
            }
            if self.missing == Some(task) {
                return Err(PipeError::MissingSource {
                    path: PathBuf::from("src/sass"),
                });
            }

            if self.fail == Some(task) {
                return Err(PipeError::TaskFailed {
                    task: task.to_string(),
                    message: "boom".to_string(),
                });
            }
            Ok(Outcome {
                written: 1,
                failed: 0,
            })
        }
    }

    fn executor(recorder: Arc<Recorder>) -> Executor {
        let graph = TaskGraph::from_config(&Config::default()).unwrap();
        Executor::new(
            Arc::new(graph),
            recorder,
            ExecutorConfig {
                quiet: true,
                ..ExecutorConfig::default()
            },
        )
    }

    fn position(calls: &[String], name: &str) -> usize {
        calls.iter().position(|c| c == name).unwrap()
    }

    #[tokio::test]
    async fn test_default_runs_each_action_once() {
        let recorder = Arc::new(Recorder::default());
        let results = executor(recorder.clone()).execute("default").await.unwrap();

        let calls = recorder.calls.lock().clone();
        let mut sorted = calls.clone();
        sorted.sort();
        assert_eq!(sorted, vec!["browser-sync", "pug", "sass", "watch"]);
        assert_eq!(results.len(), 5);
    }

    #[tokio::test]
    async fn test_server_starts_after_compilation() {
        let recorder = Arc::new(Recorder::default());
        executor(recorder.clone()).execute("default").await.unwrap();

        let calls = recorder.calls.lock().clone();
        assert!(position(&calls, "sass") < position(&calls, "browser-sync"));
        assert!(position(&calls, "pug") < position(&calls, "browser-sync"));
    }

    #[tokio::test]
    async fn test_rebuild_runs_pug_first() {
        let recorder = Arc::new(Recorder::default());
        executor(recorder.clone()).execute("rebuild").await.unwrap();

        assert_eq!(*recorder.calls.lock(), vec!["pug", "rebuild"]);
    }

    #[tokio::test]
    async fn test_unknown_task_runs_nothing() {
        let recorder = Arc::new(Recorder::default());
        let result = executor(recorder.clone()).execute("deploy").await;

        assert!(matches!(result, Err(PipeError::TaskNotFound { .. })));
        assert!(recorder.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failure_stops_later_groups() {
        let recorder = Arc::new(Recorder {
            fail: Some("sass"),
            ..Recorder::default()
        });
        let result = executor(recorder.clone()).execute("default").await;

        assert!(matches!(result, Err(PipeError::TaskFailed { task, .. }) if task == "sass"));
        assert!(!recorder.calls.lock().contains(&"browser-sync".to_string()));
    }

    #[tokio::test]
    async fn test_panicking_task_is_named_in_error() {
        let recorder = Arc::new(Recorder {
            panic: Some("pug"),
            ..Recorder::default()
        });
        let result = executor(recorder.clone()).execute("build").await;

        assert!(matches!(result, Err(PipeError::TaskFailed { task, .. }) if task == "pug"));
        assert!(recorder.calls.lock().contains(&"sass".to_string()));
    }

    #[tokio::test]
    async fn test_missing_sources_do_not_stop_the_server() {
        let recorder = Arc::new(Recorder {
            missing: Some("sass"),
            ..Recorder::default()
        });
        executor(recorder.clone()).execute("default").await.unwrap();

        assert!(recorder.calls.lock().contains(&"browser-sync".to_string()));
    }

    #[tokio::test]
    async fn test_missing_sources_fail_a_one_shot_build() {
        let recorder = Arc::new(Recorder {
            missing: Some("sass"),
            ..Recorder::default()
        });
        let result = executor(recorder).execute("build").await;

        assert!(matches!(result, Err(PipeError::MissingSource { .. })));
    }

    #[tokio::test]
    async fn test_dry_run_runs_nothing() {
        let recorder = Arc::new(Recorder::default());
        let graph = TaskGraph::from_config(&Config::default()).unwrap();
        let exec = Executor::new(
            Arc::new(graph),
            recorder.clone(),
            ExecutorConfig {
                dry_run: true,
                quiet: true,
                ..ExecutorConfig::default()
            },
        );

        assert!(exec.execute("build").await.unwrap().is_empty());
        assert!(recorder.calls.lock().is_empty());
    }

    #[test]
    fn test_keeps_running() {
        let exec = executor(Arc::new(Recorder::default()));

        assert!(exec.keeps_running("default").unwrap());
        assert!(exec.keeps_running("watch").unwrap());
        assert!(!exec.keeps_running("build").unwrap());
        assert!(!exec.keeps_running("rebuild").unwrap());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(12)), "12 ms");
        assert_eq!(format_duration(Duration::from_millis(1460)), "1.46 s");
    }
}
