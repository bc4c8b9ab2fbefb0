//! The actions behind the built-in tasks

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use console::style;
use parking_lot::Mutex;

use crate::config::{Action, Config};
use crate::error::Result;
use crate::executor::{ActionHandler, Outcome};
use crate::pipeline::{Pipeline, PipelineReport, SourceCompiler};
use crate::reload::{ReloadChannel, ReloadEvent};
use crate::server::DevServer;
use crate::style::StyleCompiler;
use crate::template::TemplateCompiler;

/// Compilers, reload channel and dev server of one project
pub struct Toolchain {
    config: Arc<Config>,
    templates: TemplateCompiler,
    styles: StyleCompiler,
    reload: ReloadChannel,
    server: Mutex<Option<DevServer>>,
    quiet: bool,
}

impl Toolchain {
    pub fn new(config: Arc<Config>, reload: ReloadChannel) -> Result<Self> {
        let styles = StyleCompiler::new(config.style_load_paths(), &config.style.browsers)?;

        Ok(Self {
            config,
            templates: TemplateCompiler::new(),
            styles,
            reload,
            server: Mutex::new(None),
            quiet: false,
        })
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// The dev server, once a `serve` action has started it
    pub fn server(&self) -> Option<DevServer> {
        self.server.lock().clone()
    }

    /// Run one pipeline; per-file failures are reported here and counted
    fn compile(
        &self,
        compiler: &dyn SourceCompiler,
        from: &Path,
        to: &Path,
    ) -> Result<(Vec<PathBuf>, Outcome)> {
        let PipelineReport { written, failed } = Pipeline::new(compiler, from, to).run()?;
        let outcome = Outcome {
            written: written.len(),
            failed: failed.len(),
        };

        for (path, error) in failed {
            tracing::debug!(path = %path.display(), line = ?error.line(), "compile failed");
            if !self.quiet {
                eprintln!("{:?}", miette::Report::new(error));
            }
        }

        Ok((written, outcome))
    }

    fn serve(&self) -> Result<()> {
        let mut server = self.server.lock();
        if server.is_some() {
            return Ok(());
        }

        let started = DevServer::start(&self.config.server, &self.reload)?;
        if !self.quiet {
            println!(
                "{} Serving {} at {}",
                style("»").green(),
                style(self.config.server.base_dir.display()).dim(),
                style(started.url()).cyan().underlined()
            );
        }
        *server = Some(started);
        Ok(())
    }

    /// URL path of a file under the document root
    fn url_path(&self, file: &Path) -> String {
        let relative = file
            .strip_prefix(&self.config.server.base_dir)
            .ok()
            .filter(|rel| rel.components().all(|c| matches!(c, Component::Normal(_))));

        match relative {
            Some(rel) => {
                let parts: Vec<_> = rel.iter().map(|p| p.to_string_lossy()).collect();
                format!("/{}", parts.join("/"))
            }
            None => format!(
                "/{}",
                file.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            ),
        }
    }
}

impl ActionHandler for Toolchain {
    fn run(&self, task: &str, action: Action) -> Result<Outcome> {
        tracing::debug!(task, action = action.as_str(), "running action");
        let paths = &self.config.paths;

        match action {
            Action::Template => {
                let (_, outcome) = self.compile(&self.templates, &paths.templates, &paths.dist)?;
                Ok(outcome)
            }
            Action::Style => {
                let (written, outcome) = self.compile(&self.styles, &paths.sass, &paths.css)?;
                for written in &written {
                    self.reload.send(ReloadEvent::StyleChanged {
                        path: self.url_path(written),
                    });
                }
                Ok(outcome)
            }
            Action::Reload => {
                self.reload.send(ReloadEvent::FullReload);
                Ok(Outcome::default())
            }
            Action::Serve => {
                self.serve()?;
                Ok(Outcome::default())
            }
            // Watchers are started by the executor
            Action::Watch => Ok(Outcome::default()),
        }
    }
}
