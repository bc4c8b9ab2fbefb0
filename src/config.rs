//! Configuration parsing for frontpipe.toml
//!
//! Every setting has a default matching the classic front-end layout, so a
//! project without a config file gets the stock `pug`/`sass`/`browser-sync`
//! pipeline. A config file only needs the parts it changes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{PipeError, Result};

/// Default config file names to search for
pub const CONFIG_FILES: &[&str] = &["frontpipe.toml", "Frontpipe.toml"];

/// Task run when no task name is given
pub const DEFAULT_TASK: &str = "default";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Source and output locations
    #[serde(default)]
    pub paths: Paths,

    /// Stylesheet compilation settings
    #[serde(default)]
    pub style: StyleSettings,

    /// Dev server settings
    #[serde(default)]
    pub server: ServerSettings,

    /// Task definitions, merged over the built-in tasks
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskConfig>,

    /// Watch registrations (replace the defaults when present)
    #[serde(default = "default_watch")]
    pub watch: Vec<WatchConfig>,

    /// Directory relative paths are resolved against
    #[serde(skip)]
    pub root: PathBuf,
}

/// Filesystem roles used by the tasks
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Paths {
    /// Compiled markup output
    #[serde(default = "default_dist")]
    pub dist: PathBuf,

    /// Template sources (top-level files are entries)
    #[serde(default = "default_templates")]
    pub templates: PathBuf,

    /// Style sources (top-level non-partial files are entries)
    #[serde(default = "default_sass")]
    pub sass: PathBuf,

    /// Compiled CSS output
    #[serde(default = "default_css")]
    pub css: PathBuf,

    /// Data sources (reserved)
    #[serde(default = "default_data")]
    pub data: PathBuf,
}

/// Stylesheet compilation settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StyleSettings {
    /// Browserslist queries used for vendor prefixing
    #[serde(default = "default_browsers")]
    pub browsers: Vec<String>,

    /// Extra import search paths (the sass root is always searched)
    #[serde(default)]
    pub include_paths: Vec<PathBuf>,
}

/// Dev server settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSettings {
    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Live-reload WebSocket port (the next free port is used if taken)
    #[serde(default = "default_reload_port")]
    pub reload_port: u16,

    /// Document root
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Show a "Connected" banner in the browser
    #[serde(default)]
    pub notify: bool,
}

/// What a task does once its dependencies are done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// Compile templates to markup
    Template,
    /// Compile stylesheets to CSS
    Style,
    /// Tell browsers to reload the page
    Reload,
    /// Start the static server and live-reload channel
    Serve,
    /// Register file watchers
    Watch,
}

impl Action {
    /// Actions that leave something running after they return
    pub fn is_long_lived(self) -> bool {
        matches!(self, Action::Serve | Action::Watch)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Template => "template",
            Action::Style => "style",
            Action::Reload => "reload",
            Action::Serve => "serve",
            Action::Watch => "watch",
        }
    }
}

/// Configuration for a single task
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    /// Human-readable description
    #[serde(default)]
    pub desc: Option<String>,

    /// Tasks that must complete before this one
    #[serde(default)]
    pub depends: Vec<String>,

    /// Work performed after the dependencies
    #[serde(default)]
    pub action: Option<Action>,
}

/// A glob whose changes re-run a task
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    pub glob: String,
    pub task: String,
}

fn default_dist() -> PathBuf {
    PathBuf::from("../templates/")
}

fn default_templates() -> PathBuf {
    PathBuf::from("./src/")
}

fn default_sass() -> PathBuf {
    PathBuf::from("./src/sass/")
}

fn default_css() -> PathBuf {
    PathBuf::from("../static/assets/")
}

fn default_data() -> PathBuf {
    PathBuf::from("./src/_data/")
}

fn default_browsers() -> Vec<String> {
    ["last 15 versions", "> 1%", "ie 8", "ie 7"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_reload_port() -> u16 {
    35729
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("../")
}

fn default_watch() -> Vec<WatchConfig> {
    [
        ("./src/sass/**/*.scss", "sass"),
        ("./src/**/*.pug", "rebuild"),
        ("./src/*.pug", "rebuild"),
    ]
    .iter()
    .map(|(glob, task)| WatchConfig {
        glob: glob.to_string(),
        task: task.to_string(),
    })
    .collect()
}

/// The task table of the stock pipeline
pub fn builtin_tasks() -> BTreeMap<String, TaskConfig> {
    let task = |desc: &str, depends: &[&str], action: Option<Action>| TaskConfig {
        desc: Some(desc.to_string()),
        depends: depends.iter().map(|d| d.to_string()).collect(),
        action,
    };

    BTreeMap::from([
        (
            "pug".to_string(),
            task("Compile .pug templates", &[], Some(Action::Template)),
        ),
        (
            "sass".to_string(),
            task("Compile .scss into prefixed css", &[], Some(Action::Style)),
        ),
        (
            "rebuild".to_string(),
            task("Recompile templates and reload the browser", &["pug"], Some(Action::Reload)),
        ),
        (
            "browser-sync".to_string(),
            task("Compile everything, then start the dev server", &["sass", "pug"], Some(Action::Serve)),
        ),
        (
            "watch".to_string(),
            task("Recompile on source changes", &[], Some(Action::Watch)),
        ),
        (
            "build".to_string(),
            task("Compile sass and pug once", &["sass", "pug"], None),
        ),
        (
            DEFAULT_TASK.to_string(),
            task("Serve with live reload and watch for changes", &["browser-sync", "watch"], None),
        ),
    ])
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            dist: default_dist(),
            templates: default_templates(),
            sass: default_sass(),
            css: default_css(),
            data: default_data(),
        }
    }
}

impl Default for StyleSettings {
    fn default() -> Self {
        Self {
            browsers: default_browsers(),
            include_paths: Vec::new(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            reload_port: default_reload_port(),
            base_dir: default_base_dir(),
            notify: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: Paths::default(),
            style: StyleSettings::default(),
            server: ServerSettings::default(),
            tasks: builtin_tasks(),
            watch: default_watch(),
            root: PathBuf::from("."),
        }
    }
}

impl Config {
    /// Load configuration from the specified path, search for it, or fall
    /// back to the defaults rooted at the current directory.
    pub fn load(path: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let config_path = match path {
            Some(p) if p.exists() => Some(p.to_path_buf()),
            Some(p) => {
                return Err(PipeError::ConfigNotFound {
                    searched: vec![p.to_path_buf()],
                })
            }
            None => Self::find_config()?,
        };

        let Some(config_path) = config_path else {
            tracing::debug!("no config file found, using defaults");
            return Self::with_root(std::env::current_dir()?).map(|c| (c, None));
        };

        let content = std::fs::read_to_string(&config_path)?;
        let root = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let root = if root.as_os_str().is_empty() {
            std::env::current_dir()?
        } else {
            root
        };

        let config = Self::parse(&content, &root).map_err(|e| match e {
            PipeError::ConfigParse { source, .. } => PipeError::ConfigParse {
                source,
                path: config_path.clone(),
            },
            other => other,
        })?;

        tracing::debug!(path = %config_path.display(), "loaded config");
        Ok((config, Some(config_path)))
    }

    /// Default configuration with relative paths resolved against `root`
    pub fn with_root(root: impl Into<PathBuf>) -> Result<Self> {
        let mut config = Self {
            root: root.into(),
            ..Self::default()
        };
        config.resolve_paths();
        config.validate()?;
        Ok(config)
    }

    /// Parse config file contents, merge the built-in tasks and resolve paths
    pub fn parse(content: &str, root: &Path) -> Result<Self> {
        let mut config: Config = toml::from_str(content).map_err(|e| PipeError::ConfigParse {
            source: e,
            path: root.to_path_buf(),
        })?;

        let mut tasks = builtin_tasks();
        tasks.append(&mut config.tasks);
        config.tasks = tasks;
        config.root = root.to_path_buf();

        config.resolve_paths();
        config.validate()?;
        Ok(config)
    }

    /// Search for config file starting from current directory
    fn find_config() -> Result<Option<PathBuf>> {
        let mut current = std::env::current_dir()?;

        loop {
            for name in CONFIG_FILES {
                let candidate = current.join(name);
                if candidate.exists() {
                    return Ok(Some(candidate));
                }
            }

            if !current.pop() {
                return Ok(None);
            }
        }
    }

    fn resolve_paths(&mut self) {
        let root = self.root.clone();
        let resolve = |p: &mut PathBuf| *p = resolve_path(&root, p);

        resolve(&mut self.paths.dist);
        resolve(&mut self.paths.templates);
        resolve(&mut self.paths.sass);
        resolve(&mut self.paths.css);
        resolve(&mut self.paths.data);
        resolve(&mut self.server.base_dir);
        self.style.include_paths.iter_mut().for_each(resolve);
    }

    /// Validate the task table
    fn validate(&self) -> Result<()> {
        for (name, task) in &self.tasks {
            if task.action.is_none() && task.depends.is_empty() {
                return Err(PipeError::InvalidTask {
                    task: name.clone(),
                    reason: "Task must have an 'action' or 'depends'".to_string(),
                });
            }

            if task.depends.contains(name) {
                return Err(PipeError::InvalidTask {
                    task: name.clone(),
                    reason: "Task cannot depend on itself".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Import search path for stylesheets, sass root first
    pub fn style_load_paths(&self) -> Vec<PathBuf> {
        std::iter::once(self.paths.sass.clone())
            .chain(self.style.include_paths.iter().cloned())
            .collect()
    }

    /// Render the effective configuration as a starter file
    pub fn to_toml(&self) -> String {
        #[derive(Serialize)]
        struct Starter<'a> {
            paths: &'a Paths,
            style: &'a StyleSettings,
            server: &'a ServerSettings,
            watch: &'a [WatchConfig],
        }

        let starter = Starter {
            paths: &Paths::default(),
            style: &self.style,
            server: &ServerSettings::default(),
            watch: &self.watch,
        };
        toml::to_string_pretty(&starter).unwrap_or_default()
    }
}

/// Expand `~`/`$VARS` and anchor relative paths at `root`
fn resolve_path(root: &Path, path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    let expanded = shellexpand::full(&raw)
        .map(|s| PathBuf::from(s.as_ref()))
        .unwrap_or_else(|_| path.to_path_buf());

    if expanded.is_absolute() {
        expanded
    } else {
        root.join(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_stock_layout() {
        let config = Config::with_root("/site/front").unwrap();

        assert_eq!(config.paths.dist, Path::new("/site/front/../templates/"));
        assert_eq!(config.paths.sass, Path::new("/site/front/./src/sass/"));
        assert_eq!(config.paths.css, Path::new("/site/front/../static/assets/"));
        assert_eq!(config.server.base_dir, Path::new("/site/front/../"));
        assert!(!config.server.notify);
        assert_eq!(
            config.style.browsers,
            vec!["last 15 versions", "> 1%", "ie 8", "ie 7"]
        );
        assert_eq!(config.watch.len(), 3);
        assert_eq!(config.tasks.len(), 7);
    }

    #[test]
    fn test_builtin_dependencies() {
        let tasks = builtin_tasks();

        assert_eq!(tasks["rebuild"].depends, vec!["pug"]);
        assert_eq!(tasks["browser-sync"].depends, vec!["sass", "pug"]);
        assert_eq!(tasks["build"].depends, vec!["sass", "pug"]);
        assert!(tasks["build"].action.is_none());
        assert_eq!(tasks["default"].depends, vec!["browser-sync", "watch"]);
        assert_eq!(tasks["watch"].action, Some(Action::Watch));
    }

    #[test]
    fn test_parse_overrides() {
        let toml = r#"
            [paths]
            dist = "out"

            [server]
            port = 8080
            notify = true

            [tasks.lint-free]
            desc = "Styles only"
            depends = ["sass"]
        "#;

        let config = Config::parse(toml, Path::new("/proj")).unwrap();
        assert_eq!(config.paths.dist, Path::new("/proj/out"));
        assert_eq!(config.paths.css, Path::new("/proj/../static/assets/"));
        assert_eq!(config.server.port, 8080);
        assert!(config.server.notify);
        assert!(config.tasks.contains_key("lint-free"));
        assert!(config.tasks.contains_key("pug"));
        assert_eq!(config.watch.len(), 3);
    }

    #[test]
    fn test_parse_watch_replaces_defaults() {
        let toml = r#"
            [[watch]]
            glob = "styles/**/*.scss"
            task = "sass"
        "#;

        let config = Config::parse(toml, Path::new("/proj")).unwrap();
        assert_eq!(
            config.watch,
            vec![WatchConfig {
                glob: "styles/**/*.scss".to_string(),
                task: "sass".to_string(),
            }]
        );
    }

    #[test]
    fn test_rejects_empty_task() {
        let toml = r#"
            [tasks.nothing]
            desc = "Does nothing"
        "#;

        let result = Config::parse(toml, Path::new("/proj"));
        assert!(matches!(result, Err(PipeError::InvalidTask { .. })));
    }

    #[test]
    fn test_rejects_self_dependency() {
        let toml = r#"
            [tasks.loop]
            depends = ["loop"]
            action = "reload"
        "#;

        let result = Config::parse(toml, Path::new("/proj"));
        assert!(matches!(result, Err(PipeError::InvalidTask { .. })));
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let result = Config::parse("[paths]\nbogus = \"x\"\n", Path::new("/proj"));
        assert!(matches!(result, Err(PipeError::ConfigParse { .. })));
    }

    #[test]
    fn test_starter_file_round_trips() {
        let config = Config::default();
        let parsed = Config::parse(&config.to_toml(), Path::new("/proj")).unwrap();
        assert_eq!(parsed.watch, config.watch);
        assert_eq!(parsed.server.port, 3000);
    }
}
