//! Read → compile → write pipeline shared by the compile tasks
//!
//! A pipeline takes the entry files directly inside a source directory
//! (non-recursive), runs each through a [`SourceCompiler`] and writes the
//! result next to its siblings in the destination directory, keeping the
//! file stem. A file that fails to compile is reported and skipped; it never
//! aborts the rest of the run.

use std::path::{Path, PathBuf};

use crate::error::{CompileError, PipeError, Result};

/// A compiler the pipeline can drive
pub trait SourceCompiler: Send + Sync {
    /// Extension of source files, without the dot
    fn source_extension(&self) -> &'static str;

    /// Extension of compiled files, without the dot
    fn output_extension(&self) -> &'static str;

    /// Whether a source file produces output of its own
    fn is_entry(&self, _path: &Path) -> bool {
        true
    }

    fn compile(&self, path: &Path) -> std::result::Result<String, CompileError>;
}

/// Files written and files that failed during one pipeline run
#[derive(Debug, Default)]
pub struct PipelineReport {
    pub written: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, CompileError)>,
}

/// One source directory compiled into one destination directory
pub struct Pipeline<'c> {
    compiler: &'c dyn SourceCompiler,
    source_dir: PathBuf,
    dest_dir: PathBuf,
}

impl<'c> Pipeline<'c> {
    pub fn new(
        compiler: &'c dyn SourceCompiler,
        source_dir: impl Into<PathBuf>,
        dest_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            compiler,
            source_dir: source_dir.into(),
            dest_dir: dest_dir.into(),
        }
    }

    /// Entry files, sorted by path
    pub fn entries(&self) -> Result<Vec<PathBuf>> {
        if !self.source_dir.is_dir() {
            return Err(PipeError::MissingSource {
                path: self.source_dir.clone(),
            });
        }

        let pattern = format!(
            "{}/*.{}",
            glob::Pattern::escape(&self.source_dir.to_string_lossy()),
            self.compiler.source_extension()
        );

        let paths = glob::glob(&pattern).map_err(|e| {
            PipeError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                e.to_string(),
            ))
        })?;

        let mut entries = Vec::new();
        for path in paths {
            let path = path.map_err(std::io::Error::from)?;
            if path.is_file() && self.compiler.is_entry(&path) {
                entries.push(path);
            }
        }
        entries.sort();
        Ok(entries)
    }

    /// Where the compiled form of `source` is written
    pub fn output_path(&self, source: &Path) -> PathBuf {
        let stem = source.file_stem().unwrap_or(source.as_os_str());
        self.dest_dir.join(format!(
            "{}.{}",
            stem.to_string_lossy(),
            self.compiler.output_extension()
        ))
    }

    /// Compile every entry; I/O failures abort, compile failures are collected
    pub fn run(&self) -> Result<PipelineReport> {
        let entries = self.entries()?;
        let mut report = PipelineReport::default();

        if entries.is_empty() {
            tracing::debug!(dir = %self.source_dir.display(), "no entry files");
            return Ok(report);
        }

        std::fs::create_dir_all(&self.dest_dir)?;

        for entry in entries {
            match self.compiler.compile(&entry) {
                Ok(output) => {
                    let dest = self.output_path(&entry);
                    std::fs::write(&dest, output)?;
                    tracing::debug!(from = %entry.display(), to = %dest.display(), "compiled");
                    report.written.push(dest);
                }
                Err(err) => report.failed.push((entry, err)),
            }
        }

        Ok(report)
    }
}
