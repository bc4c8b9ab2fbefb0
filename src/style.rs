//! Stylesheet compilation
//!
//! SCSS is compiled with `grass`, then parsed again by `lightningcss`, which
//! adds the vendor prefixes the browser matrix needs and minifies the result.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};

use crate::error::{CompileError, PipeError, Result};
use crate::pipeline::SourceCompiler;

/// Compiles `.scss` entry files into minified, prefixed CSS
#[derive(Debug, Clone)]
pub struct StyleCompiler {
    load_paths: Vec<PathBuf>,
    targets: Targets,
}

impl StyleCompiler {
    /// `browsers` are browserslist queries, e.g. `"last 2 versions"`
    pub fn new(load_paths: Vec<PathBuf>, browsers: &[String]) -> Result<Self> {
        let browsers = if browsers.is_empty() {
            None
        } else {
            prefix_targets(browsers)?
        };

        Ok(Self {
            load_paths,
            targets: Targets {
                browsers,
                ..Targets::default()
            },
        })
    }

    /// Partials (`_name.scss`) are only pulled in through imports
    pub fn is_partial(path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| name.to_string_lossy().starts_with('_'))
    }

    /// Compile an SCSS file to prefixed, minified CSS
    pub fn compile_file(&self, path: &Path) -> std::result::Result<String, CompileError> {
        let options = self
            .load_paths
            .iter()
            .fold(
                grass::Options::default().style(grass::OutputStyle::Compressed),
                |options, dir| options.load_path(dir),
            );

        let css = grass::from_path(path, &options).map_err(|e| CompileError::Style {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        self.finish(&css, path)
    }

    /// Prefix and minify plain CSS
    pub fn finish(&self, css: &str, path: &Path) -> std::result::Result<String, CompileError> {
        let style_error = |message: String| CompileError::Style {
            path: path.to_path_buf(),
            message,
        };

        let mut sheet = StyleSheet::parse(
            css,
            ParserOptions {
                filename: path.display().to_string(),
                ..ParserOptions::default()
            },
        )
        .map_err(|e| style_error(e.to_string()))?;

        sheet
            .minify(MinifyOptions {
                targets: self.targets.clone(),
                ..MinifyOptions::default()
            })
            .map_err(|e| style_error(e.to_string()))?;

        let output = sheet
            .to_css(PrinterOptions {
                minify: true,
                targets: self.targets.clone(),
                ..PrinterOptions::default()
            })
            .map_err(|e| style_error(e.to_string()))?;

        Ok(output.code)
    }
}

/// Declarations whose vendor prefixes start and stop at different browser
/// versions
const PREFIX_SAMPLE: &str = "a{user-select:none;appearance:none;display:flex;flex:1;\
order:1;align-items:center;justify-content:center;transform:scale(2);transition:opacity 1s;\
animation:spin 1s;backdrop-filter:blur(2px);text-size-adjust:none;mask-image:none;\
box-decoration-break:clone;hyphens:auto;tab-size:4}b{display:inline-flex}\
c::placeholder{color:red}d:fullscreen{color:red}@keyframes spin{to{opacity:0}}";

/// Resolve browserslist queries to one version per browser.
///
/// lightningcss prefixes for a single version of each browser. Taking the
/// lowest one lets legacy entries such as `ie 7` hide the later versions
/// that actually need prefixes, so each browser gets the resolved version
/// that prefixes the most, lowest first on ties.
fn prefix_targets(queries: &[String]) -> Result<Option<Browsers>> {
    let distribs = browserslist::resolve(queries, &browserslist::Opts::default()).map_err(|e| {
        PipeError::BrowserTargets {
            message: e.to_string(),
        }
    })?;

    let mut versions: BTreeMap<&'static str, BTreeSet<u32>> = BTreeMap::new();
    for distrib in &distribs {
        let browser = canonical(distrib.name());
        let version = parse_version(distrib.version());
        if let (Some(browser), Some(version)) = (browser, version) {
            versions.entry(browser).or_default().insert(version);
        }
    }

    if versions.is_empty() {
        return Ok(None);
    }

    let mut targets = Browsers::default();
    for (browser, found) in &versions {
        *slot(&mut targets, browser) = found.first().copied();
    }

    for (browser, found) in &versions {
        if found.len() < 2 {
            continue;
        }

        let mut best = (0, None);
        for &version in found {
            let mut trial = targets;
            *slot(&mut trial, browser) = Some(version);

            let score = prefix_count(trial);
            if best.1.is_none() || score > best.0 {
                best = (score, Some(version));
            }
        }
        *slot(&mut targets, browser) = best.1;
    }

    Ok(Some(targets))
}

/// Number of vendor-prefixed names in the sample compiled for `browsers`
fn prefix_count(browsers: Browsers) -> usize {
    let targets = Targets {
        browsers: Some(browsers),
        ..Targets::default()
    };

    let Ok(mut sheet) = StyleSheet::parse(PREFIX_SAMPLE, ParserOptions::default()) else {
        return 0;
    };
    if sheet
        .minify(MinifyOptions {
            targets,
            ..MinifyOptions::default()
        })
        .is_err()
    {
        return 0;
    }

    let Ok(output) = sheet.to_css(PrinterOptions {
        minify: true,
        targets,
        ..PrinterOptions::default()
    }) else {
        return 0;
    };

    ["-webkit-", "-moz-", "-ms-", "-o-"]
        .iter()
        .map(|prefix| output.code.matches(prefix).count())
        .sum()
}

/// lightningcss's name for a browserslist browser
fn canonical(name: &str) -> Option<&'static str> {
    Some(match name {
        "android" => "android",
        "chrome" | "and_chr" => "chrome",
        "edge" => "edge",
        "firefox" | "and_ff" => "firefox",
        "ie" => "ie",
        "ios_saf" => "ios_saf",
        "opera" | "op_mob" => "opera",
        "safari" => "safari",
        "samsung" => "samsung",
        _ => return None,
    })
}

fn slot<'b>(browsers: &'b mut Browsers, browser: &str) -> &'b mut Option<u32> {
    match browser {
        "android" => &mut browsers.android,
        "chrome" => &mut browsers.chrome,
        "edge" => &mut browsers.edge,
        "firefox" => &mut browsers.firefox,
        "ie" => &mut browsers.ie,
        "ios_saf" => &mut browsers.ios_saf,
        "opera" => &mut browsers.opera,
        "samsung" => &mut browsers.samsung,
        _ => &mut browsers.safari,
    }
}

/// `"15.2-15.3"` becomes `15.2.0` packed as `major << 16 | minor << 8 | patch`
fn parse_version(version: &str) -> Option<u32> {
    let mut parts = version.split('-').next()?.split('.');
    let major = parts.next()?.parse::<u32>().ok()?;
    let minor = parts.next().and_then(|v| v.parse::<u32>().ok()).unwrap_or(0);
    let patch = parts.next().and_then(|v| v.parse::<u32>().ok()).unwrap_or(0);
    Some(((major & 0xff) << 16) | ((minor & 0xff) << 8) | (patch & 0xff))
}

impl SourceCompiler for StyleCompiler {
    fn source_extension(&self) -> &'static str {
        "scss"
    }

    fn output_extension(&self) -> &'static str {
        "css"
    }

    fn is_entry(&self, path: &Path) -> bool {
        !Self::is_partial(path)
    }

    fn compile(&self, path: &Path) -> std::result::Result<String, CompileError> {
        self.compile_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;

    fn browsers() -> Vec<String> {
        ["last 15 versions", "> 1%", "ie 8", "ie 7"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn write_sources(dir: &Path) {
        std::fs::write(dir.join("_vars.scss"), "$size: 20px;\n$accent: #ff0000;\n").unwrap();
        std::fs::write(
            dir.join("main.scss"),
            r#"
@import 'vars';

.board {
  user-select: none;
  color: $accent;

  .cell {
    width: $size;
    height: $size;
  }
}
"#,
        )
        .unwrap();
    }

    #[test]
    fn test_partials_produce_no_output() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("sass");
        std::fs::create_dir(&src).unwrap();
        write_sources(&src);

        let compiler = StyleCompiler::new(vec![src.clone()], &browsers()).unwrap();
        let dest = temp.path().join("assets");
        let report = Pipeline::new(&compiler, &src, &dest).run().unwrap();

        assert_eq!(report.written, vec![dest.join("main.css")]);
        assert!(!dest.join("_vars.css").exists());
        assert!(!dest.join("vars.css").exists());
    }

    #[test]
    fn test_output_is_minified_and_prefixed() {
        let temp = tempfile::tempdir().unwrap();
        write_sources(temp.path());

        let compiler = StyleCompiler::new(vec![temp.path().to_path_buf()], &browsers()).unwrap();
        let css = compiler.compile_file(&temp.path().join("main.scss")).unwrap();

        assert!(!css.trim_end().contains('\n'), "not minified: {css}");
        assert!(css.contains(".board .cell{"), "nesting not resolved: {css}");
        assert!(css.contains("20px"));
        assert!(css.contains("-webkit-user-select:none"), "not prefixed: {css}");
        assert!(css.contains("-ms-user-select:none"), "not prefixed: {css}");
    }

    #[test]
    fn test_recompiling_is_byte_identical() {
        let temp = tempfile::tempdir().unwrap();
        write_sources(temp.path());

        let compiler = StyleCompiler::new(vec![temp.path().to_path_buf()], &browsers()).unwrap();
        let main = temp.path().join("main.scss");

        assert_eq!(
            compiler.compile_file(&main).unwrap(),
            compiler.compile_file(&main).unwrap()
        );
    }

    #[test]
    fn test_syntax_error_is_a_diagnostic() {
        let temp = tempfile::tempdir().unwrap();
        let bad = temp.path().join("bad.scss");
        std::fs::write(&bad, ".a { color: $missing; }\n").unwrap();

        let compiler = StyleCompiler::new(vec![], &browsers()).unwrap();
        let err = compiler.compile_file(&bad).unwrap_err();

        assert!(matches!(err, CompileError::Style { .. }));
    }

    #[test]
    fn test_legacy_versions_do_not_hide_prefixes() {
        let browsers = vec!["ie 11".to_string(), "ie 7".to_string()];
        let compiler = StyleCompiler::new(vec![], &browsers).unwrap();
        let css = compiler
            .finish(".a{user-select:none}", Path::new("a.css"))
            .unwrap();

        assert_eq!(css, ".a{-ms-user-select:none;user-select:none}");
    }

    #[test]
    fn test_prefixes_follow_the_matrix() {
        let modern = StyleCompiler::new(vec![], &["chrome 120".to_string()]).unwrap();
        let css = modern.finish(".a{user-select:none}", Path::new("a.css")).unwrap();
        assert_eq!(css, ".a{user-select:none}");
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("10"), Some(10 << 16));
        assert_eq!(parse_version("15.2-15.3"), Some((15 << 16) | (2 << 8)));
        assert_eq!(parse_version("TP"), None);
    }

    #[test]
    fn test_invalid_browser_query() {
        let result = StyleCompiler::new(vec![], &["no such browser 99".to_string()]);
        assert!(matches!(result, Err(PipeError::BrowserTargets { .. })));
    }
}
