use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn frontpipe(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("frontpipe").unwrap();
    cmd.current_dir(dir).arg("--no-color").env_remove("FRONTPIPE_CONFIG");
    cmd
}

/// Stock layout: sources in `<root>/front`, outputs beside it
fn project() -> tempfile::TempDir {
    let temp = tempfile::tempdir().unwrap();
    let front = temp.path().join("front");
    std::fs::create_dir_all(front.join("src/sass")).unwrap();

    std::fs::write(
        front.join("src/index.pug"),
        "doctype html\nhtml\n  head\n    link(rel=\"stylesheet\", href=\"/static/assets/main.css\")\n  body\n    #board.board\n",
    )
    .unwrap();
    std::fs::write(front.join("src/about.pug"), "p About\n").unwrap();
    std::fs::write(front.join("src/sass/_vars.scss"), "$size: 24px;\n").unwrap();
    std::fs::write(
        front.join("src/sass/main.scss"),
        "@import 'vars';\n.board { .cell { width: $size; } }\n",
    )
    .unwrap();

    temp
}

#[test]
fn test_list_plain() {
    let temp = tempfile::tempdir().unwrap();

    frontpipe(temp.path())
        .args(["list", "--format", "plain"])
        .assert()
        .success()
        .stdout("browser-sync\nbuild\ndefault\npug\nrebuild\nsass\nwatch\n");
}

#[test]
fn test_list_json_with_deps() {
    let temp = tempfile::tempdir().unwrap();

    frontpipe(temp.path())
        .args(["list", "--format", "json", "--deps"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"browser-sync\""))
        .stdout(predicate::str::contains("\"action\": \"serve\""));
}

#[test]
fn test_graph_dot() {
    let temp = tempfile::tempdir().unwrap();

    frontpipe(temp.path())
        .args(["graph", "default", "--format", "dot"])
        .assert()
        .success()
        .stdout(predicate::str::contains("digraph frontpipe {"))
        .stdout(predicate::str::contains("\"sass\" -> \"browser-sync\";"))
        .stdout(predicate::str::contains("\"watch\" -> \"default\";"))
        .stdout(predicate::str::contains("rebuild").not());
}

#[test]
fn test_check_defaults() {
    let temp = tempfile::tempdir().unwrap();

    frontpipe(temp.path())
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("7 tasks, 3 watch patterns"));
}

#[test]
fn test_check_reports_cycle() {
    let temp = tempfile::tempdir().unwrap();
    std::fs::write(
        temp.path().join("frontpipe.toml"),
        "[tasks.a]\ndepends = [\"b\"]\naction = \"reload\"\n\n[tasks.b]\ndepends = [\"a\"]\naction = \"reload\"\n",
    )
    .unwrap();

    frontpipe(temp.path())
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Circular dependency"));
}

#[test]
fn test_unknown_task_fails() {
    let temp = tempfile::tempdir().unwrap();

    frontpipe(temp.path())
        .args(["run", "deploy"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Task 'deploy' not found"));
}

#[test]
fn test_dry_run_prints_plan() {
    let temp = project();

    frontpipe(&temp.path().join("front"))
        .args(["run", "build", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Stage 1:"))
        .stdout(predicate::str::contains("(parallel)"));

    assert!(!temp.path().join("templates").exists());
}

#[test]
fn test_build_compiles_everything() {
    let temp = project();

    frontpipe(&temp.path().join("front"))
        .arg("build")
        .assert()
        .success()
        .stdout(predicate::str::contains("Starting 'sass'..."))
        .stdout(predicate::str::contains("Finished 'build' after"));

    let index = std::fs::read_to_string(temp.path().join("templates/index.html")).unwrap();
    assert!(index.contains("<div class=\"board\" id=\"board\"></div>"));
    assert!(temp.path().join("templates/about.html").exists());

    let css = std::fs::read_to_string(temp.path().join("static/assets/main.css")).unwrap();
    assert!(css.contains(".board .cell{width:24px}"));
    assert!(!temp.path().join("static/assets/vars.css").exists());
}

#[test]
fn test_build_with_cwd_flag() {
    let temp = project();

    frontpipe(temp.path())
        .args(["--cwd", "front", "-q", "build"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Starting").not());

    assert!(temp.path().join("templates/index.html").exists());
}

#[test]
fn test_init_writes_config_once() {
    let temp = tempfile::tempdir().unwrap();

    frontpipe(temp.path()).arg("init").assert().success();

    let written = std::fs::read_to_string(temp.path().join("frontpipe.toml")).unwrap();
    assert!(written.contains("[server]"));
    assert!(written.contains("[[watch]]"));

    frontpipe(temp.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    frontpipe(temp.path()).args(["init", "--force"]).assert().success();
    frontpipe(temp.path()).arg("check").assert().success();
}
