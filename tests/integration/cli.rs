//! The `yxplay` binary

use std::io::Write;
use std::process::{Command, Output};

fn yxplay(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_yxplay"))
        .args(args)
        .env_remove("YXPLAY_ADDR")
        .env_remove("YXPLAY_TIMEOUT_MS")
        .env_remove("YXPLAY_LOG")
        .output()
        .expect("Failed to spawn yxplay")
}

fn source_file(source: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yx").tempfile().unwrap();
    file.write_all(source.as_bytes()).unwrap();
    file
}

#[test]
fn test_eval_prints_response_text() {
    let output = yxplay(&["eval", r#"pub fn Main() { println("from cli"); }"#]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("Output: from cli, Elapsed Time: "), "{}", stdout);
}

#[test]
fn test_eval_fault_exits_non_zero() {
    let output = yxplay(&["eval", r#"pub fn Main() { throw "bad"; }"#]);
    assert!(!output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), r#"{"Error":"bad"}"#);
}

#[test]
fn test_run_file() {
    let file = source_file("type App { pub fn Main() { print(6 * 7); } }");
    let output = yxplay(&["run", file.path().to_str().unwrap()]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("Output: 42, "));
}

#[test]
fn test_check_reports_diagnostics() {
    let good = source_file("pub fn Main() { }");
    assert!(yxplay(&["check", good.path().to_str().unwrap()]).status.success());

    let bad = source_file("pub fn Main() { missing(); }");
    let output = yxplay(&["check", bad.path().to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("E0202"));
}

#[test]
fn test_dump_lists_layout() {
    let file = source_file(r#"pub fn Main() { println("dump me"); }"#);
    let output = yxplay(&["dump", file.path().to_str().unwrap()]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Magic: 0x59584243 (YXBC)"), "{}", stdout);
    assert!(stdout.contains("std.io.println"), "{}", stdout);
    assert!(stdout.contains("(entry)"), "{}", stdout);
}

#[test]
fn test_version() {
    let output = yxplay(&["version"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains(env!("CARGO_PKG_VERSION")));
}
