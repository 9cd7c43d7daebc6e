use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn lantana() -> Command {
    Command::cargo_bin("lantana").expect("binary exists")
}

#[test]
fn run_executes_a_script_file() {
    let dir = tempdir().expect("create temp dir");
    let script = dir.path().join("greet.lan");
    fs::write(
        &script,
        "function greet(who) {\n    print(\"Hello, \" + who);\n}\ngreet(\"Lantana\");\n",
    )
    .expect("write script");

    lantana()
        .arg("run")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("Hello, Lantana"));
}

#[test]
fn eval_prints_builtin_output() {
    lantana()
        .arg("eval")
        .arg("print(2 + 3);")
        .assert()
        .success()
        .stdout(predicate::str::contains("5"));
}

#[test]
fn eval_reports_parse_errors_with_a_failing_exit() {
    lantana()
        .arg("eval")
        .arg("if (1) { print(1);")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unterminated block"));
}

#[test]
fn eval_reports_runtime_errors_with_a_failing_exit() {
    lantana()
        .arg("eval")
        .arg("10 / 0;")
        .assert()
        .failure()
        .stderr(predicate::str::contains("zero"));
}

#[test]
fn check_reports_warnings_without_running() {
    let dir = tempdir().expect("create temp dir");
    let script = dir.path().join("dupes.lan");
    fs::write(&script, "let a = 1;\nlet a = 2;\nprint(a);\n").expect("write script");

    lantana()
        .arg("check")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("3").not())
        .stderr(predicate::str::contains("bound more than once"));
}

#[test]
fn run_surfaces_parallel_output() {
    let dir = tempdir().expect("create temp dir");
    let script = dir.path().join("par.lan");
    fs::write(&script, "parallel { print(\"one\"); print(\"two\"); }\n").expect("write script");

    lantana()
        .arg("run")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("one").and(predicate::str::contains("two")));
}
