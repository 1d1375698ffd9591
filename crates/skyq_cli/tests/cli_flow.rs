use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn cli_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("skyq_cli"))
}

const SQUARE: &str = "|   ra1|  dec1|   ra2|  dec2|   ra3|  dec3|   ra4|  dec4|\n      9     -1     11     -1     11      1      9      1 \n";

const SOURCES: &str = "|      ra|     dec|\n     10.0      0.0 \n     10.5      0.5 \n     50.0     50.0 \n";

fn setup(dir: &Path) -> PathBuf {
    std::fs::write(dir.join("a.tbl"), SQUARE).unwrap();
    std::fs::write(dir.join("src.tbl"), SOURCES).unwrap();
    let list = dir.join("list.tbl");
    std::fs::write(&list, "| identifier | file  |\n| char       | char  |\n  A            a.tbl  \n").unwrap();
    list
}

#[test]
fn build_and_query_scenario() {
    let tmp = tempdir().expect("tempdir");
    let list = setup(tmp.path());
    let out = tmp.path().join("out.tbl");
    let summary = tmp.path().join("summary.tbl");
    let script = format!(
        "box 9 -1 11 -1 11 1 9 1\nregion {out}\npoint 50 50\nregion {out}\ncone 10 0 2\nregion {out}\ntable {src} {sum}\nquit\n",
        out = out.display(),
        src = tmp.path().join("src.tbl").display(),
        sum = summary.display(),
    );

    let assert = cli_cmd().arg(&list).write_stdin(script).assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();

    assert_eq!(lines.len(), 9);
    assert!(lines[0].contains(r#"nset="1", count="1""#));
    assert!(lines[2].contains(r#"command="region""#) && lines[2].contains(r#"match="1""#));
    assert!(lines[4].contains(r#"match="0""#));
    assert!(lines[6].contains(r#"match="1""#));
    assert!(lines[7].contains(r#"nsrc="3", match="2", nomatch="1""#));
    assert!(lines[8].contains(r#"command="quit""#));

    let text = std::fs::read_to_string(&summary).unwrap();
    assert!(text.starts_with("\\fixlen = T\n"));
    assert!(text.contains("  A                    2 "));
}

#[test]
fn persist_then_attach_in_a_fresh_process() {
    let tmp = tempdir().expect("tempdir");
    let list = setup(tmp.path());
    let base = tmp.path().join("idx");
    let built = tmp.path().join("built.tbl");
    let attached = tmp.path().join("attached.tbl");

    cli_cmd()
        .arg("-o")
        .arg(&base)
        .arg(&list)
        .write_stdin(format!("cone 10 0 2\nregion {}\n", built.display()))
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"count="1", match="1""#));
    assert!(tmp.path().join("idx.info").exists());

    cli_cmd()
        .arg("-i")
        .arg(&base)
        .write_stdin(format!("cone 10 0 2\nregion {}\norganize\n", attached.display()))
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"count="1", match="1""#))
        .stdout(predicate::str::contains(r#"command="organize""#));

    assert_eq!(std::fs::read_to_string(built).unwrap(), std::fs::read_to_string(attached).unwrap());
    assert!(tmp.path().join("idx.ref").exists());
}

#[test]
fn command_errors_keep_the_loop_running() {
    let tmp = tempdir().expect("tempdir");
    let list = setup(tmp.path());
    cli_cmd()
        .arg(&list)
        .write_stdin("region x.tbl\nfoo\npoint 1\nsubset Z x.tbl\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("No search region specified"))
        .stdout(predicate::str::contains(r#"command="foo", msg="Invalid command.""#))
        .stdout(predicate::str::contains("Command usage: point <ra> <dec>"))
        .stdout(predicate::str::contains(r#"msg="Quitting""#));
}

#[test]
fn fatal_start_up_errors_exit_nonzero() {
    let tmp = tempdir().expect("tempdir");
    std::fs::write(tmp.path().join("bad.tbl"), "|  x|  y|\n   1   2 \n").unwrap();
    let list = tmp.path().join("list.tbl");
    std::fs::write(&list, "| identifier | file    |\n  B            bad.tbl  \n").unwrap();

    cli_cmd()
        .arg(&list)
        .assert()
        .failure()
        .stdout(predicate::str::contains(r#"stat="ERROR""#));

    cli_cmd()
        .arg("-i")
        .arg(tmp.path().join("missing"))
        .assert()
        .failure()
        .stdout(predicate::str::contains(r#"stat="ERROR""#));

    cli_cmd().assert().failure().stdout(predicate::str::contains("Usage"));
}
