use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::{tempdir, TempDir};

fn create_test_files(dir: &TempDir, files: &[(&str, &str)]) -> Result<()> {
    for (name, content) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
    }
    Ok(())
}

fn cli() -> Result<Command> {
    let mut cmd = Command::cargo_bin("filescout-cli")?;
    cmd.env_remove("RUST_LOG");
    Ok(cmd)
}

#[test]
fn test_search_by_name() -> Result<()> {
    let dir = tempdir()?;
    create_test_files(
        &dir,
        &[
            ("quarterly_report.txt", "numbers"),
            ("docs/Report-draft.md", "text"),
            ("unrelated.txt", "report inside"),
        ],
    )?;

    cli()?
        .args(["search", "-q", "report", "-d"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("quarterly_report.txt"))
        .stdout(predicate::str::contains("Report-draft.md"))
        .stdout(predicate::str::contains("unrelated.txt").not())
        .stderr(predicate::str::contains("Search complete"));
    Ok(())
}

#[test]
fn test_search_contents_flag() -> Result<()> {
    let dir = tempdir()?;
    create_test_files(&dir, &[("letter.txt", "please pay the invoice")])?;

    cli()?
        .args(["search", "-q", "invoice", "-d"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("letter.txt").not());

    cli()?
        .args(["search", "-q", "invoice", "--contents", "-d"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("letter.txt"));
    Ok(())
}

#[test]
fn test_case_sensitive_flag() -> Result<()> {
    let dir = tempdir()?;
    create_test_files(&dir, &[("abcfile.txt", "")])?;

    cli()?
        .args(["search", "-q", "ABC", "--case-sensitive", "-d"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("abcfile.txt").not());
    Ok(())
}

#[test]
fn test_json_output() -> Result<()> {
    let dir = tempdir()?;
    create_test_files(&dir, &[("data.json", "{}")])?;

    let output = cli()?
        .args(["search", "-q", "data", "--json", "-d"])
        .arg(dir.path())
        .output()?;
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout)?;
    let line = stdout.lines().next().expect("one match line");
    let value: serde_json::Value = serde_json::from_str(line)?;
    assert_eq!(value["name"], "data.json");
    assert_eq!(value["size_bytes"], 2);
    assert!(value["absolute_path"]
        .as_str()
        .unwrap()
        .ends_with("data.json"));
    Ok(())
}

#[test]
fn test_empty_query_is_rejected() -> Result<()> {
    let dir = tempdir()?;

    cli()?
        .current_dir(dir.path())
        .args(["search", "-d"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid request"));
    Ok(())
}

#[test]
fn test_missing_root_is_rejected() -> Result<()> {
    let dir = tempdir()?;

    cli()?
        .args(["search", "-q", "x", "-d"])
        .arg(dir.path().join("missing"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
    Ok(())
}

#[test]
fn test_timeout_ends_search() -> Result<()> {
    let dir = tempdir()?;
    for i in 0..500 {
        fs::write(dir.path().join(format!("f_{}.txt", i)), "")?;
    }

    cli()?
        .args(["search", "-q", "f_", "--timeout", "1ms", "-d"])
        .arg(dir.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("Search"));
    Ok(())
}

#[test]
fn test_count_command() -> Result<()> {
    let dir = tempdir()?;
    create_test_files(&dir, &[("a.txt", ""), ("b/c.txt", ""), (".hidden", "")])?;

    cli()?
        .args(["count", "-d"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::diff("3\n"));
    Ok(())
}

#[test]
fn test_config_file_supplies_query() -> Result<()> {
    let dir = tempdir()?;
    create_test_files(&dir, &[("invoice_march.pdf", "")])?;
    let config_path = dir.path().join("filescout.yaml");
    fs::write(&config_path, "query: \"invoice\"\n")?;

    cli()?
        .args(["search", "--config"])
        .arg(&config_path)
        .arg("-d")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("invoice_march.pdf"));
    Ok(())
}

#[test]
fn test_missing_config_file_fails() -> Result<()> {
    let dir = tempdir()?;

    cli()?
        .args(["search", "-q", "x", "--config"])
        .arg(dir.path().join("absent.yaml"))
        .arg("-d")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
    Ok(())
}

#[test]
fn test_binary_contents_log_nothing_by_default() -> Result<()> {
    let dir = tempdir()?;
    for i in 0..5 {
        fs::write(
            dir.path().join(format!("blob_{}.bin", i)),
            b"\xff\xfe\x00binary\xc3 payload",
        )?;
    }

    cli()?
        .args(["search", "-q", "zzz", "--contents", "-d"])
        .arg(dir.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("WARN").not())
        .stderr(predicate::str::contains("Search complete"));
    Ok(())
}
