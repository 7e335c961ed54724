//! End-to-end coverage for the `jeeves` binary's offline commands: `init`
//! scaffolds a usable project, and `workflow validate` accepts what `init`
//! wrote.
use assert_cmd::Command;
use tempfile::tempdir;

#[test]
fn init_scaffolds_config_and_example_workflow() {
    let dir = tempdir().unwrap();

    Command::cargo_bin("jeeves")
        .unwrap()
        .arg("init")
        .arg("--dir")
        .arg(dir.path())
        .assert()
        .success();

    assert!(dir.path().join("jeeves.toml").exists());
    assert!(dir.path().join("workflows/implement.yaml").exists());
    assert!(dir.path().join("data").exists());
}

#[test]
fn init_is_idempotent() {
    let dir = tempdir().unwrap();

    for _ in 0..2 {
        Command::cargo_bin("jeeves")
            .unwrap()
            .arg("init")
            .arg("--dir")
            .arg(dir.path())
            .assert()
            .success();
    }

    assert!(dir.path().join("jeeves.toml").exists());
}

#[test]
fn workflow_validate_accepts_the_generated_example() {
    let dir = tempdir().unwrap();
    Command::cargo_bin("jeeves")
        .unwrap()
        .arg("init")
        .arg("--dir")
        .arg(dir.path())
        .assert()
        .success();

    Command::cargo_bin("jeeves")
        .unwrap()
        .arg("workflow")
        .arg("validate")
        .arg(dir.path().join("workflows/implement.yaml"))
        .assert()
        .success();
}

#[test]
fn workflow_validate_rejects_a_dangling_transition() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.yaml");
    std::fs::write(
        &path,
        r#"workflow:
  name: broken
  version: "1"
  start: only
phases:
  only:
    name: only
    type: execute
    prompt: "go"
    transitions:
      - to: nowhere
        auto: true
"#,
    )
    .unwrap();

    Command::cargo_bin("jeeves")
        .unwrap()
        .arg("workflow")
        .arg("validate")
        .arg(&path)
        .assert()
        .failure();
}

#[test]
fn status_reports_missing_issue() {
    let dir = tempdir().unwrap();
    Command::cargo_bin("jeeves")
        .unwrap()
        .arg("init")
        .arg("--dir")
        .arg(dir.path())
        .assert()
        .success();

    Command::cargo_bin("jeeves")
        .unwrap()
        .arg("--config")
        .arg(dir.path().join("jeeves.toml"))
        .arg("status")
        .arg("acme/widgets#1")
        .assert()
        .failure();
}
