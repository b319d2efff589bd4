//! 以子进程方式运行 mlc-cli，使用模拟设备

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn cli() -> Command {
    Command::cargo_bin("mlc-cli").unwrap()
}

#[test]
fn state_lists_every_leaf() {
    cli()
        .args(["--simulate", "--pairs", "2", "state"])
        .assert()
        .success()
        .stdout(predicate::str::contains("layer1"))
        .stdout(predicate::str::contains("layer2"))
        .stdout(predicate::str::contains("#8"));
}

#[test]
fn move_reports_completion() {
    cli()
        .args([
            "move", "--simulate", "--single-layer", "--pairs", "2", "--address", "3",
            "--distance", "4",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("✅"));
}

#[test]
fn shape_reads_calibration_from_config() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[collimator]
number_of_pairs = 2
layers = "one"

[[collimator.leaves]]
pair = 0
layer = "layer1"
side = "side1"
address = 1
calibration_steps = 9000

[[collimator.leaves]]
pair = 0
layer = "layer1"
side = "side2"
address = 2
calibration_steps = 9000

[[collimator.leaves]]
pair = 1
layer = "layer1"
side = "side1"
address = 3
calibration_steps = 9000

[[collimator.leaves]]
pair = 1
layer = "layer1"
side = "side2"
address = 4
calibration_steps = 9000
"#
    )
    .unwrap();

    cli()
        .arg("--simulate")
        .arg("--config")
        .arg(file.path())
        .args(["shape", "close"])
        .assert()
        .success()
        .stdout(predicate::str::contains("close"));
}

#[test]
fn unknown_shape_is_rejected() {
    cli()
        .args(["--simulate", "shape", "triangle"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown shape"));
}

#[test]
fn missing_port_fails_cleanly() {
    cli()
        .args(["--single-layer", "state"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no serial port configured"));
}
