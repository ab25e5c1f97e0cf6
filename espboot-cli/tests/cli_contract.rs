//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("espboot");
    cmd.env_remove("ESPBOOT_PORT")
        .env_remove("ESPBOOT_BAUD")
        .env_remove("ESPBOOT_BOARD")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("espboot"))
        .stdout(predicate::str::contains("Usage"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("espboot"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn boards_json_is_valid_json_without_extra_output() {
    let dir = tempdir().expect("tempdir should be created");
    let mut cmd = cli_cmd();
    let output = cmd
        .current_dir(dir.path())
        .args(["boards", "--json"])
        .assert()
        .success()
        .get_output()
        .clone();

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    let parsed: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON");
    let boards = parsed
        .as_array()
        .expect("boards --json should return an array");
    assert_eq!(boards[0]["name"], "esp12");
    assert_eq!(boards[0]["flash_mode"], "qio");
    assert_eq!(boards[0]["flash_info"], serde_json::json!([0x00, 0x4F]));
    assert!(output.stderr.is_empty());
}

#[test]
fn boards_lists_profiles() {
    let dir = tempdir().expect("tempdir should be created");
    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("boards")
        .assert()
        .success()
        .stdout(predicate::str::contains("esp12"));
}

// ============================================================================
// Exit Code Tests
// ============================================================================

#[test]
fn exit_code_two_for_unknown_command() {
    let mut cmd = cli_cmd();
    cmd.arg("falsh")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("flash"));
}

#[test]
fn exit_code_two_for_flash_without_regions() {
    let mut cmd = cli_cmd();
    cmd.arg("flash")
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty());
}

#[test]
fn exit_code_two_for_malformed_region() {
    let mut cmd = cli_cmd();
    cmd.args(["flash", "boot.bin"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("address:file"));
}

#[test]
fn exit_code_two_for_bad_address() {
    let mut cmd = cli_cmd();
    cmd.args(["flash", "0xZZ:boot.bin"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("invalid flash address"));
}

#[test]
fn exit_code_two_for_erase_without_size() {
    let mut cmd = cli_cmd();
    cmd.args(["erase", "--address", "0x1000"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_one_for_missing_file() {
    let dir = tempdir().expect("tempdir should be created");
    let missing = dir
        .path()
        .join("missing.bin");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("-p")
        .arg("INVALID_PORT_NAME_XYZ")
        .arg("flash")
        .arg(format!("0x0:{}", missing.display()))
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Failed to read"));
}

#[test]
fn exit_code_two_when_no_port_is_configured() {
    let dir = tempdir().expect("tempdir should be created");
    let image = dir
        .path()
        .join("app.bin");
    fs::write(&image, [0xE9, 0x01, 0x00, 0x00]).expect("write image");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("--config")
        .arg(dir.path().join("none.toml"))
        .arg("flash")
        .arg(format!("0x0:{}", image.display()))
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("No serial port"));
}

#[test]
fn exit_code_one_for_unknown_board() {
    let dir = tempdir().expect("tempdir should be created");
    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["-p", "INVALID_PORT_NAME_XYZ", "--board", "esp32-s9"])
        .args(["erase", "--address", "0", "--size", "4096"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("unknown board"));
}

#[test]
fn exit_code_one_for_unknown_flash_mode() {
    let dir = tempdir().expect("tempdir should be created");
    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["-p", "INVALID_PORT_NAME_XYZ", "--flash-mode", "qpi"])
        .args(["erase", "--address", "0", "--size", "4096"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("unknown flash mode"));
}

#[test]
fn exit_code_one_when_port_cannot_be_opened() {
    let dir = tempdir().expect("tempdir should be created");
    let image = dir
        .path()
        .join("app.bin");
    fs::write(&image, [0u8; 64]).expect("write image");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["-p", "INVALID_PORT_NAME_XYZ", "flash"])
        .arg(format!("0x1000:{}", image.display()))
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Failed to open INVALID_PORT_NAME_XYZ"));
}

// ============================================================================
// Configuration Tests
// ============================================================================

#[test]
fn local_config_supplies_board() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(
        dir.path()
            .join("espboot.toml"),
        "[connection]\nserial = \"INVALID_PORT_NAME_XYZ\"\n[flash]\nboard = \"not-a-board\"\n",
    )
    .expect("write config");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["erase", "--address", "0", "--size", "4096"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("not-a-board"));
}

#[test]
fn cli_flag_overrides_config() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(
        dir.path()
            .join("espboot.toml"),
        "[flash]\nboard = \"not-a-board\"\n",
    )
    .expect("write config");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["-p", "INVALID_PORT_NAME_XYZ", "--board", "esp12"])
        .args(["erase", "--address", "0", "--size", "4096"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not-a-board").not())
        .stderr(predicate::str::contains("Failed to open"));
}

#[test]
fn invalid_config_warns_but_continues() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(
        dir.path()
            .join("espboot.toml"),
        "invalid toml [[[",
    )
    .expect("write invalid config");

    let mut cmd = cli_cmd();
    let output = cmd
        .current_dir(dir.path())
        .arg("boards")
        .output()
        .expect("command should execute");

    assert!(
        output
            .status
            .success(),
        "command should succeed despite config warning"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("TOML"), "should warn about invalid TOML");
}
