//! Integration tests for the vessel CLI

use std::path::Path;
use std::process::{Command, Output};

fn vessel(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_vessel"))
        .args(args)
        .env("HOME", root)
        .env("XDG_CONFIG_HOME", root.join("config"))
        .env("VESSEL_DATA_DIR", root.join("data"))
        .env("VESSEL_RECIPES_DIR", root.join("recipes"))
        .env_remove("RUST_LOG")
        .env_remove("VESSEL_UPLOAD_URL")
        .output()
        .expect("Failed to execute vessel")
}

fn recipe(root: &Path, name: &str, body: &str) {
    let dir = root.join("recipes");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(format!("{name}.star")), body).unwrap();
}

#[test]
fn test_cli_version() {
    let temp = tempfile::tempdir().unwrap();
    let output = vessel(temp.path(), &["--version"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("vessel"));
}

#[test]
fn test_cli_help_lists_commands() {
    let temp = tempfile::tempdir().unwrap();
    let output = vessel(temp.path(), &["--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["install", "build", "calc", "pack", "install-car", "gc", "sum", "keygen"] {
        assert!(stdout.contains(command), "missing {command}");
    }
}

#[test]
fn test_cli_invalid_command() {
    let temp = tempfile::tempdir().unwrap();
    let output = vessel(temp.path(), &["invalid-command"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unrecognized subcommand"));
}

#[test]
fn test_install_no_recipes() {
    let temp = tempfile::tempdir().unwrap();
    let output = vessel(temp.path(), &["install"]);
    assert!(!output.status.success());
}

#[test]
fn test_build_then_calc_json() {
    let temp = tempfile::tempdir().unwrap();
    recipe(
        temp.path(),
        "hello",
        r#"pkg(name = "hello", version = "1", install = lambda ctx: ctx.write_file("share/hello", "hi"))"#,
    );

    let built = vessel(temp.path(), &["build", "hello"]);
    assert!(built.status.success(), "{}", String::from_utf8_lossy(&built.stderr));
    let stdout = String::from_utf8_lossy(&built.stdout);
    let id = stdout.lines().last().unwrap().trim().to_string();
    assert!(id.ends_with("-hello-1"));

    let calc = vessel(temp.path(), &["--json", "calc", "hello"]);
    assert!(calc.status.success());
    let json: serde_json::Value = serde_json::from_slice(&calc.stdout).unwrap();
    assert_eq!(json["type"], "Calc");
    assert_eq!(json["data"]["id"], id.as_str());
    assert_eq!(json["data"]["install_order"].as_array().unwrap().len(), 0);
}

#[test]
fn test_failed_install_exits_nonzero_with_failed_line() {
    let temp = tempfile::tempdir().unwrap();
    recipe(
        temp.path(),
        "broken",
        r#"pkg(name = "broken", version = "1", install = lambda ctx: ctx.system("false"))"#,
    );

    let output = vessel(temp.path(), &["install", "broken"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.lines().any(|l| l.contains("failed: ") && l.contains("-broken-1: ")));
}

#[test]
fn test_shell_print_env() {
    let temp = tempfile::tempdir().unwrap();
    recipe(
        temp.path(),
        "hello",
        r#"pkg(name = "hello", version = "1", install = lambda ctx: ctx.write_file("bin/hello", "hi"))"#,
    );

    let output = vessel(temp.path(), &["shell", "hello", "--print-env"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let path = stdout.trim().strip_prefix("PATH=").unwrap();
    let first = path.split(':').next().unwrap();
    assert!(first.starts_with(&temp.path().join("data/store").display().to_string()));
    assert!(first.ends_with("-hello-1/bin"));
}

#[test]
fn test_shell_runs_command_with_path() {
    let temp = tempfile::tempdir().unwrap();
    recipe(
        temp.path(),
        "hello",
        r#"pkg(name = "hello", version = "1", install = lambda ctx: ctx.write_file("bin/hello", "hi"))"#,
    );

    let output = vessel(
        temp.path(),
        &["shell", "hello", "--", "/bin/sh", "-c", "echo \"$PATH\""],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.trim().split(':').next().unwrap().ends_with("-hello-1/bin"));
}

#[test]
fn test_upload_without_remote_fails() {
    let temp = tempfile::tempdir().unwrap();
    recipe(
        temp.path(),
        "hello",
        r#"pkg(name = "hello", version = "1", install = lambda ctx: ctx.write_file("bin/hello", "hi"))"#,
    );
    let output = vessel(temp.path(), &["upload", "hello"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("upload url"));
}
