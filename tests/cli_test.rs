use std::fs;
use std::process::Command;
use tempfile::TempDir;

fn stacksync(settings: &std::path::Path) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_stacksync"));
    command
        .arg("--config")
        .arg(settings)
        .env("RUST_LOG", "off")
        .env_remove("STACKSYNC_CONFIG");
    command
}

fn write_config(root: &std::path::Path) -> std::path::PathBuf {
    fs::write(
        root.join("handlers.toml"),
        r#"
[handlers.Thredds]
active = true
priority = 20

[handlers.Nginx]
active = true
priority = 10

[handlers.Geoserver]
active = false

[handlers.Weaver]
active = true
"#,
    )
    .unwrap();

    let settings = root.join("settings.toml");
    fs::write(
        &settings,
        format!(
            "handlers_config = \"{}\"\n\n[monitoring]\nstore_path = \"{}\"\n",
            root.join("handlers.toml").display(),
            root.join("monitors.json").display()
        ),
    )
    .unwrap();
    settings
}

#[test]
fn test_handlers_command_lists_dispatch_order() {
    let temp_dir = TempDir::new().unwrap();
    let settings = write_config(temp_dir.path());

    let output = stacksync(&settings)
        .arg("handlers")
        .output()
        .expect("Failed to run handlers command");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let nginx = stdout.find("Nginx").unwrap();
    let thredds = stdout.find("Thredds").unwrap();
    assert!(nginx < thredds, "{stdout}");
    assert!(stdout.contains("Geoserver (inactive)"), "{stdout}");
    assert!(stdout.contains("Weaver (unrecognized)"), "{stdout}");
}

#[test]
fn test_monitors_command_on_empty_store() {
    let temp_dir = TempDir::new().unwrap();
    let settings = write_config(temp_dir.path());

    let output = stacksync(&settings)
        .arg("monitors")
        .output()
        .expect("Failed to run monitors command");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("No persisted watches"));
}

#[test]
fn test_user_command_dispatches_to_active_handlers() {
    let temp_dir = TempDir::new().unwrap();
    let settings = write_config(temp_dir.path());

    let output = stacksync(&settings)
        .args(["user", "created", "alice"])
        .output()
        .expect("Failed to run user command");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("alice created: 2 handlers"));
}

#[test]
fn test_permission_rejects_user_and_group() {
    let temp_dir = TempDir::new().unwrap();
    let settings = write_config(temp_dir.path());

    let output = stacksync(&settings)
        .args([
            "permission", "created", "--service", "thredds", "--resource", "/data", "--name",
            "read", "--user", "alice", "--group", "staff",
        ])
        .output()
        .expect("Failed to run permission command");
    assert!(!output.status.success());
}
