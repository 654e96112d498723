use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

/// Test context that sets up a temporary working environment
struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        Self { temp_dir }
    }

    fn loopfetch_cmd(&self) -> Command {
        let bin_path = env!("CARGO_BIN_EXE_loopfetch");
        let mut cmd = Command::new(bin_path);
        cmd.env("HOME", self.temp_dir.path());
        cmd.env("LOOPFETCH_HOME", self.temp_dir.path().join(".loopfetch"));
        cmd
    }

    fn destination(&self) -> PathBuf {
        self.temp_dir.path().join("dest")
    }
}

#[test]
fn test_help_command() {
    let ctx = TestContext::new();
    let output = ctx
        .loopfetch_cmd()
        .arg("--help")
        .output()
        .expect("failed to run loopfetch");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"));
}

#[test]
fn test_version_command() {
    let ctx = TestContext::new();
    let output = ctx
        .loopfetch_cmd()
        .arg("--version")
        .output()
        .expect("failed to run loopfetch");
    assert!(output.status.success());
}

#[test]
fn test_download_without_selection_is_a_config_error() {
    let ctx = TestContext::new();
    let output = ctx
        .loopfetch_cmd()
        .args(["download", "--apps", "garageband"])
        .arg("--destination")
        .arg(ctx.destination())
        .output()
        .expect("failed to run loopfetch");
    assert_eq!(output.status.code(), Some(60));
}

#[test]
fn test_apfs_without_build_image_is_a_config_error() {
    let ctx = TestContext::new();
    let output = ctx
        .loopfetch_cmd()
        .args(["download", "--apps", "garageband", "-m", "--apfs"])
        .output()
        .expect("failed to run loopfetch");
    assert_eq!(output.status.code(), Some(59));
}

#[test]
fn test_cache_server_requires_port_before_any_network() {
    let ctx = TestContext::new();
    let output = ctx
        .loopfetch_cmd()
        .args([
            "download",
            "--apps",
            "garageband",
            "-m",
            "--cache-server",
            "http://cache.invalid",
        ])
        .output()
        .expect("failed to run loopfetch");
    assert_eq!(output.status.code(), Some(58));
}

#[test]
fn test_cache_server_rejects_https() {
    let ctx = TestContext::new();
    let output = ctx
        .loopfetch_cmd()
        .args([
            "download",
            "--apps",
            "garageband",
            "-m",
            "--cache-server",
            "https://cache.invalid:45678",
        ])
        .output()
        .expect("failed to run loopfetch");
    assert_eq!(output.status.code(), Some(57));
}

#[test]
fn test_missing_local_image_source() {
    let ctx = TestContext::new();
    let output = ctx
        .loopfetch_cmd()
        .args([
            "download",
            "--apps",
            "garageband",
            "-m",
            "--pkg-server",
            "/nonexistent/loops.dmg",
        ])
        .output()
        .expect("failed to run loopfetch");
    assert_eq!(output.status.code(), Some(54));
}

#[test]
fn test_compare_rejects_different_families() {
    let ctx = TestContext::new();
    let output = ctx
        .loopfetch_cmd()
        .args(["compare", "garageband1021.plist", "logicpro1070.plist"])
        .output()
        .expect("failed to run loopfetch");
    assert_eq!(output.status.code(), Some(52));
}

#[test]
fn test_compare_style_requires_compare() {
    let ctx = TestContext::new();
    let output = ctx
        .loopfetch_cmd()
        .args([
            "download",
            "--apps",
            "garageband",
            "-m",
            "--compare-style",
            "unified",
        ])
        .output()
        .expect("failed to run loopfetch");
    assert_eq!(output.status.code(), Some(51));
}
