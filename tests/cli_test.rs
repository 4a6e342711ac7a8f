//! CLI Command Tests
//!
//! Runs the built binary against throwaway configs. External tools are
//! pointed at paths that do not exist, so nothing touches the network.

use std::process::{Command, Output};

use tempfile::TempDir;

fn castkeeper(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_castkeeper"))
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("binary runs")
}

/// Content root plus a config file pointing at it
fn workspace(extra: &str) -> (TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("site");
    std::fs::create_dir(&root).unwrap();
    std::fs::write(root.join("index.html"), "<html>clock</html>").unwrap();

    let config = format!(
        "device_name = \"Nest Hub\"\n\
         content_root = \"{}\"\n\
         scan_timeout_secs = 2\n\
         catt_path = \"/nonexistent/catt\"\n\
         nmap_path = \"/nonexistent/nmap\"\n\
         docker_path = \"/nonexistent/docker\"\n\
         {}\n",
        root.display(),
        extra
    );
    let path = dir.path().join("config.toml");
    std::fs::write(&path, config).unwrap();
    let path = path.display().to_string();
    (dir, path)
}

fn stderr_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stderr).expect("stderr is JSON")
}

// =============================================================================
// Help and parsing
// =============================================================================

mod parsing {
    use super::*;

    #[test]
    fn test_help_exits_zero() {
        let output = castkeeper(&["--help"]);
        assert!(output.status.success());
        let text = String::from_utf8_lossy(&output.stdout);
        assert!(text.contains("locate"));
        assert!(text.contains("check"));
    }

    #[test]
    fn test_unknown_subcommand_fails() {
        let output = castkeeper(&["reboot"]);
        assert!(!output.status.success());
    }
}

// =============================================================================
// Configuration errors (exit 2)
// =============================================================================

mod config_errors {
    use super::*;

    #[test]
    fn test_missing_config_file() {
        let output = castkeeper(&["--json", "--config", "/nonexistent/config.toml", "check"]);
        assert_eq!(output.status.code(), Some(2));

        let json = stderr_json(&output);
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], 2);
        assert!(json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("not found"));
    }

    #[test]
    fn test_malformed_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "port = \"five thousand\"").unwrap();

        let output = castkeeper(&["--json", "--config", path.to_str().unwrap(), "check"]);
        assert_eq!(output.status.code(), Some(2));
    }

    #[test]
    fn test_missing_entry_document() {
        let (_dir, config) = workspace("entry_document = \"clock.html\"");
        let output = castkeeper(&["--json", "--config", &config, "check"]);
        assert_eq!(output.status.code(), Some(2));
        assert!(stderr_json(&output)["error"]["message"]
            .as_str()
            .unwrap()
            .contains("clock.html"));
    }

    #[test]
    fn test_empty_device_override() {
        let (_dir, config) = workspace("");
        let output = castkeeper(&["--json", "--config", &config, "--device", " ", "check"]);
        assert_eq!(output.status.code(), Some(2));
    }

    #[test]
    fn test_daemon_refuses_bad_content_root() {
        let (dir, config) = workspace("");
        let missing = dir.path().join("gone");
        let output = castkeeper(&[
            "--json",
            "--config",
            &config,
            "--content-root",
            missing.to_str().unwrap(),
        ]);
        assert_eq!(output.status.code(), Some(2));
    }
}

// =============================================================================
// Resource and discovery errors
// =============================================================================

mod runtime_errors {
    use super::*;

    #[test]
    fn test_check_without_backend_is_resource_error() {
        let (_dir, config) = workspace("");
        let output = castkeeper(&["--json", "--config", &config, "check"]);
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(stderr_json(&output)["error"]["code"], 3);
    }

    #[test]
    fn test_daemon_without_backend_exits_before_looping() {
        let (_dir, config) = workspace("");
        let output = castkeeper(&["--config", &config, "run"]);
        assert_eq!(output.status.code(), Some(3));
    }

    #[test]
    fn test_locate_without_tools_is_not_found() {
        let (_dir, config) = workspace("");
        let output = castkeeper(&["--json", "--config", &config, "locate"]);
        assert_eq!(output.status.code(), Some(4));

        let json = stderr_json(&output);
        assert_eq!(json["success"], false);
        assert!(json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("Nest Hub"));
    }
}
