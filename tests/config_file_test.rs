// Integration test for configuration file support

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use warden::config::Ecosystem;
use warden::error::WardenError;

fn demo(file: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("demos").join(file)
}

#[test]
fn test_load_demo_toml() {
    let path = demo("ecosystem.toml");
    let ecosystem = Ecosystem::from_file(&path).unwrap();
    let demo_dir = fs::canonicalize(path.parent().unwrap()).unwrap();

    let names: Vec<&str> = ecosystem.specs.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["API Server", "Celery Worker", "Webhook Receiver"]);

    let api = &ecosystem.specs[0];
    assert_eq!(api.interpreter.as_deref(), Some("python3.10"));
    assert!(api.watch);
    assert!(api.autorestart);
    assert_eq!(api.restart_delay, Duration::from_secs(10));
    assert_eq!(api.memory_ceiling, Some(200 * 1024 * 1024));
    assert_eq!(api.cwd, demo_dir);
    assert_eq!(api.ignore_watch, vec!["logs", "__pycache__"]);

    let (program, args) = api.command_line();
    assert_eq!(program, PathBuf::from("python3.10"));
    assert_eq!(args, vec!["./start_api.py"]);

    assert_eq!(ecosystem.specs[1].memory_ceiling, None);
    assert_eq!(ecosystem.settings.shutdown_timeout_secs, 15);
}

#[test]
fn test_toml_and_json_demos_agree() {
    let toml = Ecosystem::from_file(&demo("ecosystem.toml")).unwrap();
    let json = Ecosystem::from_file(&demo("ecosystem.json")).unwrap();

    assert_eq!(toml.specs.len(), json.specs.len());
    for (a, b) in toml.specs.iter().zip(json.specs.iter()) {
        assert_eq!(a.name, b.name);
        assert_eq!(a.command_line(), b.command_line());
        assert_eq!(a.restart_delay, b.restart_delay);
        assert_eq!(a.memory_ceiling, b.memory_ceiling);
        assert_eq!(a.watch, b.watch);
    }
}

#[test]
fn test_load_single_process_with_options() {
    let temp_dir = TempDir::new().unwrap();
    fs::create_dir(temp_dir.path().join("app")).unwrap();
    let config_path = temp_dir.path().join("worker.toml");

    let toml_content = r#"
        name = "worker"
        command = "bin/worker"
        args = "--queue default --verbose"
        cwd = "app"
        autorestart = true
        restart_delay = 0.5
        exp_backoff_restart_delay = 0.1
        max_restarts = 5
        stop_exit_codes = [0, 78]
        max_memory_restart = 536870912
        stop_signal = "SIGINT"
        stop_timeout_secs = 3

        [env]
        QUEUE = "default"
    "#;
    fs::write(&config_path, toml_content).unwrap();

    let ecosystem = Ecosystem::from_file(&config_path).unwrap();
    assert_eq!(ecosystem.specs.len(), 1);

    let spec = &ecosystem.specs[0];
    let app_dir = fs::canonicalize(temp_dir.path()).unwrap().join("app");
    assert_eq!(spec.cwd, app_dir);
    assert_eq!(spec.args, vec!["--queue", "default", "--verbose"]);
    assert_eq!(spec.restart_delay, Duration::from_millis(500));
    assert_eq!(spec.exp_backoff_restart_delay, Some(Duration::from_millis(100)));
    assert_eq!(spec.max_restarts, Some(5));
    assert_eq!(spec.stop_exit_codes, vec![0, 78]);
    assert_eq!(spec.memory_ceiling, Some(536_870_912));
    assert_eq!(spec.stop_signal, "SIGINT");
    assert_eq!(spec.stop_timeout, Duration::from_secs(3));
    assert_eq!(spec.env.get("QUEUE").map(String::as_str), Some("default"));

    // Script paths with a directory part run relative to cwd
    let (program, _) = spec.command_line();
    assert_eq!(program, app_dir.join("bin/worker"));
}

#[test]
fn test_load_json_processes_with_supervisor_settings() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("ecosystem.json");

    let json_content = r#"{
        "supervisor": { "memory_sample_interval_ms": 250, "watch_poll_interval_ms": 100 },
        "processes": [
            { "name": "web", "script": "server.js", "interpreter": "node", "interpreter_args": ["--inspect"] },
            { "name": "cron", "script": "/usr/bin/env", "interpreter": "none", "autorestart": false }
        ]
    }"#;
    fs::write(&config_path, json_content).unwrap();

    let ecosystem = Ecosystem::from_file(&config_path).unwrap();
    assert_eq!(ecosystem.settings.memory_sample_interval(), Duration::from_millis(250));
    assert_eq!(ecosystem.settings.watch_poll_interval(), Duration::from_millis(100));
    assert_eq!(ecosystem.settings.shutdown_timeout(), Duration::from_secs(15));

    let (program, args) = ecosystem.specs[0].command_line();
    assert_eq!(program, PathBuf::from("node"));
    assert_eq!(args, vec!["--inspect", "server.js"]);

    let cron = &ecosystem.specs[1];
    assert_eq!(cron.interpreter, None);
    assert!(!cron.autorestart);
}

#[test]
fn test_duplicate_names_fail_the_whole_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("dupes.toml");

    fs::write(
        &config_path,
        r#"
        [[apps]]
        name = "api"
        script = "/bin/true"

        [[apps]]
        name = "api"
        script = "/bin/false"
        "#,
    )
    .unwrap();

    let err = Ecosystem::from_file(&config_path).unwrap_err();
    assert!(matches!(err, WardenError::DuplicateName(ref name) if name == "api"));
    assert!(err.is_fatal_config());
}

#[test]
fn test_missing_script_fails_the_whole_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("missing.json");

    fs::write(
        &config_path,
        r#"{ "apps": [ { "name": "ok", "script": "/bin/true" }, { "name": "broken" } ] }"#,
    )
    .unwrap();

    let err = Ecosystem::from_file(&config_path).unwrap_err();
    assert!(matches!(err, WardenError::MissingConfigField(_)));
    assert!(err.is_fatal_config());
}

#[test]
fn test_invalid_memory_limit_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("memory.toml");

    fs::write(
        &config_path,
        r#"
        name = "api"
        script = "/bin/true"
        max_memory_restart = "lots"
        "#,
    )
    .unwrap();

    assert!(matches!(
        Ecosystem::from_file(&config_path),
        Err(WardenError::InvalidMemoryLimit(_))
    ));
}

#[test]
fn test_malformed_and_missing_files() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("broken.toml");
    fs::write(&config_path, "name = ").unwrap();

    assert!(matches!(
        Ecosystem::from_file(&config_path),
        Err(WardenError::InvalidConfig(_))
    ));
    assert!(matches!(
        Ecosystem::from_file(&temp_dir.path().join("absent.toml")),
        Err(WardenError::ConfigError(_))
    ));
}
