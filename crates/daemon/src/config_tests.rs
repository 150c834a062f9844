// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::*;

#[test]
fn empty_file_uses_defaults() {
    let config = Config::parse("").unwrap();

    assert_eq!(config, Config::default());
    assert!(config.runner.enabled);
    assert_eq!(config.runner.daemon.max_jobs, 5);
    assert_eq!(config.manager.ping_timeout, Duration::from_secs(30));
}

#[test]
fn durations_are_humantime() {
    let config = Config::parse(
        r#"
[manager]
interval = "2s"
ping_timeout = "45s"
unknown_timeout = "10m"
purge_after = "2h"

[allocator]
initial = "500ms"
max = "1m"
"#,
    )
    .unwrap();

    assert_eq!(
        config.manager,
        ManagerConfig::default()
            .with_interval(Duration::from_secs(2))
            .with_ping_timeout(Duration::from_secs(45))
            .with_unknown_timeout(Duration::from_secs(600))
            .with_purge_after(Duration::from_secs(7200))
    );
    assert_eq!(config.allocator.backoff.initial, Duration::from_millis(500));
    assert_eq!(config.allocator.backoff.max, Duration::from_secs(60));
    assert_eq!(config.allocator.backoff.factor, 2);
}

#[test]
fn runner_section_carries_operation_settings() {
    let config = Config::parse(
        r#"
[runner]
enabled = false
name = "builder"
max_jobs = 2
heartbeat_interval = "3s"
sandbox = true
debug = true
plugin_cache = true
engine_dir = "/opt/engines"
engine_binary = "terraform"
"#,
    )
    .unwrap();

    let runner = &config.runner;
    assert!(!runner.enabled);
    assert_eq!(runner.engine_dir, Some(PathBuf::from("/opt/engines")));
    assert_eq!(runner.engine_binary.as_deref(), Some("terraform"));
    assert_eq!(runner.daemon.name.as_deref(), Some("builder"));
    assert_eq!(runner.daemon.max_jobs, 2);
    assert_eq!(runner.daemon.heartbeat_interval, Duration::from_secs(3));
    assert!(runner.daemon.operation.sandbox);
    assert!(runner.daemon.operation.debug);
    assert!(runner.daemon.operation.plugin_cache);
}

#[test]
fn paths_derive_from_state_dir() {
    let config = Config::default().with_state_dir("/var/lib/ork");

    let paths = config.paths().unwrap();

    assert_eq!(paths.socket_path, PathBuf::from("/var/lib/ork/orkd.sock"));
    assert_eq!(paths.lock_path, PathBuf::from("/var/lib/ork/orkd.pid"));
    assert_eq!(paths.log_path, PathBuf::from("/var/lib/ork/orkd.log"));
    assert_eq!(paths.wal_path, PathBuf::from("/var/lib/ork/wal/ork.wal"));
    assert_eq!(paths.remote_root, PathBuf::from("/var/lib/ork/remote"));
    assert_eq!(paths.engine_dir, PathBuf::from("/var/lib/ork/engines"));
}

#[test]
fn explicit_locations_override_state_dir() {
    let config = Config::parse(
        r#"
[daemon]
state_dir = "/state"
socket_path = "/run/orkd.sock"

[remote]
root = "/srv/remote"
"#,
    )
    .unwrap();

    let paths = config.paths().unwrap();

    assert_eq!(paths.socket_path, PathBuf::from("/run/orkd.sock"));
    assert_eq!(paths.remote_root, PathBuf::from("/srv/remote"));
    assert_eq!(paths.lock_path, PathBuf::from("/state/orkd.pid"));
}

#[test]
fn load_without_path_is_default() {
    assert_eq!(Config::load(None).unwrap(), Config::default());
}

#[test]
fn load_reads_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("orkd.toml");
    std::fs::write(&path, "[tokens]\nsecret = \"s3cret\"\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();

    assert_eq!(config.tokens.secret.as_deref(), Some("s3cret"));
}

#[test]
fn load_reports_missing_file() {
    let err = Config::load(Some(Path::new("/nonexistent/orkd.toml"))).unwrap_err();

    assert!(matches!(err, ConfigError::Read { .. }));
    assert!(err.to_string().contains("/nonexistent/orkd.toml"));
}

#[test]
fn load_reports_invalid_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("orkd.toml");
    std::fs::write(&path, "[manager]\nping_timeout = \"soon\"\n").unwrap();

    let err = Config::load(Some(&path)).unwrap_err();

    assert!(matches!(err, ConfigError::Parse { .. }));
}
