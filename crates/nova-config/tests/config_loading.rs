use std::path::PathBuf;

use nova_config::{init_tracing, ConfigError, LoggingConfig, NovaPomConfig, ScanMode};

#[test]
fn loads_every_section_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nova.toml");
    std::fs::write(
        &path,
        r#"
[resolver]
workers = 2
scratch_dir = "/tmp/nova-scratch"
remote_timeout_ms = 250

[local_store]
roots = ["/repo/a", "/repo/b"]
rescan_interval_secs = 60
scan = "async"

[workspace]
skip_dirs = ["target", "build"]

[logging]
level = "debug"
json = true
stderr = false
"#,
    )
    .unwrap();

    let config = NovaPomConfig::load_from_path(&path).unwrap();
    assert_eq!(config.resolver.workers, 2);
    assert_eq!(
        config.resolver.scratch_dir,
        Some(PathBuf::from("/tmp/nova-scratch"))
    );
    assert_eq!(config.resolver.remote_timeout().as_millis(), 250);
    assert_eq!(
        config.local_store.effective_roots(),
        vec![PathBuf::from("/repo/a"), PathBuf::from("/repo/b")]
    );
    assert_eq!(config.local_store.scan, ScanMode::Async);
    assert_eq!(config.workspace.skip_dirs, vec!["target", "build"]);
    assert!(config.logging.json);
    assert!(!config.logging.stderr);
}

#[test]
fn unknown_keys_are_reported_not_rejected() {
    let (config, unknown) = NovaPomConfig::load_from_str_with_diagnostics(
        r#"
[resolver]
workers = 3
wrokers = 4

[mystery]
value = 1
"#,
    )
    .unwrap();

    assert_eq!(config.resolver.workers, 3);
    assert_eq!(unknown, vec!["mystery".to_owned(), "resolver.wrokers".to_owned()]);
}

#[test]
fn parse_errors_omit_the_source_snippet() {
    let err = NovaPomConfig::load_from_str_with_diagnostics("[resolver]\nworkers = [\n")
        .unwrap_err();
    match &err {
        ConfigError::Toml(message) => {
            assert!(!message.is_empty());
            assert!(!message.contains('\n'), "{message}");
            assert!(!message.contains("workers = ["), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = NovaPomConfig::load_from_path(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn init_tracing_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let config = LoggingConfig {
        file: Some(dir.path().join("nova.log")),
        stderr: false,
        ..LoggingConfig::default()
    };
    init_tracing(&config);
    init_tracing(&config);
    tracing::info!(target: "nova.config", "logging initialized");
}
