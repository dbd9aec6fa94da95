use std::path::Path;
use std::time::Duration;

use nova_config::ScanMode;
use nova_pom_index::LocalStoreIndex;
use nova_pom_model::{Coordinate, GroupArtifact};

fn install(repo: &Path, group: &str, artifact: &str, version: &str) -> std::path::PathBuf {
    let dir = repo
        .join(group.replace('.', "/"))
        .join(artifact)
        .join(version);
    std::fs::create_dir_all(&dir).expect("mkdir");
    let pom = dir.join(format!("{artifact}-{version}.pom"));
    std::fs::write(&pom, "<project/>").expect("write pom");
    pom
}

#[test]
fn latest_version_wins_by_maven_ordering() {
    let repo = tempfile::tempdir().expect("tempdir");
    for version in ["1.0", "1.2", "0.9", "1.10-SNAPSHOT"] {
        install(repo.path(), "org.example", "lib", version);
    }
    install(repo.path(), "org.example", "other", "3");
    // Not a coordinate: file name does not match the directories.
    let stray = repo.path().join("org/example/lib/2.0");
    std::fs::create_dir_all(&stray).expect("mkdir");
    std::fs::write(stray.join("readme.pom"), "").expect("write");

    let index = LocalStoreIndex::new(vec![repo.path().to_path_buf()], ScanMode::Sync, None);

    assert_eq!(
        index.get_latest_artifacts(),
        vec![
            Coordinate::new("org.example", "lib", "1.10-SNAPSHOT"),
            Coordinate::new("org.example", "other", "3"),
        ]
    );
    assert_eq!(
        index.versions(&GroupArtifact::new("org.example", "lib")),
        vec!["0.9", "1.0", "1.2", "1.10-SNAPSHOT"]
    );
    assert_eq!(index.len(), 5);
}

#[test]
fn three_versions_keep_only_the_highest() {
    let repo = tempfile::tempdir().expect("tempdir");
    for version in ["1.0", "1.2", "0.9"] {
        install(repo.path(), "com.acme", "core", version);
    }
    let index = LocalStoreIndex::new(vec![repo.path().to_path_buf()], ScanMode::Sync, None);
    assert_eq!(
        index.get_latest_artifacts(),
        vec![Coordinate::new("com.acme", "core", "1.2")]
    );
}

#[test]
fn update_from_build_matches_a_full_rescan() {
    let repo = tempfile::tempdir().expect("tempdir");
    install(repo.path(), "com.acme", "core", "1.0");
    let index = LocalStoreIndex::new(vec![repo.path().to_path_buf()], ScanMode::Sync, None);

    let coordinate = Coordinate::new("com.acme", "core", "2.0");
    let pom = install(repo.path(), "com.acme", "core", "2.0");
    index.update_from_build(coordinate.clone(), pom.parent().expect("version dir"));

    let incremental = (index.get_latest_artifacts(), index.find_path(&coordinate), index.len());
    assert_eq!(incremental.0, vec![coordinate.clone()]);
    assert_eq!(incremental.1.as_deref(), Some(pom.as_path()));
    assert_eq!(
        index.coordinate_at(pom.parent().expect("version dir")),
        Some(coordinate.clone())
    );

    index.rescan();
    let rescanned = (index.get_latest_artifacts(), index.find_path(&coordinate), index.len());
    assert_eq!(incremental, rescanned);
}

#[test]
fn async_scan_reports_completion() {
    let repo = tempfile::tempdir().expect("tempdir");
    install(repo.path(), "com.acme", "core", "1.0");
    let index = LocalStoreIndex::new(
        vec![repo.path().to_path_buf()],
        ScanMode::Async,
        Some(Duration::from_secs(3600)),
    );
    assert!(index.wait_for_initial_scan(Duration::from_secs(10)));
    assert_eq!(index.len(), 1);
}

#[test]
fn missing_roots_yield_an_empty_index() {
    let repo = tempfile::tempdir().expect("tempdir");
    let index = LocalStoreIndex::new(
        vec![repo.path().join("does-not-exist")],
        ScanMode::Sync,
        None,
    );
    assert!(index.is_empty());
    assert!(index.wait_for_initial_scan(Duration::ZERO));
}
