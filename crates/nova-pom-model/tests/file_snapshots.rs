use std::path::Path;

use nova_pom_model::{EditVersion, SnapshotId, SourceKey};

fn snapshot_of(path: &Path) -> SnapshotId {
    let metadata = std::fs::metadata(path).unwrap();
    SnapshotId::for_file(path, metadata.len(), metadata.modified().ok())
}

#[test]
fn file_snapshots_follow_on_disk_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pom.xml");
    std::fs::write(&path, "<project/>").unwrap();

    let first = snapshot_of(&path);
    assert_eq!(first, snapshot_of(&path));
    assert_eq!(first.version(), EditVersion::ON_DISK);

    std::fs::write(&path, "<project><artifactId>a</artifactId></project>").unwrap();
    assert_ne!(first, snapshot_of(&path));
}

#[test]
fn file_and_buffer_snapshots_never_collide() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pom.xml");
    std::fs::write(&path, "").unwrap();

    let file = SnapshotId::for_file(&path, 0, None);
    let buffer = SnapshotId::for_text(EditVersion::ON_DISK, b"");
    assert_ne!(file, buffer);
    assert_eq!(file.digest_hex().len(), 64);
}

#[test]
fn equivalent_paths_share_a_key() {
    let dir = tempfile::tempdir().unwrap();
    let direct = SourceKey::from_path(dir.path().join("app/pom.xml"));
    let dotted = SourceKey::from_path(dir.path().join("app/../app/./pom.xml"));
    assert_eq!(direct, dotted);
    assert!(direct.is_under(dir.path()));
    assert!(!direct.is_under(&dir.path().join("ap")));
}
