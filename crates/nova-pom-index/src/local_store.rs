use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nova_config::{LocalStoreConfig, ScanMode};
use nova_core::normalize_path;
use nova_pom_model::{Coordinate, GroupArtifact, MavenVersion, POM_EXTENSION};
use parking_lot::{Condvar, Mutex, RwLock};
use rayon::prelude::*;
use walkdir::WalkDir;

/// Index of artifacts installed in local package stores (`~/.m2/repository`).
///
/// A coordinate is recognized when a `group/path/artifact/version` directory
/// holds `<artifact>-<version>.pom`. Lookups read a snapshot table under a
/// read lock; rescans build a fresh table off-lock and swap it in.
pub struct LocalStoreIndex {
    inner: Arc<Inner>,
}

struct Inner {
    roots: Vec<PathBuf>,
    tables: RwLock<Tables>,
    scan: Mutex<ScanState>,
    scan_done: Condvar,
    stop: Mutex<bool>,
    stop_signal: Condvar,
}

#[derive(Default)]
struct ScanState {
    scanning: bool,
    completed_scans: u64,
    /// Builds reported while a rescan was running; replayed after the swap.
    updates_during_scan: Vec<(Coordinate, PathBuf)>,
}

#[derive(Default)]
struct Tables {
    /// Version directory -> coordinate.
    by_dir: HashMap<PathBuf, Coordinate>,
    /// Coordinate -> installed POM file.
    by_coordinate: HashMap<Coordinate, PathBuf>,
    versions: HashMap<GroupArtifact, Vec<String>>,
    latest: HashMap<GroupArtifact, Coordinate>,
}

impl Tables {
    fn insert(&mut self, coordinate: Coordinate, pom: PathBuf) {
        if let Some(dir) = pom.parent() {
            self.by_dir.insert(dir.to_path_buf(), coordinate.clone());
        }
        let group_artifact = coordinate.group_artifact();
        let versions = self.versions.entry(group_artifact.clone()).or_default();
        if !versions.contains(&coordinate.version) {
            versions.push(coordinate.version.clone());
        }

        let candidate = MavenVersion::parse(&coordinate.version);
        let newer = self
            .latest
            .get(&group_artifact)
            .is_none_or(|current| candidate > MavenVersion::parse(&current.version));
        if newer {
            self.latest.insert(group_artifact, coordinate.clone());
        }
        self.by_coordinate.insert(coordinate, pom);
    }
}

impl LocalStoreIndex {
    /// Creates the index and performs the initial scan according to `mode`.
    /// With a `rescan_interval`, a background thread rescans periodically
    /// until the index is dropped.
    pub fn new(roots: Vec<PathBuf>, mode: ScanMode, rescan_interval: Option<Duration>) -> Self {
        let inner = Arc::new(Inner {
            roots: roots.iter().map(|root| normalize_path(root)).collect(),
            tables: RwLock::new(Tables::default()),
            scan: Mutex::new(ScanState::default()),
            scan_done: Condvar::new(),
            stop: Mutex::new(false),
            stop_signal: Condvar::new(),
        });

        match mode {
            ScanMode::Sync => inner.rescan(),
            ScanMode::Async => {
                let scanner = Arc::clone(&inner);
                let spawned = std::thread::Builder::new()
                    .name("nova-local-store-scan".to_owned())
                    .spawn(move || scanner.rescan());
                if let Err(err) = spawned {
                    tracing::warn!(
                        target: "nova.pom.local_store",
                        error = %err,
                        "failed to spawn initial scan thread; scanning synchronously"
                    );
                    inner.rescan();
                }
            }
        }

        if let Some(interval) = rescan_interval {
            let weak = Arc::downgrade(&inner);
            let spawned = std::thread::Builder::new()
                .name("nova-local-store-rescan".to_owned())
                .spawn(move || rescan_loop(weak, interval));
            if let Err(err) = spawned {
                tracing::warn!(
                    target: "nova.pom.local_store",
                    error = %err,
                    "failed to spawn periodic rescan thread"
                );
            }
        }

        Self { inner }
    }

    pub fn from_config(config: &LocalStoreConfig) -> Self {
        Self::new(
            config.effective_roots(),
            config.scan,
            config.rescan_interval(),
        )
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.inner.roots
    }

    /// The highest version of every known group/artifact.
    pub fn get_latest_artifacts(&self) -> Vec<Coordinate> {
        let mut latest: Vec<Coordinate> = self.inner.tables.read().latest.values().cloned().collect();
        latest.sort();
        latest
    }

    /// Installed POM file of `coordinate`.
    pub fn find_path(&self, coordinate: &Coordinate) -> Option<PathBuf> {
        self.inner.tables.read().by_coordinate.get(coordinate).cloned()
    }

    /// Coordinate installed in `dir`, a version directory of the store.
    pub fn coordinate_at(&self, dir: &Path) -> Option<Coordinate> {
        self.inner
            .tables
            .read()
            .by_dir
            .get(&normalize_path(dir))
            .cloned()
    }

    /// Known versions of `group_artifact`, lowest first.
    pub fn versions(&self, group_artifact: &GroupArtifact) -> Vec<String> {
        let mut versions = self
            .inner
            .tables
            .read()
            .versions
            .get(group_artifact)
            .cloned()
            .unwrap_or_default();
        versions.sort_by_cached_key(|version| MavenVersion::parse(version));
        versions
    }

    pub fn len(&self) -> usize {
        self.inner.tables.read().by_coordinate.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records an artifact a build just installed, without rescanning.
    ///
    /// `pom` is the installed POM file (or its version directory).
    pub fn update_from_build(&self, coordinate: Coordinate, pom: &Path) {
        let pom = normalize_path(pom);
        let pom = if pom.extension().is_some_and(|ext| ext == POM_EXTENSION) {
            pom
        } else {
            pom.join(format!(
                "{}-{}.{POM_EXTENSION}",
                coordinate.artifact_id, coordinate.version
            ))
        };

        tracing::debug!(
            target: "nova.pom.local_store",
            coordinate = %coordinate,
            path = %pom.display(),
            "recorded installed artifact"
        );
        // Lock order: scan state, then tables.
        let mut scan = self.inner.scan.lock();
        if scan.scanning {
            scan.updates_during_scan
                .push((coordinate.clone(), pom.clone()));
        }
        self.inner.tables.write().insert(coordinate, pom);
    }

    /// Rescans every root and replaces the tables.
    pub fn rescan(&self) {
        self.inner.rescan();
    }

    /// Blocks until at least one full scan finished, or `timeout` passes.
    pub fn wait_for_initial_scan(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut scan = self.inner.scan.lock();
        while scan.completed_scans == 0 {
            if self
                .inner
                .scan_done
                .wait_until(&mut scan, deadline)
                .timed_out()
            {
                return scan.completed_scans > 0;
            }
        }
        true
    }
}

impl Drop for LocalStoreIndex {
    fn drop(&mut self) {
        *self.inner.stop.lock() = true;
        self.inner.stop_signal.notify_all();
    }
}

impl Inner {
    fn rescan(&self) {
        {
            let mut scan = self.scan.lock();
            if scan.scanning {
                // A scan is already running; it will pick up the same state.
                return;
            }
            scan.scanning = true;
            scan.updates_during_scan.clear();
        }

        let started = Instant::now();
        let mut tables = Tables::default();
        for root in &self.roots {
            for (coordinate, pom) in scan_root(root) {
                tables.insert(coordinate, pom);
            }
        }

        let mut scan = self.scan.lock();
        for (coordinate, pom) in scan.updates_during_scan.drain(..) {
            tables.insert(coordinate, pom);
        }
        let count = tables.by_coordinate.len();
        *self.tables.write() = tables;
        scan.scanning = false;
        scan.completed_scans += 1;
        drop(scan);
        self.scan_done.notify_all();

        tracing::debug!(
            target: "nova.pom.local_store",
            roots = self.roots.len(),
            artifacts = count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "local store scan complete"
        );
    }
}

fn rescan_loop(inner: std::sync::Weak<Inner>, interval: Duration) {
    loop {
        let Some(strong) = inner.upgrade() else {
            return;
        };
        {
            let mut stop = strong.stop.lock();
            if !*stop {
                strong.stop_signal.wait_for(&mut stop, interval);
            }
            if *stop {
                return;
            }
        }
        strong.rescan();
    }
}

/// Scans one store root. Top-level group directories are walked in parallel.
fn scan_root(root: &Path) -> Vec<(Coordinate, PathBuf)> {
    let Ok(entries) = std::fs::read_dir(root) else {
        tracing::debug!(
            target: "nova.pom.local_store",
            root = %root.display(),
            "local store root is not readable"
        );
        return Vec::new();
    };
    let top_level: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|ty| ty.is_dir()))
        .filter(|entry| !is_hidden(&entry.path()))
        .map(|entry| entry.path())
        .collect();

    top_level
        .par_iter()
        .flat_map_iter(|dir| {
            WalkDir::new(dir)
                .into_iter()
                .filter_entry(|entry| !is_hidden(entry.path()))
                .filter_map(Result::ok)
                .filter(|entry| entry.file_type().is_file())
                .filter_map(|entry| installed_coordinate(root, entry.path()))
                .collect::<Vec<_>>()
        })
        .collect()
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

/// Recognizes `root/<group path>/<artifact>/<version>/<artifact>-<version>.pom`.
fn installed_coordinate(root: &Path, file: &Path) -> Option<(Coordinate, PathBuf)> {
    if file.extension()? != POM_EXTENSION {
        return None;
    }
    let version_dir = file.parent()?;
    let artifact_dir = version_dir.parent()?;
    let version = version_dir.file_name()?.to_str()?;
    let artifact = artifact_dir.file_name()?.to_str()?;
    let expected = format!("{artifact}-{version}.{POM_EXTENSION}");
    if file.file_name()?.to_str()? != expected {
        return None;
    }

    let group_dir = artifact_dir.parent()?.strip_prefix(root).ok()?;
    let segments: Vec<&str> = group_dir
        .components()
        .map(|component| component.as_os_str().to_str())
        .collect::<Option<_>>()?;
    if segments.is_empty() {
        return None;
    }

    Some((
        Coordinate::new(segments.join("."), artifact, version),
        file.to_path_buf(),
    ))
}
