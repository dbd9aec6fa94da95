use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use nova_core::{key_is_under, normalize_path, path_key};
use nova_pom_model::{Coordinate, GroupArtifact, LineageEntry, MavenVersion};
use nova_scheduler::{Cancelled, PriorityQueue, RequestContext};
use parking_lot::{Condvar, Mutex, RwLock};

use crate::discover::discover_pom_files;
use crate::pom::scan_pom_lenient;

/// How long a blocking lookup sleeps between cancellation checks.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Source of best-effort project snapshots for discovered files.
///
/// Implemented by the resolver; held weakly so the index never keeps it alive.
pub trait DiscoverySnapshots: Send + Sync {
    /// The inheritance chain of `pom`: the project itself first, then its
    /// ancestors. `ctx` is marked as running inside a build.
    fn lineage(&self, pom: &Path, ctx: &RequestContext) -> Option<Vec<LineageEntry>>;
}

/// Maps coordinates of in-workspace POMs to their source files.
///
/// Added roots are walked by a single background worker. Every discovered
/// `pom.xml` becomes a task; tasks run deepest path first so child modules
/// are attempted before their ancestors.
pub struct WorkspaceIndex {
    inner: Arc<Inner>,
}

struct Inner {
    skip_dirs: Vec<String>,
    state: Mutex<State>,
    /// Wakes the worker.
    work: Condvar,
    /// Signalled whenever the discovery backlog drains.
    drained: Condvar,
    snapshots: RwLock<Option<Weak<dyn DiscoverySnapshots>>>,
}

#[derive(Default)]
struct State {
    /// path key -> root, for every root added and not removed.
    roots: BTreeMap<String, PathBuf>,
    pending_roots: Vec<PathBuf>,
    /// path key -> POM file, prioritized by path length.
    tasks: PriorityQueue<String, usize, PathBuf>,
    /// Units of work the worker took out of the queues and has not finished.
    active: usize,
    worker_running: bool,
    shutdown: bool,
    by_coordinate: HashMap<Coordinate, PathBuf>,
    /// path key -> coordinate last recorded for that file.
    by_file: HashMap<String, Coordinate>,
}

impl State {
    fn backlog(&self) -> usize {
        self.pending_roots.len() + self.tasks.len() + self.active
    }

    fn is_known_location(&self, key: &str) -> bool {
        self.roots.keys().any(|root| key_is_under(key, root))
    }

    fn record(&mut self, coordinate: Coordinate, file: PathBuf) {
        let key = path_key(&file);
        self.tasks.remove(&key);

        if let Some(previous) = self.by_file.insert(key.clone(), coordinate.clone()) {
            if previous != coordinate
                && self
                    .by_coordinate
                    .get(&previous)
                    .is_some_and(|old| path_key(old) == key)
            {
                self.by_coordinate.remove(&previous);
            }
        }
        if let Some(old_file) = self.by_coordinate.insert(coordinate.clone(), file) {
            let old_key = path_key(&old_file);
            if old_key != key && self.by_file.get(&old_key) == Some(&coordinate) {
                self.by_file.remove(&old_key);
            }
        }
    }
}

impl WorkspaceIndex {
    pub fn new(skip_dirs: Vec<String>) -> Self {
        let inner = Arc::new(Inner {
            skip_dirs,
            state: Mutex::new(State::default()),
            work: Condvar::new(),
            drained: Condvar::new(),
            snapshots: RwLock::new(None),
        });

        let worker = Arc::clone(&inner);
        let spawned = std::thread::Builder::new()
            .name("nova-workspace-index".to_owned())
            .spawn(move || worker_loop(worker));
        match spawned {
            Ok(_) => inner.state.lock().worker_running = true,
            Err(err) => tracing::warn!(
                target: "nova.pom.workspace",
                error = %err,
                "failed to spawn workspace discovery worker; lookups return known entries only"
            ),
        }

        Self { inner }
    }

    /// Installs the snapshot provider used for discovery.
    pub fn set_snapshots(&self, snapshots: Weak<dyn DiscoverySnapshots>) {
        *self.inner.snapshots.write() = Some(snapshots);
    }

    /// Queues `roots` for discovery. Roots already known are ignored.
    pub fn add_roots(&self, roots: impl IntoIterator<Item = PathBuf>) {
        let mut state = self.inner.state.lock();
        let mut added = 0usize;
        for root in roots {
            let root = normalize_path(&root);
            let key = path_key(&root);
            if state.roots.contains_key(&key) {
                continue;
            }
            state.roots.insert(key, root.clone());
            state.pending_roots.push(root);
            added += 1;
        }
        drop(state);
        if added > 0 {
            tracing::debug!(target: "nova.pom.workspace", added, "workspace roots queued");
            self.inner.work.notify_all();
        }
    }

    /// Forgets `location` and everything below it: roots, pending discovery
    /// and recorded coordinates.
    pub fn remove(&self, location: &Path) {
        let removed_key = path_key(location);
        let mut state = self.inner.state.lock();
        state
            .roots
            .retain(|key, _| !key_is_under(key, &removed_key));
        state
            .pending_roots
            .retain(|root| !key_is_under(&path_key(root), &removed_key));
        state
            .tasks
            .remove_where(|key, _| key_is_under(key, &removed_key));
        state
            .by_coordinate
            .retain(|_, file| !key_is_under(&path_key(file), &removed_key));
        state
            .by_file
            .retain(|key, _| !key_is_under(key, &removed_key));
        let idle = state.backlog() == 0;
        drop(state);
        if idle {
            self.inner.drained.notify_all();
        }
        tracing::debug!(
            target: "nova.pom.workspace",
            location = %location.display(),
            "workspace location removed"
        );
    }

    /// Records `coordinate` as built from `file`. The last recording wins.
    pub fn record(&self, coordinate: Coordinate, file: &Path) {
        let file = normalize_path(file);
        tracing::debug!(
            target: "nova.pom.workspace",
            coordinate = %coordinate,
            file = %file.display(),
            "recorded workspace coordinate"
        );
        let mut state = self.inner.state.lock();
        state.record(coordinate, file);
        let idle = state.backlog() == 0;
        drop(state);
        if idle {
            self.inner.drained.notify_all();
        }
    }

    /// Whether `path` lies under one of the workspace roots.
    pub fn is_member(&self, path: &Path) -> bool {
        self.inner.state.lock().is_known_location(&path_key(path))
    }

    /// Roots and files still waiting for discovery, including the one in progress.
    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().backlog()
    }

    /// Blocks until the discovery backlog is empty.
    pub fn wait_until_idle(&self, ctx: &RequestContext) -> Result<(), Cancelled> {
        let mut state = self.inner.state.lock();
        while state.backlog() > 0 && state.worker_running && !state.shutdown {
            ctx.check()?;
            let wait = ctx
                .remaining()
                .map_or(IDLE_CHECK_INTERVAL, |left| left.min(IDLE_CHECK_INTERVAL));
            self.inner.drained.wait_for(&mut state, wait);
        }
        Ok(())
    }

    /// Source file of the workspace member with `coordinate`.
    ///
    /// Outside a build this waits for pending discovery first. Inside a build
    /// it answers from what is already known, since discovery may itself be
    /// waiting on that build.
    pub fn find_by_coordinate(
        &self,
        coordinate: &Coordinate,
        ctx: &RequestContext,
    ) -> Option<PathBuf> {
        self.settle(ctx);
        self.inner
            .state
            .lock()
            .by_coordinate
            .get(coordinate)
            .cloned()
    }

    /// Versions of `group_artifact` present in the workspace, lowest first.
    /// Blocks like [`WorkspaceIndex::find_by_coordinate`].
    pub fn find_versions(
        &self,
        group_artifact: &GroupArtifact,
        ctx: &RequestContext,
    ) -> Vec<String> {
        self.settle(ctx);
        let mut versions: Vec<String> = self
            .inner
            .state
            .lock()
            .by_coordinate
            .keys()
            .filter(|coordinate| {
                coordinate.group_id == group_artifact.group_id
                    && coordinate.artifact_id == group_artifact.artifact_id
            })
            .map(|coordinate| coordinate.version.clone())
            .collect();
        versions.sort_by_cached_key(|version| MavenVersion::parse(version));
        versions.dedup();
        versions
    }

    /// All recorded coordinates, sorted.
    pub fn coordinates(&self) -> Vec<(Coordinate, PathBuf)> {
        let mut entries: Vec<_> = self
            .inner
            .state
            .lock()
            .by_coordinate
            .iter()
            .map(|(coordinate, file)| (coordinate.clone(), file.clone()))
            .collect();
        entries.sort();
        entries
    }

    /// Stops the discovery worker. Pending work is dropped.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        state.shutdown = true;
        state.pending_roots.clear();
        state.tasks.drain();
        drop(state);
        self.inner.work.notify_all();
        self.inner.drained.notify_all();
    }

    fn settle(&self, ctx: &RequestContext) {
        if ctx.in_build() {
            return;
        }
        if self.wait_until_idle(ctx).is_err() {
            tracing::debug!(
                target: "nova.pom.workspace",
                "lookup cancelled while waiting for discovery; answering from known entries"
            );
        }
    }
}

impl Drop for WorkspaceIndex {
    fn drop(&mut self) {
        self.shutdown();
    }
}

enum Work {
    Roots(Vec<PathBuf>),
    File(PathBuf),
}

fn worker_loop(inner: Arc<Inner>) {
    loop {
        let work = {
            let mut state = inner.state.lock();
            loop {
                if state.shutdown {
                    state.worker_running = false;
                    drop(state);
                    inner.drained.notify_all();
                    return;
                }
                if !state.pending_roots.is_empty() {
                    state.active += 1;
                    break Work::Roots(std::mem::take(&mut state.pending_roots));
                }
                if let Some((_, file)) = state.tasks.pop() {
                    state.active += 1;
                    break Work::File(file);
                }
                inner.work.wait(&mut state);
            }
        };

        match work {
            Work::Roots(roots) => discover_roots(&inner, roots),
            Work::File(file) => discover_file(&inner, &file),
        }

        let mut state = inner.state.lock();
        state.active -= 1;
        let idle = state.backlog() == 0;
        drop(state);
        if idle {
            inner.drained.notify_all();
        }
    }
}

fn discover_roots(inner: &Inner, roots: Vec<PathBuf>) {
    let started = Instant::now();
    let files: Vec<PathBuf> = roots
        .iter()
        .flat_map(|root| discover_pom_files(root, &inner.skip_dirs))
        .collect();

    let mut state = inner.state.lock();
    let mut queued = 0usize;
    for file in files {
        let key = path_key(&file);
        // The root may have been removed while we were walking it.
        if !state.is_known_location(&key) {
            continue;
        }
        state.tasks.push(key.clone(), key.len(), file);
        queued += 1;
    }
    drop(state);

    tracing::debug!(
        target: "nova.pom.workspace",
        roots = roots.len(),
        files = queued,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "workspace roots walked"
    );
}

fn discover_file(inner: &Inner, file: &Path) {
    let snapshots = inner.snapshots.read().as_ref().and_then(Weak::upgrade);
    let ctx = RequestContext::default().for_build();
    let lineage = snapshots.and_then(|snapshots| snapshots.lineage(file, &ctx));

    let own = lineage
        .as_ref()
        .and_then(|chain| chain.first())
        .and_then(|entry| entry.coordinate.complete());
    let file_key = path_key(file);
    if let (Some(chain), Some(own)) = (&lineage, own) {
        let mut state = inner.state.lock();
        // The root may have been removed while the snapshot was built.
        if !state.is_known_location(&file_key) {
            return;
        }
        state.record(own, file.to_path_buf());
        for ancestor in chain.iter().skip(1) {
            let (Some(coordinate), Some(ancestor_file)) =
                (ancestor.coordinate.complete(), ancestor.file.as_ref())
            else {
                continue;
            };
            let ancestor_file = normalize_path(ancestor_file);
            if state.is_known_location(&path_key(&ancestor_file)) {
                state.record(coordinate, ancestor_file);
            }
        }
        return;
    }

    // No snapshot: register whatever coordinate the text declares.
    let coordinate = std::fs::read_to_string(file)
        .ok()
        .and_then(|text| scan_pom_lenient(&text).inherited_coordinate().complete());
    match coordinate {
        Some(coordinate) => {
            let mut state = inner.state.lock();
            if state.is_known_location(&file_key) {
                state.record(coordinate, file.to_path_buf());
            }
        }
        None => tracing::debug!(
            target: "nova.pom.workspace",
            file = %file.display(),
            "no coordinate found for workspace POM"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_moves_a_coordinate_to_its_latest_file() {
        let mut state = State::default();
        let coordinate = Coordinate::new("g", "a", "1");
        state.record(coordinate.clone(), PathBuf::from("/ws/one/pom.xml"));
        state.record(coordinate.clone(), PathBuf::from("/ws/two/pom.xml"));
        assert_eq!(
            state.by_coordinate.get(&coordinate),
            Some(&PathBuf::from("/ws/two/pom.xml"))
        );
        assert!(!state.by_file.contains_key("/ws/one/pom.xml"));

        // Editing the artifactId of a file drops its old coordinate.
        let renamed = Coordinate::new("g", "b", "1");
        state.record(renamed.clone(), PathBuf::from("/ws/two/pom.xml"));
        assert!(!state.by_coordinate.contains_key(&coordinate));
        assert!(state.by_coordinate.contains_key(&renamed));
    }
}
