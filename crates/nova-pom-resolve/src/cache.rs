use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use nova_pom_model::{BuildOptions, BuildState, EditVersion, ResolvedProject, SourceKey};
use parking_lot::Mutex;

use crate::build::BuildOutcome;
use crate::documents::{capture, DocumentStore};
use crate::scheduler::{BuildHandle, BuildScheduler};

struct CacheEntry {
    requested: EditVersion,
    handle: BuildHandle,
    invalidated: bool,
}

#[derive(Default)]
struct Entries {
    by_key: HashMap<SourceKey, CacheEntry>,
    /// Increases with every submitted build; orders results in `last_good`.
    next_sequence: u64,
}

/// Most recent result per key that produced a project, tagged with the
/// sequence of the build that produced it.
type LastGood = Mutex<HashMap<SourceKey, (u64, Arc<ResolvedProject>)>>;

/// Decides when a document needs a new build and remembers the latest one.
pub struct ResolutionCache {
    scheduler: Arc<BuildScheduler>,
    documents: Arc<dyn DocumentStore>,
    options: BuildOptions,
    entries: Mutex<Entries>,
    last_good: Arc<LastGood>,
}

enum Decision {
    Reuse,
    Promote,
    Rebuild,
}

impl ResolutionCache {
    pub fn new(
        scheduler: Arc<BuildScheduler>,
        documents: Arc<dyn DocumentStore>,
        options: BuildOptions,
    ) -> Self {
        Self {
            scheduler,
            documents,
            options,
            entries: Mutex::new(Entries::default()),
            last_good: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Handle to the build of `key` at `version`.
    ///
    /// A new build is submitted when there is no entry, when `version` is
    /// newer than the last requested one, when the entry was invalidated, or
    /// when its build failed or was cancelled. Requests for an older version
    /// get the current handle. Switching between an editor buffer and the file
    /// on disk always rebuilds.
    pub fn resolve(&self, key: &SourceKey, version: EditVersion) -> BuildHandle {
        if let Some(handle) = self.current(&self.entries.lock(), key, version) {
            return handle;
        }

        // Captured without the entries lock held: on-disk inputs stat the file.
        let input = capture(&*self.documents, key, version);
        let (handle, sequence) = {
            let mut entries = self.entries.lock();
            // Another caller may have submitted while we were capturing.
            if let Some(handle) = self.current(&entries, key, version) {
                return handle;
            }

            let handle = self
                .scheduler
                .submit(key.clone(), input, self.options.clone());
            entries.next_sequence += 1;
            let sequence = entries.next_sequence;
            entries.by_key.insert(
                key.clone(),
                CacheEntry {
                    requested: version,
                    handle: handle.clone(),
                    invalidated: false,
                },
            );
            tracing::debug!(
                target: "nova.pom.cache",
                key = %key,
                version = %version,
                "cache entry rebuilt"
            );
            (handle, sequence)
        };

        // Registered outside the entries lock: the callback may run right away.
        let last_good = Arc::clone(&self.last_good);
        handle.on_complete(move |outcome| record_last_good(&last_good, sequence, outcome));
        handle
    }

    /// The entry's handle when it can serve `version`, promoting it if it is
    /// still queued.
    fn current(
        &self,
        entries: &Entries,
        key: &SourceKey,
        version: EditVersion,
    ) -> Option<BuildHandle> {
        let entry = entries.by_key.get(key)?;
        match decide(entry, version) {
            Decision::Reuse => Some(entry.handle.clone()),
            Decision::Promote => {
                self.scheduler.promote(&entry.handle);
                Some(entry.handle.clone())
            }
            Decision::Rebuild => None,
        }
    }

    /// Latest project produced for `key`, even while a newer build is pending
    /// or after it failed. Never blocks on a build.
    pub fn get_last_successful(&self, key: &SourceKey) -> Option<Arc<ResolvedProject>> {
        self.last_good
            .lock()
            .get(key)
            .map(|(_, project)| Arc::clone(project))
    }

    /// Current handle for `key` without triggering a build.
    pub fn cached(&self, key: &SourceKey) -> Option<BuildHandle> {
        self.entries
            .lock()
            .by_key
            .get(key)
            .map(|entry| entry.handle.clone())
    }

    /// Forces the next [`ResolutionCache::resolve`] of `key` to rebuild, even
    /// at the same version. Used when a file changes on disk.
    pub fn invalidate(&self, key: &SourceKey) {
        if let Some(entry) = self.entries.lock().by_key.get_mut(key) {
            entry.invalidated = true;
            tracing::debug!(target: "nova.pom.cache", key = %key, "cache entry invalidated");
        }
    }

    /// Drops everything known about `key` and cancels its builds.
    pub fn remove(&self, key: &SourceKey) {
        let removed = self.entries.lock().by_key.remove(key).is_some();
        self.last_good.lock().remove(key);
        self.scheduler.cancel(key);
        if removed {
            tracing::debug!(target: "nova.pom.cache", key = %key, "cache entry removed");
        }
    }

    /// [`ResolutionCache::remove`] for every key at or below `root`.
    pub fn remove_under(&self, root: &Path) {
        let keys: Vec<SourceKey> = {
            let mut entries = self.entries.lock();
            let keys: Vec<SourceKey> = entries
                .by_key
                .keys()
                .filter(|key| key.is_under(root))
                .cloned()
                .collect();
            for key in &keys {
                entries.by_key.remove(key);
            }
            keys
        };
        self.last_good.lock().retain(|key, _| !key.is_under(root));
        for key in &keys {
            self.scheduler.cancel(key);
        }
        tracing::debug!(
            target: "nova.pom.cache",
            root = %root.display(),
            removed = keys.len(),
            "cache entries removed"
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn decide(entry: &CacheEntry, version: EditVersion) -> Decision {
    if entry.invalidated || entry.requested.is_on_disk() != version.is_on_disk() {
        return Decision::Rebuild;
    }
    if version < entry.requested {
        return Decision::Reuse;
    }
    if version > entry.requested {
        return Decision::Rebuild;
    }
    match entry.handle.state() {
        BuildState::Failed | BuildState::Cancelled => Decision::Rebuild,
        BuildState::Queued => Decision::Promote,
        BuildState::Running | BuildState::Completed | BuildState::Degraded => Decision::Reuse,
    }
}

fn record_last_good(last_good: &LastGood, sequence: u64, outcome: &BuildOutcome) {
    let Some(project) = outcome.project() else {
        return;
    };
    let mut last_good = last_good.lock();
    let newer = last_good
        .get(&project.key)
        .is_none_or(|(current, _)| sequence >= *current);
    if newer {
        last_good.insert(project.key.clone(), (sequence, Arc::clone(project)));
    }
}
