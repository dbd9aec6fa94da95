use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nova_pom_model::{BuildOptions, BuildState, EditVersion, ResolvedProject, SnapshotId, SourceKey};
use nova_scheduler::{
    task_pair, CancellationToken, JobQueue, PriorityQueue, RequestContext, TaskCompleter,
    TaskHandle, WorkerPool,
};
use parking_lot::Mutex;
use serde::Serialize;

use crate::build::{execute, BuildOutcome};
use crate::documents::CapturedInput;
use crate::env::Services;

/// A request is identified by the document and the exact input it reads.
type RequestKey = (SourceKey, SnapshotId);

struct Request {
    key: SourceKey,
    input: CapturedInput,
    options: BuildOptions,
    token: CancellationToken,
    /// `Queued` or `Running`; terminal states live in the result slot.
    state: Mutex<BuildState>,
    completer: TaskCompleter<BuildOutcome>,
    submitted: Instant,
}

impl Request {
    fn request_key(&self) -> RequestKey {
        (self.key.clone(), self.input.snapshot)
    }

    fn finish(&self, outcome: BuildOutcome) {
        self.completer.complete(outcome);
    }
}

/// Handle to a submitted build.
///
/// Every submission that was deduplicated into the same request receives a
/// handle to the same result; compare with [`BuildHandle::ptr_eq`].
#[derive(Clone)]
pub struct BuildHandle {
    request: Arc<Request>,
    result: TaskHandle<BuildOutcome>,
}

impl BuildHandle {
    fn new(request: Arc<Request>) -> Self {
        let result = request.completer.handle();
        Self { request, result }
    }

    pub fn key(&self) -> &SourceKey {
        &self.request.key
    }

    pub fn snapshot(&self) -> SnapshotId {
        self.request.input.snapshot
    }

    pub fn edit_version(&self) -> EditVersion {
        self.request.input.snapshot.version()
    }

    pub fn state(&self) -> BuildState {
        match self.result.get() {
            Some(outcome) => outcome.state(),
            None => *self.request.state.lock(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.result.is_done()
    }

    pub fn try_get(&self) -> Option<BuildOutcome> {
        self.result.try_get()
    }

    pub fn wait(&self) -> BuildOutcome {
        self.result.wait()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<BuildOutcome> {
        self.result.wait_timeout(timeout)
    }

    pub async fn join(&self) -> BuildOutcome {
        self.result.join().await
    }

    /// Project of a finished build, if it produced one.
    pub fn project(&self) -> Option<Arc<ResolvedProject>> {
        self.result.try_get().and_then(BuildOutcome::into_project)
    }

    /// Runs `callback` with the outcome once the build finishes.
    pub fn on_complete(&self, callback: impl FnOnce(&BuildOutcome) + Send + 'static) {
        self.result.on_complete(callback);
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.result.ptr_eq(&other.result)
    }
}

impl fmt::Debug for BuildHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildHandle")
            .field("key", &self.request.key)
            .field("snapshot", &self.request.input.snapshot)
            .field("state", &self.state())
            .finish()
    }
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub workers: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: u64,
    pub degraded: u64,
    pub cancelled: u64,
    pub failed: u64,
}

#[derive(Default)]
struct SchedulerQueue {
    /// Priority is the number of duplicate submissions (bumps).
    queued: PriorityQueue<RequestKey, u32, Arc<Request>>,
    running: HashMap<RequestKey, Arc<Request>>,
    completed: u64,
    degraded: u64,
    cancelled: u64,
    failed: u64,
}

impl SchedulerQueue {
    fn count(&mut self, state: BuildState) {
        match state {
            BuildState::Completed => self.completed += 1,
            BuildState::Degraded => self.degraded += 1,
            BuildState::Cancelled => self.cancelled += 1,
            BuildState::Failed => self.failed += 1,
            BuildState::Queued | BuildState::Running => {}
        }
    }

    /// Cancels every request for `key`. Queued requests are removed and
    /// returned so the caller can settle them outside the lock; running ones
    /// only have their token cancelled and settle when their worker notices.
    fn cancel_key(&mut self, key: &SourceKey) -> Vec<Arc<Request>> {
        let removed: Vec<Arc<Request>> = self
            .queued
            .remove_where(|(queued_key, _), _| queued_key == key)
            .into_iter()
            .map(|(_, request)| request)
            .collect();
        self.cancelled += removed.len() as u64;
        for ((running_key, _), request) in &self.running {
            if running_key == key {
                request.token.cancel();
            }
        }
        removed
    }
}

impl JobQueue for SchedulerQueue {
    type Job = Arc<Request>;

    fn take_next(&mut self) -> Option<Arc<Request>> {
        let (request_key, request) = self.queued.pop()?;
        *request.state.lock() = BuildState::Running;
        self.running.insert(request_key, Arc::clone(&request));
        Some(request)
    }
}

/// Bounded worker pool draining prioritized build requests.
///
/// At most one build runs per (document, input snapshot). Submitting a new
/// snapshot for a document cancels every older request for it.
pub struct BuildScheduler {
    pool: WorkerPool<SchedulerQueue>,
}

impl BuildScheduler {
    /// A pool of `workers` threads. Zero is valid: requests queue until
    /// [`BuildScheduler::resize`] is called.
    pub fn new(services: Arc<Services>, workers: usize) -> Self {
        let pool = WorkerPool::new(
            "nova-pom-build",
            workers,
            SchedulerQueue::default(),
            move |request: Arc<Request>, pool: &WorkerPool<SchedulerQueue>| {
                run_request(&services, &request, pool)
            },
        );
        Self { pool }
    }

    /// Submits a build of `input` for `key`.
    ///
    /// An identical request that is still queued gets its priority bumped and
    /// its handle returned; one that is running just returns its handle unless
    /// it was already cancelled.
    pub fn submit(&self, key: SourceKey, input: CapturedInput, options: BuildOptions) -> BuildHandle {
        let request_key = (key.clone(), input.snapshot);
        let (handle, superseded) = self.pool.with_queue(|queue| {
            if let Some(existing) = queue.queued.get(&request_key).cloned() {
                let bumps = queue.queued.update_priority(&request_key, |bumps| *bumps += 1);
                tracing::debug!(
                    target: "nova.pom.resolve",
                    key = %key,
                    bumps = bumps.unwrap_or_default(),
                    "duplicate build request promoted"
                );
                return (BuildHandle::new(existing), Vec::new());
            }
            // A cancelled build can only settle as cancelled; queue a new one.
            if let Some(existing) = queue
                .running
                .get(&request_key)
                .filter(|running| !running.token.is_cancelled())
            {
                return (BuildHandle::new(Arc::clone(existing)), Vec::new());
            }

            let superseded = queue.cancel_key(&key);
            let request = Arc::new(Request {
                key: key.clone(),
                input,
                options,
                token: CancellationToken::new(),
                state: Mutex::new(BuildState::Queued),
                completer: task_pair().0,
                submitted: Instant::now(),
            });
            let handle = BuildHandle::new(Arc::clone(&request));
            queue.queued.push(request_key, 0, request);
            tracing::debug!(
                target: "nova.pom.resolve",
                key = %key,
                superseded = superseded.len(),
                "build request queued"
            );
            (handle, superseded)
        });

        for request in superseded {
            request.finish(BuildOutcome::Cancelled);
        }
        handle
    }

    /// Bumps `handle`'s request if it is still queued.
    pub fn promote(&self, handle: &BuildHandle) -> bool {
        let request_key = handle.request.request_key();
        self.pool.with_queue(|queue| {
            let same = queue
                .queued
                .get(&request_key)
                .is_some_and(|queued| Arc::ptr_eq(queued, &handle.request));
            same && queue
                .queued
                .update_priority(&request_key, |bumps| *bumps += 1)
                .is_some()
        })
    }

    /// Cancels every queued or running request for `key`.
    pub fn cancel(&self, key: &SourceKey) {
        let cancelled = self.pool.with_queue(|queue| queue.cancel_key(key));
        for request in cancelled {
            request.finish(BuildOutcome::Cancelled);
        }
    }

    pub fn resize(&self, workers: usize) {
        self.pool.resize(workers);
    }

    pub fn status(&self) -> SchedulerStatus {
        let workers = self.pool.size();
        self.pool.with_queue(|queue| SchedulerStatus {
            workers,
            queued: queue.queued.len(),
            running: queue.running.len(),
            completed: queue.completed,
            degraded: queue.degraded,
            cancelled: queue.cancelled,
            failed: queue.failed,
        })
    }

    /// Stops the workers and cancels all outstanding requests.
    pub fn shutdown(&self) {
        self.pool.shutdown();
        let queued = self.pool.with_queue(|queue| {
            for request in queue.running.values() {
                request.token.cancel();
            }
            let queued: Vec<Arc<Request>> = queue
                .queued
                .drain()
                .into_iter()
                .map(|(_, request)| request)
                .collect();
            queue.cancelled += queued.len() as u64;
            queued
        });
        for request in queued {
            request.finish(BuildOutcome::Cancelled);
        }
    }
}

impl Drop for BuildScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_request(services: &Services, request: &Arc<Request>, pool: &WorkerPool<SchedulerQueue>) {
    let started = Instant::now();
    tracing::debug!(
        target: "nova.pom.resolve",
        key = %request.key,
        snapshot = ?request.input.snapshot,
        queued_ms = started.duration_since(request.submitted).as_millis() as u64,
        "build started"
    );

    // Workspace lookups wait for pending discovery here. Discovery never
    // waits on the pool, so only its own snapshots skip that wait.
    let ctx = RequestContext::new(request.token.clone());
    let outcome = execute(services, &request.key, &request.input, &request.options, &ctx);

    // Cancellation is decided under the queue lock, the same lock a
    // superseding submission takes to cancel the token.
    let outcome = pool.with_queue(|queue| {
        let request_key = request.request_key();
        // A fresh request for the same input may have replaced this one.
        if queue
            .running
            .get(&request_key)
            .is_some_and(|running| Arc::ptr_eq(running, request))
        {
            queue.running.remove(&request_key);
        }
        let outcome = if request.token.is_cancelled() {
            BuildOutcome::Cancelled
        } else {
            outcome
        };
        queue.count(outcome.state());
        outcome
    });

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &outcome {
        BuildOutcome::Completed(project) | BuildOutcome::Degraded(project) => {
            tracing::debug!(
                target: "nova.pom.resolve",
                key = %request.key,
                state = ?outcome.state(),
                problems = project.problems.len(),
                elapsed_ms,
                "build finished"
            );
            publish(services, project);
        }
        BuildOutcome::Cancelled => tracing::debug!(
            target: "nova.pom.resolve",
            key = %request.key,
            elapsed_ms,
            "build cancelled"
        ),
        BuildOutcome::Failed(message) => tracing::warn!(
            target: "nova.pom.resolve",
            key = %request.key,
            error = %message,
            elapsed_ms,
            "build failed"
        ),
    }
    request.finish(outcome);
}

/// Pushes a finished project's artifact to the indices so lookups see it
/// without a rescan.
fn publish(services: &Services, project: &ResolvedProject) {
    let Some(coordinate) = project.model.coordinate.complete() else {
        return;
    };
    if let Some(path) = project.key.as_path() {
        if services.workspace.is_member(path) {
            services.workspace.record(coordinate.clone(), path);
        }
    }
    if let Some(installed) = &project.model.installed_pom {
        services.local_store.update_from_build(coordinate, installed);
    }
}
