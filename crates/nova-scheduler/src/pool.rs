use std::sync::Arc;

use nova_core::panic_payload_to_str;
use parking_lot::{Condvar, Mutex};

/// Work source drained by a [`WorkerPool`].
///
/// `take_next` runs with the pool lock held, so implementations can move the
/// job into a "running" table atomically with dequeueing it.
pub trait JobQueue: Send + 'static {
    type Job: Send + 'static;

    fn take_next(&mut self) -> Option<Self::Job>;
}

/// A resizable pool of named OS threads draining a shared [`JobQueue`].
///
/// A pool of size zero is valid: work is accepted and queued until the pool is
/// resized. Cloning yields another handle to the same pool.
pub struct WorkerPool<Q: JobQueue> {
    shared: Arc<Shared<Q>>,
}

impl<Q: JobQueue> Clone for WorkerPool<Q> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<Q: JobQueue> {
    name: String,
    state: Mutex<PoolState<Q>>,
    wake: Condvar,
    run: Box<dyn Fn(Q::Job, &WorkerPool<Q>) + Send + Sync>,
}

struct PoolState<Q> {
    queue: Q,
    target: usize,
    live: usize,
    spawned: usize,
    shutdown: bool,
}

impl<Q: JobQueue> WorkerPool<Q> {
    pub fn new(
        name: impl Into<String>,
        size: usize,
        queue: Q,
        run: impl Fn(Q::Job, &WorkerPool<Q>) + Send + Sync + 'static,
    ) -> Self {
        let pool = Self {
            shared: Arc::new(Shared {
                name: name.into(),
                state: Mutex::new(PoolState {
                    queue,
                    target: 0,
                    live: 0,
                    spawned: 0,
                    shutdown: false,
                }),
                wake: Condvar::new(),
                run: Box::new(run),
            }),
        };
        pool.resize(size);
        pool
    }

    /// Runs `f` with exclusive access to the queue and wakes idle workers
    /// afterwards, since `f` may have enqueued work.
    pub fn with_queue<R>(&self, f: impl FnOnce(&mut Q) -> R) -> R {
        let result = {
            let mut state = self.shared.state.lock();
            f(&mut state.queue)
        };
        self.shared.wake.notify_all();
        result
    }

    pub fn size(&self) -> usize {
        self.shared.state.lock().target
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutdown
    }

    /// Grows or shrinks the pool. Shrinking lets surplus workers exit after
    /// their current job.
    pub fn resize(&self, size: usize) {
        let to_spawn = {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return;
            }
            state.target = size;
            let missing = size.saturating_sub(state.live);
            state.live += missing;
            let first = state.spawned;
            state.spawned += missing;
            first..first + missing
        };
        for id in to_spawn {
            self.spawn_worker(id);
        }
        self.shared.wake.notify_all();
        tracing::debug!(target: "nova.scheduler", pool = %self.shared.name, size, "resized worker pool");
    }

    /// Stops all workers once their current job finishes. Queued jobs are left
    /// in the queue for the owner to settle.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.target = 0;
        }
        self.shared.wake.notify_all();
    }

    fn spawn_worker(&self, id: usize) {
        let pool = self.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("{}-{id}", self.shared.name))
            .spawn(move || pool.worker_loop());
        if let Err(err) = spawned {
            tracing::warn!(
                target: "nova.scheduler",
                pool = %self.shared.name,
                error = %err,
                "failed to spawn worker thread; work stays queued"
            );
            self.shared.state.lock().live -= 1;
        }
    }

    fn worker_loop(&self) {
        loop {
            let job = {
                let mut state = self.shared.state.lock();
                loop {
                    if state.shutdown || state.live > state.target {
                        state.live -= 1;
                        return;
                    }
                    if let Some(job) = state.queue.take_next() {
                        break job;
                    }
                    self.shared.wake.wait(&mut state);
                }
            };

            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                (self.shared.run)(job, self)
            }));
            if let Err(panic) = result {
                let message = panic_payload_to_str(&*panic);
                tracing::error!(
                    target: "nova.scheduler",
                    pool = %self.shared.name,
                    panic = %message,
                    "worker job panicked"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::mpsc;
    use std::time::Duration;

    struct Fifo(VecDeque<u32>);

    impl JobQueue for Fifo {
        type Job = u32;

        fn take_next(&mut self) -> Option<u32> {
            self.0.pop_front()
        }
    }

    #[test]
    fn zero_sized_pool_queues_until_resized() {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let pool = WorkerPool::new("test-pool", 0, Fifo(VecDeque::new()), move |job, _| {
            let _ = tx.lock().send(job);
        });

        pool.with_queue(|queue| queue.0.extend([1, 2, 3]));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        pool.resize(1);
        let got: Vec<u32> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(got, vec![1, 2, 3]);
        assert!(!pool.is_shutdown());
        pool.shutdown();
        assert!(pool.is_shutdown());
    }

    #[test]
    fn panicking_jobs_do_not_kill_the_worker() {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let pool = WorkerPool::new("panicky", 1, Fifo(VecDeque::new()), move |job, _| {
            if job == 0 {
                panic!("job zero");
            }
            let _ = tx.lock().send(job);
        });

        pool.with_queue(|queue| queue.0.extend([0, 7]));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
        pool.shutdown();
    }
}
