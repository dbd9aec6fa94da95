use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

type Callback<T> = Box<dyn FnOnce(&T) + Send>;

struct Shared<T> {
    value: OnceLock<T>,
    callbacks: Mutex<Vec<Callback<T>>>,
    ready: Condvar,
    notify: Notify,
}

/// Read side of a single-assignment result slot.
///
/// Handles are cheap to clone and all clones observe the same value. Identity
/// is preserved: two handles for the same submission compare equal under
/// [`TaskHandle::ptr_eq`].
pub struct TaskHandle<T> {
    shared: Arc<Shared<T>>,
}

/// Write side of a [`TaskHandle`]. Completing is first-writer-wins.
pub struct TaskCompleter<T> {
    shared: Arc<Shared<T>>,
}

/// Creates a connected completer/handle pair.
pub fn task_pair<T>() -> (TaskCompleter<T>, TaskHandle<T>) {
    let shared = Arc::new(Shared {
        value: OnceLock::new(),
        callbacks: Mutex::new(Vec::new()),
        ready: Condvar::new(),
        notify: Notify::new(),
    });
    (
        TaskCompleter {
            shared: Arc::clone(&shared),
        },
        TaskHandle { shared },
    )
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("done", &self.is_done())
            .finish()
    }
}

impl<T> TaskHandle<T> {
    pub fn is_done(&self) -> bool {
        self.shared.value.get().is_some()
    }

    /// Borrow the value if the task is complete.
    pub fn get(&self) -> Option<&T> {
        self.shared.value.get()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Registers `callback` to run once with the final value. Runs immediately
    /// on the calling thread if the task is already complete, otherwise on the
    /// completing thread.
    pub fn on_complete(&self, callback: impl FnOnce(&T) + Send + 'static) {
        {
            let mut callbacks = self.shared.callbacks.lock();
            if self.shared.value.get().is_none() {
                callbacks.push(Box::new(callback));
                return;
            }
        }
        if let Some(value) = self.shared.value.get() {
            callback(value);
        }
    }

    pub fn wait_ref(&self) -> &T {
        let mut callbacks = self.shared.callbacks.lock();
        loop {
            if let Some(value) = self.shared.value.get() {
                return value;
            }
            self.shared.ready.wait(&mut callbacks);
        }
    }
}

impl<T: Clone> TaskHandle<T> {
    pub fn try_get(&self) -> Option<T> {
        self.shared.value.get().cloned()
    }

    pub fn wait(&self) -> T {
        self.wait_ref().clone()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut callbacks = self.shared.callbacks.lock();
        loop {
            if let Some(value) = self.shared.value.get() {
                return Some(value.clone());
            }
            if self
                .shared
                .ready
                .wait_until(&mut callbacks, deadline)
                .timed_out()
            {
                return self.try_get();
            }
        }
    }

    pub async fn join(&self) -> T {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(value) = self.try_get() {
                return value;
            }
            notified.await;
        }
    }
}

impl<T> TaskCompleter<T> {
    pub fn handle(&self) -> TaskHandle<T> {
        TaskHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn is_done(&self) -> bool {
        self.shared.value.get().is_some()
    }

    /// Stores `value` and wakes every waiter. Returns `false` (dropping
    /// `value`) if the task was already complete.
    pub fn complete(&self, value: T) -> bool {
        let callbacks = {
            let mut callbacks = self.shared.callbacks.lock();
            if self.shared.value.set(value).is_err() {
                return false;
            }
            std::mem::take(&mut *callbacks)
        };
        self.shared.ready.notify_all();
        self.shared.notify.notify_waiters();

        if let Some(value) = self.shared.value.get() {
            for callback in callbacks {
                callback(value);
            }
        }
        true
    }
}
