use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::{CancellationToken, TaskError};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Runs `f` on a helper thread and waits at most `timeout` for it.
///
/// Meant for blocking calls that offer no cancellation hook of their own
/// (remote registry lookups). On expiry the token handed to `f` is cancelled
/// and `DeadlineExceeded` is returned; the helper thread is left to finish on
/// its own since threads cannot be stopped from outside.
pub fn run_with_timeout<T, F>(
    timeout: Duration,
    cancel: CancellationToken,
    f: F,
) -> Result<T, TaskError>
where
    T: Send + 'static,
    F: FnOnce(CancellationToken) -> T + Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(TaskError::Cancelled);
    }

    let (tx, rx) = mpsc::channel::<Result<T, TaskError>>();
    let token = cancel.child_token();
    let task_token = token.clone();
    let spawned = std::thread::Builder::new()
        .name("nova-timeout".to_owned())
        .spawn(move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(task_token)))
                .map_err(|_| TaskError::Panicked);
            let _ = tx.send(result);
        });
    if spawned.is_err() {
        return Err(TaskError::Panicked);
    }

    let deadline = Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            token.cancel();
            return Err(TaskError::Cancelled);
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            token.cancel();
            tracing::debug!(target: "nova.scheduler", ?timeout, "blocking call exceeded its deadline");
            return Err(TaskError::DeadlineExceeded(timeout));
        }

        match rx.recv_timeout(remaining.min(POLL_INTERVAL)) {
            Ok(result) => return result,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => return Err(TaskError::Panicked),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_calls_return_their_value() {
        let result = run_with_timeout(Duration::from_secs(5), CancellationToken::new(), |_| 7);
        assert_eq!(result, Ok(7));
    }

    #[test]
    fn slow_calls_hit_the_deadline_and_see_cancellation() {
        let (seen_tx, seen_rx) = mpsc::channel();
        let start = Instant::now();
        let result = run_with_timeout(
            Duration::from_millis(30),
            CancellationToken::new(),
            move |token| {
                while !token.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(2));
                }
                let _ = seen_tx.send(());
            },
        );
        assert_eq!(
            result,
            Err(TaskError::DeadlineExceeded(Duration::from_millis(30)))
        );
        assert!(start.elapsed() < Duration::from_secs(2));
        seen_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn caller_cancellation_wins_over_waiting() {
        let token = CancellationToken::new();
        token.cancel();
        let result = run_with_timeout(Duration::from_secs(5), token, |_| ());
        assert_eq!(result, Err(TaskError::Cancelled));
    }

    #[test]
    fn panics_are_reported() {
        let result: Result<(), _> =
            run_with_timeout(Duration::from_secs(5), CancellationToken::new(), |_| {
                panic!("remote client blew up")
            });
        assert_eq!(result, Err(TaskError::Panicked));
    }
}
