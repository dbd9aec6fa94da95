use std::time::{Duration, Instant};

use crate::{Cancelled, CancellationToken};

/// Per-call context threaded explicitly through resolution code.
///
/// Besides cancellation it carries the re-entrancy flag: code running *inside*
/// a build must never block on background work that may itself be waiting for
/// builds to finish. Lookups consult [`RequestContext::in_build`] instead of
/// thread-local state.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    cancel: CancellationToken,
    in_build: bool,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            in_build: false,
            deadline: None,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.remaining().is_some_and(|left| left.is_zero())
    }

    /// Returns `Err(Cancelled)` once the token fires or the deadline passes.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Whether this call originates from a running build.
    pub fn in_build(&self) -> bool {
        self.in_build
    }

    /// Same context, marked as running inside a build.
    pub fn for_build(&self) -> Self {
        Self {
            in_build: true,
            ..self.clone()
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn remaining(&self) -> Option<Duration> {
        Some(self.deadline?.saturating_duration_since(Instant::now()))
    }

    /// Clone the context with a child token: cancelling the child leaves the
    /// parent running, cancelling the parent cancels the child.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            in_build: self.in_build,
            deadline: self.deadline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_cancellation_is_one_directional() {
        let parent = RequestContext::new(CancellationToken::new());
        let child = parent.child();
        child.token().cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let other = parent.child();
        parent.token().cancel();
        assert_eq!(other.check(), Err(Cancelled));
    }

    #[test]
    fn build_flag_survives_children() {
        let ctx = RequestContext::default().for_build();
        assert!(ctx.in_build());
        assert!(ctx.child().in_build());
        assert!(!RequestContext::default().in_build());
    }

    #[test]
    fn expired_deadline_reads_as_cancelled() {
        let ctx = RequestContext::default().with_timeout(Duration::ZERO);
        assert!(ctx.is_cancelled());
        assert!(!ctx.token().is_cancelled());
    }
}
