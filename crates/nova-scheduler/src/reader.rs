use std::io::{self, Read};

use crate::{Cancelled, CancellationToken};

/// Upper bound on bytes handed out per `read` call.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// A reader that checks a cancellation token before every chunk.
///
/// Cancellation surfaces as an `io::Error` wrapping [`Cancelled`] so it can be
/// told apart from real I/O failures with [`is_cancellation`]. The error kind is
/// `Other` rather than `Interrupted` because `read_to_end` silently retries the
/// latter.
pub struct CancellableReader<R> {
    inner: R,
    token: CancellationToken,
    chunk_size: usize,
}

impl<R: Read> CancellableReader<R> {
    pub fn new(inner: R, token: CancellationToken) -> Self {
        Self::with_chunk_size(inner, token, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(inner: R, token: CancellationToken, chunk_size: usize) -> Self {
        Self {
            inner,
            token,
            chunk_size: chunk_size.max(1),
        }
    }
}

impl<R: Read> Read for CancellableReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.token.is_cancelled() {
            return Err(io::Error::other(Cancelled));
        }
        let len = buf.len().min(self.chunk_size);
        self.inner.read(&mut buf[..len])
    }
}

/// Whether `err` was produced by a cancelled [`CancellableReader`].
pub fn is_cancellation(err: &io::Error) -> bool {
    err.get_ref().is_some_and(|inner| inner.is::<Cancelled>())
}
