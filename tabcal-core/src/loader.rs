//! Busy indicator shared with the host.
//!
//! The host hands a [`Loader`] to [`EventFetcher::fetch`](crate::EventFetcher::fetch),
//! which holds a [`LoaderGuard`] for the whole operation. The guard pushes on
//! creation and pops on drop, so the counter is balanced on every exit path.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Counter of outstanding operations.
pub trait Loader: Send + Sync {
    /// An operation started.
    fn push(&self);

    /// An operation finished.
    fn pop(&self);
}

/// Scoped acquisition of a [`Loader`].
#[must_use = "the loader is released as soon as the guard is dropped"]
pub struct LoaderGuard<'a> {
    loader: &'a dyn Loader,
}

impl<'a> LoaderGuard<'a> {
    /// Signal the start of an operation.
    pub fn acquire(loader: &'a dyn Loader) -> Self {
        loader.push();
        Self { loader }
    }
}

impl Drop for LoaderGuard<'_> {
    fn drop(&mut self) {
        self.loader.pop();
    }
}

/// Loader backed by an atomic counter.
#[derive(Debug, Default)]
pub struct CountingLoader {
    pending: AtomicUsize,
}

impl CountingLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of operations in progress.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_busy(&self) -> bool {
        self.pending() > 0
    }
}

impl Loader for CountingLoader {
    fn push(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    fn pop(&self) {
        // Saturate instead of wrapping on an unbalanced pop
        let _ = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

/// Loader that ignores every signal.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLoader;

impl Loader for NoopLoader {
    fn push(&self) {}

    fn pop(&self) {}
}
