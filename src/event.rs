//! Observer registries.
//!
//! Every event surface of the driver (status datagrams, raw messages, pings,
//! dummies, configuration changes, connection events, errors) is a
//! [`CallbackList`]. Handlers run sequentially on the I/O task that produced
//! the event, in insertion order. A handler may append or remove handlers on
//! its own or another registry mid-dispatch: removal is recorded as a
//! tombstone and takes effect no later than the next dispatch, and no
//! registry lock is held while a handler runs.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

/// Handle returned by [`CallbackList::append`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Entry<T: ?Sized> {
    id: u64,
    callback: Callback<T>,
    /// Remaining invocations for counted subscriptions, `None` = unlimited.
    remaining: Option<usize>,
    removed: bool,
}

struct Inner<T: ?Sized> {
    entries: Vec<Entry<T>>,
    next_id: u64,
}

/// Typed, insertion-ordered callback fan-out.
pub struct CallbackList<T: ?Sized> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T: ?Sized> Clone for CallbackList<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ?Sized> Default for CallbackList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> CallbackList<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// Subscribe a handler. Handlers are invoked in insertion order.
    pub fn append<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.insert(Arc::new(callback), None)
    }

    /// Subscribe a handler that auto-removes after `count` invocations.
    pub fn append_counted<F>(&self, count: usize, callback: F) -> CallbackId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.insert(Arc::new(callback), Some(count))
    }

    fn insert(&self, callback: Callback<T>, remaining: Option<usize>) -> CallbackId {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.push(Entry {
            id,
            callback,
            remaining,
            removed: remaining == Some(0),
        });
        CallbackId(id)
    }

    /// Unsubscribe a handler. Safe to call from within any handler; the
    /// removal takes effect no later than the next dispatch.
    pub fn remove(&self, id: CallbackId) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.iter_mut().find(|e| e.id == id.0) {
            Some(entry) if !entry.removed => {
                entry.removed = true;
                true
            }
            _ => false,
        }
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.iter().filter(|e| !e.removed).count()
    }

    /// True if no handler is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every currently-subscribed handler with `event`, sequentially,
    /// on the calling thread. A panicking handler is logged and does not
    /// prevent subsequent handlers from running.
    pub fn dispatch(&self, event: &T) {
        let snapshot: Vec<(u64, Callback<T>)> = {
            let mut inner = self.inner.lock();
            inner.entries.retain(|e| !e.removed);
            inner
                .entries
                .iter()
                .map(|e| (e.id, Arc::clone(&e.callback)))
                .collect()
        };

        for (id, callback) in snapshot {
            // Skip handlers removed earlier in this same dispatch.
            let live = {
                let inner = self.inner.lock();
                inner.entries.iter().any(|e| e.id == id && !e.removed)
            };
            if !live {
                continue;
            }

            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                warn!(callback = id, "observer panicked during dispatch");
            }

            let mut inner = self.inner.lock();
            if let Some(entry) = inner.entries.iter_mut().find(|e| e.id == id) {
                if let Some(remaining) = entry.remaining.as_mut() {
                    *remaining = remaining.saturating_sub(1);
                    if *remaining == 0 {
                        entry.removed = true;
                    }
                }
            }
        }
    }
}
