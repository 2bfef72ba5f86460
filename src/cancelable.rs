//! # Cancelation handles.
//!
//! A cancel handle represents the right to abort in-flight work. All handles
//! are thread-safe and monotonic: once `is_canceled` reports `true` it never
//! goes back, and re-canceling is a no-op.
//!
//! The hierarchy:
//!
//! - [`EmptyCancelable`]: idempotent no-op.
//! - [`ActionCancelable`]: runs one arbitrary thunk, at most once.
//! - [`MultiAssignCancelable`]: a slot whose inner handle can be rebound
//!   over time; canceling the slot cancels whatever is currently bound, and
//!   any assignment after cancelation is itself canceled immediately.
//! - [`CompositeCancelable`]: fans out to a set of children; removing a
//!   child drops the responsibility to cancel it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;

/// # A handle that can abort in-flight work.
///
/// Implementations must be idempotent: the first `cancel` wins and every
/// subsequent call is a no-op.
pub trait CancelToken: Send + Sync + 'static {
    /// Aborts the work bound to this handle.
    fn cancel(&self);

    /// Reports whether this handle has been canceled. Monotonic.
    fn is_canceled(&self) -> bool;
}

/// Shared handle to a cancel token.
pub type Cancelable = Arc<dyn CancelToken>;

fn lock_slot<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A handle with nothing to cancel.
pub struct EmptyCancelable;

impl EmptyCancelable {
    /// Returns the no-op handle as a shared [`Cancelable`].
    pub fn arc() -> Cancelable {
        Arc::new(EmptyCancelable)
    }
}

impl CancelToken for EmptyCancelable {
    fn cancel(&self) {}

    fn is_canceled(&self) -> bool {
        false
    }
}

/// A handle that runs an arbitrary cancelation thunk, at most once.
pub struct ActionCancelable {
    canceled: AtomicBool,
    action: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl ActionCancelable {
    /// Wraps `action` into a shared handle. The action runs on the first
    /// `cancel` and never again.
    pub fn arc(action: impl FnOnce() + Send + 'static) -> Cancelable {
        Arc::new(Self {
            canceled: AtomicBool::new(false),
            action: Mutex::new(Some(Box::new(action))),
        })
    }
}

impl CancelToken for ActionCancelable {
    fn cancel(&self) {
        if self.canceled.swap(true, Ordering::AcqRel) {
            return;
        }
        let action = lock_slot(&self.action).take();
        if let Some(run) = action {
            run();
        }
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }
}

/// A slot that can be re-bound with successive inner handles.
///
/// The run loop allocates one of these per `run_async` and rebinds it as the
/// task chain moves through delays, registrations and retries. Rebinding does
/// **not** cancel the previous inner handle; only canceling the slot cancels
/// the currently bound one.
pub struct MultiAssignCancelable {
    canceled: AtomicBool,
    current: Mutex<Option<Cancelable>>,
}

impl MultiAssignCancelable {
    /// Creates an empty slot.
    pub fn arc() -> Arc<Self> {
        Arc::new(Self {
            canceled: AtomicBool::new(false),
            current: Mutex::new(None),
        })
    }

    /// Rebinds the slot to `inner`, dropping the previous binding without
    /// canceling it. If the slot was already canceled, `inner` is canceled
    /// immediately instead.
    pub fn assign(&self, inner: Cancelable) {
        let late = {
            let mut slot = lock_slot(&self.current);
            if self.canceled.load(Ordering::Acquire) {
                true
            } else {
                *slot = Some(inner.clone());
                false
            }
        };
        if late {
            inner.cancel();
        }
    }
}

impl CancelToken for MultiAssignCancelable {
    fn cancel(&self) {
        let inner = {
            let mut slot = lock_slot(&self.current);
            if self.canceled.swap(true, Ordering::AcqRel) {
                None
            } else {
                slot.take()
            }
        };
        if let Some(current) = inner {
            current.cancel();
        }
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }
}

/// A handle that fans cancelation out to a set of children.
pub struct CompositeCancelable {
    canceled: AtomicBool,
    next_key: AtomicU64,
    children: DashMap<u64, Cancelable>,
}

impl CompositeCancelable {
    /// Creates an empty composite.
    pub fn arc() -> Arc<Self> {
        Arc::new(Self {
            canceled: AtomicBool::new(false),
            next_key: AtomicU64::new(0),
            children: DashMap::new(),
        })
    }

    /// Adds a child and returns the key under which it is tracked.
    ///
    /// Adding to an already-canceled composite cancels the child immediately.
    pub fn add(&self, child: Cancelable) -> u64 {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        if self.is_canceled() {
            child.cancel();
            return key;
        }
        self.children.insert(key, child);
        // Re-check: a concurrent cancel may have swept the map before the
        // insert landed.
        if self.is_canceled() {
            if let Some((_, late)) = self.children.remove(&key) {
                late.cancel();
            }
        }
        key
    }

    /// Removes the child tracked under `key` without canceling it.
    pub fn remove(&self, key: u64) {
        self.children.remove(&key);
    }
}

impl CancelToken for CompositeCancelable {
    fn cancel(&self) {
        if self.canceled.swap(true, Ordering::AcqRel) {
            return;
        }
        let keys: Vec<u64> = self.children.iter().map(|entry| *entry.key()).collect();
        for key in keys {
            if let Some((_, child)) = self.children.remove(&key) {
                child.cancel();
            }
        }
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn counting() -> (Cancelable, Arc<AtomicU32>) {
        let hits = Arc::new(AtomicU32::new(0));
        let inner = hits.clone();
        let handle = ActionCancelable::arc(move || {
            inner.fetch_add(1, Ordering::SeqCst);
        });
        (handle, hits)
    }

    #[test]
    fn action_runs_at_most_once() {
        let (handle, hits) = counting();
        assert!(!handle.is_canceled());
        handle.cancel();
        handle.cancel();
        assert!(handle.is_canceled());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn multi_assign_cancels_current_binding() {
        let slot = MultiAssignCancelable::arc();
        let (first, first_hits) = counting();
        let (second, second_hits) = counting();

        slot.assign(first);
        slot.assign(second);
        // Rebinding drops the first handle without canceling it.
        assert_eq!(first_hits.load(Ordering::SeqCst), 0);

        slot.cancel();
        assert_eq!(second_hits.load(Ordering::SeqCst), 1);
        assert_eq!(first_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn multi_assign_after_cancel_cancels_immediately() {
        let slot = MultiAssignCancelable::arc();
        slot.cancel();
        let (late, hits) = counting();
        slot.assign(late);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn composite_cancels_all_children() {
        let composite = CompositeCancelable::arc();
        let (a, a_hits) = counting();
        let (b, b_hits) = counting();
        composite.add(a);
        composite.add(b);
        composite.cancel();
        assert_eq!(a_hits.load(Ordering::SeqCst), 1);
        assert_eq!(b_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn composite_removal_drops_responsibility() {
        let composite = CompositeCancelable::arc();
        let (a, a_hits) = counting();
        let key = composite.add(a);
        composite.remove(key);
        composite.cancel();
        assert_eq!(a_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn composite_add_after_cancel_cancels_immediately() {
        let composite = CompositeCancelable::arc();
        composite.cancel();
        let (late, hits) = counting();
        composite.add(late);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
