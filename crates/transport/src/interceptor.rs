//! Ordered, ejectable interceptor lists

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Handle returned when an interceptor is installed; used to eject it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterceptorId(u64);

impl fmt::Display for InterceptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "interceptor-{}", self.0)
    }
}

/// Interceptors in registration order.
///
/// The lock is only held to mutate or clone the list, never while an
/// interceptor runs, so an interceptor may install or eject others.
pub(crate) struct InterceptorChain<T: ?Sized> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(InterceptorId, Arc<T>)>>,
}

impl<T: ?Sized> InterceptorChain<T> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, interceptor: Arc<T>) -> InterceptorId {
        let id = InterceptorId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, interceptor));
        id
    }

    pub(crate) fn eject(&self, id: InterceptorId) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    /// Clone of the current list, oldest first.
    pub(crate) fn snapshot(&self) -> Vec<Arc<T>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, interceptor)| Arc::clone(interceptor))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
