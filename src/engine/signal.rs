// src/engine/signal.rs
//
// Cooperative cancellation owned by the caller. A signal can be shared by
// any number of jobs; firing it cancels every job still listening.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

type Listener = Box<dyn FnOnce() + Send>;

/// Token returned by [`CancelSignal::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Inner {
    fired: AtomicBool,
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
}

/// One-shot, cloneable cancellation flag with listeners.
#[derive(Clone, Default)]
pub struct CancelSignal {
    inner: Arc<Inner>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Listeners run on the calling thread, once.
    pub fn cancel(&self) {
        if self.inner.fired.swap(true, Ordering::AcqRel) {
            return;
        }
        let listeners = std::mem::take(&mut *self.inner.listeners.lock());
        for (_, listener) in listeners {
            listener();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Register `listener`. If the signal already fired it runs
    /// immediately and `None` is returned.
    pub fn subscribe(&self, listener: impl FnOnce() + Send + 'static) -> Option<ListenerId> {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        {
            let mut listeners = self.inner.listeners.lock();
            // Checked under the lock so a concurrent `cancel` either sees this
            // listener or we see the flag.
            if !self.inner.fired.load(Ordering::Acquire) {
                listeners.push((id, Box::new(listener)));
                return Some(id);
            }
        }
        listener();
        None
    }

    /// Detach a listener. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: ListenerId) {
        self.inner.listeners.lock().retain(|(lid, _)| *lid != id);
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }
}

impl fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelSignal")
            .field("cancelled", &self.is_cancelled())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
