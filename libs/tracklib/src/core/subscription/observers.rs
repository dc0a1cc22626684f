//! Observer sets fed by subscription streams.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Callback registered on an [`ObserverSet`].
pub type Observer<T> = Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;

/// Identifies one observer within its set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Observers of one stream's values.
///
/// Each observer runs in isolation: an error or panic in one is logged and
/// the remaining observers still see the value.
pub struct ObserverSet<T> {
    observers: Mutex<Vec<(ObserverId, Observer<T>)>>,
    next_id: AtomicU64,
}

impl<T> ObserverSet<T> {
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.lock().push((id, Arc::new(observer)));
        id
    }

    /// Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Whether anyone is observing.
    pub fn is_used(&self) -> bool {
        !self.observers.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        !self.is_used()
    }

    /// Deliver `value` to every observer. Returns how many succeeded.
    pub fn notify(&self, value: &T) -> usize {
        self.notify_while(value, || true)
    }

    /// Deliver `value`, checking `keep_going` before each observer so a
    /// concurrent unsubscribe cuts delivery short.
    pub(crate) fn notify_while(&self, value: &T, keep_going: impl Fn() -> bool) -> usize {
        // Snapshot so observers can (un)subscribe from inside their callback.
        let snapshot: Vec<_> = self.observers.lock().clone();
        let mut delivered = 0;
        for (id, observer) in snapshot {
            if !keep_going() {
                break;
            }
            match catch_unwind(AssertUnwindSafe(|| observer(value))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => tracing::error!("Observer {:?} failed: {:#}", id, e),
                Err(_) => tracing::error!("Observer {:?} panicked", id),
            }
        }
        delivered
    }
}

impl<T> Default for ObserverSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ObserverSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverSet")
            .field("observers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_failing_observer_does_not_block_others() {
        let set = ObserverSet::<u32>::new();
        let seen = Arc::new(AtomicUsize::new(0));

        set.subscribe(|_| anyhow::bail!("bad observer"));
        set.subscribe(|_| panic!("worse observer"));
        let counter = Arc::clone(&seen);
        set.subscribe(move |value| {
            counter.fetch_add(*value as usize, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(set.notify(&5), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_unsubscribe() {
        let set = ObserverSet::<()>::new();
        assert!(!set.is_used());
        let id = set.subscribe(|_| Ok(()));
        assert!(set.is_used());
        assert!(set.unsubscribe(id));
        assert!(!set.unsubscribe(id));
        assert!(set.is_empty());
    }

    #[test]
    fn test_notify_while_stops_early() {
        let set = ObserverSet::<()>::new();
        set.subscribe(|_| Ok(()));
        set.subscribe(|_| Ok(()));
        assert_eq!(set.notify_while(&(), || false), 0);
    }

    #[test]
    fn test_observer_may_unsubscribe_itself() {
        let set = Arc::new(ObserverSet::<()>::new());
        let slot: Arc<Mutex<Option<ObserverId>>> = Arc::new(Mutex::new(None));
        let (weak, slot_in) = (Arc::downgrade(&set), Arc::clone(&slot));
        let id = set.subscribe(move |_| {
            if let (Some(set), Some(id)) = (weak.upgrade(), *slot_in.lock()) {
                set.unsubscribe(id);
            }
            Ok(())
        });
        *slot.lock() = Some(id);
        assert_eq!(set.notify(&()), 1);
        assert!(!set.is_used());
    }
}
