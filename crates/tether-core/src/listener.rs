//! Concurrency-safe listener registry.

use std::sync::Arc;

use parking_lot::RwLock;

/// Ordered set of listeners of one capability.
///
/// Registration is by `Arc` identity: adding the same `Arc` twice is a no-op
/// and `remove` matches by pointer. Iteration works on a snapshot, so
/// listeners may add or remove registrations while being invoked.
pub struct ListenerContainer<L: ?Sized> {
    listeners: RwLock<Vec<Arc<L>>>,
}

impl<L: ?Sized> Default for ListenerContainer<L> {
    fn default() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }
}

impl<L: ?Sized> std::fmt::Debug for ListenerContainer<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerContainer").field("len", &self.len()).finish()
    }
}

fn same<L: ?Sized>(a: &Arc<L>, b: &Arc<L>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

impl<L: ?Sized> ListenerContainer<L> {
    /// Create an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Returns false if it was already registered.
    pub fn add(&self, listener: Arc<L>) -> bool {
        let mut listeners = self.listeners.write();
        if listeners.iter().any(|existing| same(existing, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Deregister a listener. Returns false if it was not registered.
    pub fn remove(&self, listener: &Arc<L>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|existing| !same(existing, listener));
        listeners.len() != before
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Returns true if no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Remove every listener.
    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    /// Stable copy of the current registrations.
    pub fn snapshot(&self) -> Vec<Arc<L>> {
        self.listeners.read().clone()
    }

    /// Invoke `f` for every listener registered at the time of the call.
    ///
    /// The lock is released before the first invocation.
    pub fn for_each(&self, mut f: impl FnMut(&L)) {
        for listener in self.snapshot() {
            f(&listener);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use super::*;

    trait Probe: Send + Sync {
        fn hit(&self);
    }

    struct Counter(AtomicUsize);

    impl Probe for Counter {
        fn hit(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn add_is_idempotent_per_arc() {
        let container: ListenerContainer<dyn Probe> = ListenerContainer::new();
        let probe: Arc<dyn Probe> = Arc::new(Counter(AtomicUsize::new(0)));
        assert!(container.add(probe.clone()));
        assert!(!container.add(probe.clone()));
        assert_eq!(container.len(), 1);
        assert!(container.remove(&probe));
        assert!(!container.remove(&probe));
        assert!(container.is_empty());
    }

    #[test]
    fn for_each_visits_every_listener() {
        let container: ListenerContainer<dyn Probe> = ListenerContainer::new();
        let a = Arc::new(Counter(AtomicUsize::new(0)));
        let b = Arc::new(Counter(AtomicUsize::new(0)));
        container.add(a.clone());
        container.add(b.clone());
        container.for_each(|l| l.hit());
        assert_eq!(a.0.load(Ordering::SeqCst), 1);
        assert_eq!(b.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_may_mutate_container_during_iteration() {
        let container: Arc<ListenerContainer<dyn Probe>> = Arc::new(ListenerContainer::new());
        let a: Arc<dyn Probe> = Arc::new(Counter(AtomicUsize::new(0)));
        container.add(a.clone());
        container.for_each(|_| {
            container.remove(&a);
        });
        assert!(container.is_empty());
    }
}
