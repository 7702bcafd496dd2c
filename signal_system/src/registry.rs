//! Subscription registry
//!
//! Keeps at most one upstream change channel per query signature. Every
//! caller subscribing to the same signature becomes a listener on the shared
//! registration; the upstream channel is torn down once the last listener
//! leaves.

use parking_lot::{Mutex, ReentrantMutex};
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::event::ChangeEvent;

/// Callback invoked for every change delivered on a subscription
pub type ChangeCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Closes the upstream side of a registration; runs exactly once
pub type Teardown = Box<dyn FnOnce() + Send>;

struct Listener {
    id: u64,
    callback: ChangeCallback,
    // Held for the whole callback invocation, so releasing a listener waits
    // for a running callback. Reentrant so a callback may unsubscribe itself.
    active: ReentrantMutex<Cell<bool>>,
}

impl Listener {
    fn deliver(&self, event: &ChangeEvent) -> bool {
        let state = self.active.lock();
        if !state.get() {
            return false;
        }
        (self.callback)(event);
        true
    }

    fn deactivate(&self) {
        self.active.lock().set(false);
    }
}

/// One live upstream subscription and the listeners sharing it
pub struct Registration {
    signature: String,
    table: String,
    listeners: Mutex<Vec<Arc<Listener>>>,
    teardown: Mutex<Option<Teardown>>,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("signature", &self.signature)
            .field("table", &self.table)
            .field("listener_count", &self.listener_count())
            .finish()
    }
}

impl Registration {
    pub fn new(signature: impl Into<String>, table: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            signature: signature.into(),
            table: table.into(),
            listeners: Mutex::new(Vec::new()),
            teardown: Mutex::new(None),
        })
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Deliver an event to every active listener, returning how many received it
    pub fn dispatch(&self, event: &ChangeEvent) -> usize {
        let listeners: Vec<Arc<Listener>> = self.listeners.lock().clone();
        listeners
            .iter()
            .filter(|listener| listener.deliver(event))
            .count()
    }

    fn run_teardown(&self) {
        let teardown = self.teardown.lock().take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }
}

/// Snapshot of registry state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub active_subscriptions: usize,
    pub listeners: usize,
    pub duplicates_blocked: u64,
}

struct RegistryInner {
    entries: Mutex<HashMap<String, Arc<Registration>>>,
    next_listener_id: AtomicU64,
    duplicates_blocked: AtomicU64,
}

/// Signature-keyed registry of upstream change subscriptions
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entries: Mutex::new(HashMap::new()),
                next_listener_id: AtomicU64::new(1),
                duplicates_blocked: AtomicU64::new(0),
            }),
        }
    }

    /// Join an existing registration for `signature`, if there is one.
    ///
    /// Returns `None` when the caller has to open the upstream channel itself
    /// and hand it over through [`install`](Self::install).
    pub fn attach(&self, signature: &str, callback: ChangeCallback) -> Option<SubscriptionHandle> {
        let entries = self.inner.entries.lock();
        let registration = entries.get(signature)?.clone();
        let handle = self.add_listener(&registration, callback);
        drop(entries);

        self.note_duplicate(signature);
        Some(handle)
    }

    /// Register a freshly opened upstream channel.
    ///
    /// If another caller registered the same signature while this one was
    /// opening its channel, the redundant channel is torn down and the
    /// callback joins the existing registration instead.
    pub fn install(
        &self,
        registration: Arc<Registration>,
        callback: ChangeCallback,
        teardown: Teardown,
    ) -> SubscriptionHandle {
        let mut entries = self.inner.entries.lock();

        if let Some(existing) = entries.get(registration.signature()).cloned() {
            let handle = self.add_listener(&existing, callback);
            drop(entries);

            teardown();
            self.note_duplicate(registration.signature());
            return handle;
        }

        *registration.teardown.lock() = Some(teardown);
        let handle = self.add_listener(&registration, callback);
        entries.insert(registration.signature().to_string(), registration);
        handle
    }

    /// Whether a live registration exists for `signature`
    pub fn contains(&self, signature: &str) -> bool {
        self.inner.entries.lock().contains_key(signature)
    }

    /// Tear down every registration; used at shutdown
    pub fn close_all(&self) -> usize {
        let drained: Vec<Arc<Registration>> =
            self.inner.entries.lock().drain().map(|(_, r)| r).collect();

        for registration in &drained {
            let listeners: Vec<Arc<Listener>> = registration.listeners.lock().drain(..).collect();
            for listener in listeners {
                listener.deactivate();
            }
            registration.run_teardown();
        }

        drained.len()
    }

    pub fn stats(&self) -> RegistryStats {
        let entries = self.inner.entries.lock();
        RegistryStats {
            active_subscriptions: entries.len(),
            listeners: entries.values().map(|r| r.listener_count()).sum(),
            duplicates_blocked: self.inner.duplicates_blocked.load(Ordering::Relaxed),
        }
    }

    fn note_duplicate(&self, signature: &str) {
        self.inner.duplicates_blocked.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            signature = %signature,
            "duplicate subscription, sharing the existing upstream channel"
        );
    }

    fn add_listener(
        &self,
        registration: &Arc<Registration>,
        callback: ChangeCallback,
    ) -> SubscriptionHandle {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        registration.listeners.lock().push(Arc::new(Listener {
            id,
            callback,
            active: ReentrantMutex::new(Cell::new(true)),
        }));

        SubscriptionHandle {
            signature: registration.signature().to_string(),
            listener_id: id,
            registration: Arc::downgrade(registration),
            registry: Arc::downgrade(&self.inner),
            released: AtomicBool::new(false),
        }
    }
}

fn release(inner: &RegistryInner, registration: &Arc<Registration>, listener_id: u64) {
    let (listener, last) = {
        let mut entries = inner.entries.lock();
        let mut listeners = registration.listeners.lock();

        let listener = listeners
            .iter()
            .position(|l| l.id == listener_id)
            .map(|index| listeners.remove(index));

        let last = listener.is_some() && listeners.is_empty();
        if last {
            let registered = entries
                .get(registration.signature())
                .is_some_and(|current| Arc::ptr_eq(current, registration));
            if registered {
                entries.remove(registration.signature());
            }
        }
        (listener, last)
    };

    // Outside the registry locks: waits for an in-flight delivery to this listener
    if let Some(listener) = listener {
        listener.deactivate();
    }

    if last {
        registration.run_teardown();
    }
}

/// Caller's handle on a subscription
///
/// Unsubscribing is idempotent. Once [`unsubscribe`](Self::unsubscribe)
/// returns, the callback is never invoked again. Dropping the handle
/// unsubscribes.
pub struct SubscriptionHandle {
    signature: String,
    listener_id: u64,
    registration: Weak<Registration>,
    registry: Weak<RegistryInner>,
    released: AtomicBool,
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("signature", &self.signature)
            .field("listener_id", &self.listener_id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl SubscriptionHandle {
    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn is_active(&self) -> bool {
        !self.released.load(Ordering::Acquire) && self.registration.strong_count() > 0
    }

    /// Release this listener, closing the upstream channel if it was the last.
    ///
    /// Blocks until an in-flight delivery to this listener returns. Callbacks
    /// run on the delivery task and must stay short; hand slow work off to a
    /// channel or a spawned task.
    pub fn unsubscribe(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }

        if let (Some(registration), Some(registry)) =
            (self.registration.upgrade(), self.registry.upgrade())
        {
            release(&registry, &registration, self.listener_id);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use std::sync::atomic::AtomicUsize;

    fn counting_callback(counter: &Arc<AtomicUsize>) -> ChangeCallback {
        let counter = counter.clone();
        Arc::new(move |_event: &ChangeEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn counting_teardown(counter: &Arc<AtomicUsize>) -> Teardown {
        let counter = counter.clone();
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn event() -> ChangeEvent {
        ChangeEvent::new(EventType::Insert, "crew")
    }

    #[test]
    fn test_attach_without_registration_returns_none() {
        let registry = SubscriptionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        assert!(registry.attach("sig", counting_callback(&calls)).is_none());
        assert_eq!(registry.stats(), RegistryStats::default());
    }

    #[test]
    fn test_duplicate_subscribers_share_registration() {
        let registry = SubscriptionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));

        let registration = Registration::new("sig", "crew");
        let first = registry.install(
            registration.clone(),
            counting_callback(&calls),
            counting_teardown(&closed),
        );
        let second = registry.attach("sig", counting_callback(&calls)).unwrap();

        let stats = registry.stats();
        assert_eq!(stats.active_subscriptions, 1);
        assert_eq!(stats.listeners, 2);
        assert_eq!(stats.duplicates_blocked, 1);

        assert_eq!(registration.dispatch(&event()), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        first.unsubscribe();
        assert_eq!(closed.load(Ordering::SeqCst), 0);
        assert!(registry.contains("sig"));

        second.unsubscribe();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(!registry.contains("sig"));
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));

        let handle = registry.install(
            Registration::new("sig", "crew"),
            counting_callback(&calls),
            counting_teardown(&closed),
        );

        handle.unsubscribe();
        handle.unsubscribe();
        assert!(!handle.is_active());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropping_handle_releases_listener() {
        let registry = SubscriptionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));

        let registration = Registration::new("sig", "crew");
        let first = registry.install(
            registration.clone(),
            counting_callback(&calls),
            counting_teardown(&closed),
        );
        let second = registry.attach("sig", counting_callback(&calls)).unwrap();

        drop(first);
        assert_eq!(registry.stats().listeners, 1);
        assert_eq!(closed.load(Ordering::SeqCst), 0);

        drop(second);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(!registry.contains("sig"));
        assert_eq!(registration.dispatch(&event()), 0);
    }

    #[test]
    fn test_no_delivery_after_unsubscribe() {
        let registry = SubscriptionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));

        let registration = Registration::new("sig", "crew");
        let handle = registry.install(
            registration.clone(),
            counting_callback(&calls),
            counting_teardown(&closed),
        );

        handle.unsubscribe();
        assert_eq!(registration.dispatch(&event()), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_callback_can_unsubscribe_itself() {
        let registry = SubscriptionRegistry::new();
        let closed = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));

        let callback_slot = slot.clone();
        let callback: ChangeCallback = Arc::new(move |_event: &ChangeEvent| {
            if let Some(handle) = callback_slot.lock().as_ref() {
                handle.unsubscribe();
            }
        });

        let registration = Registration::new("sig", "crew");
        let handle = registry.install(registration.clone(), callback, counting_teardown(&closed));
        *slot.lock() = Some(handle);

        assert_eq!(registration.dispatch(&event()), 1);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(registration.dispatch(&event()), 0);
    }

    #[test]
    fn test_install_race_tears_down_redundant_channel() {
        let registry = SubscriptionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let first_closed = Arc::new(AtomicUsize::new(0));
        let second_closed = Arc::new(AtomicUsize::new(0));

        let _first = registry.install(
            Registration::new("sig", "crew"),
            counting_callback(&calls),
            counting_teardown(&first_closed),
        );
        let _second = registry.install(
            Registration::new("sig", "crew"),
            counting_callback(&calls),
            counting_teardown(&second_closed),
        );

        assert_eq!(first_closed.load(Ordering::SeqCst), 0);
        assert_eq!(second_closed.load(Ordering::SeqCst), 1);
        assert_eq!(registry.stats().active_subscriptions, 1);
        assert_eq!(registry.stats().listeners, 2);
    }

    #[test]
    fn test_close_all() {
        let registry = SubscriptionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));

        let handle = registry.install(
            Registration::new("a", "crew"),
            counting_callback(&calls),
            counting_teardown(&closed),
        );
        let _other = registry.install(
            Registration::new("b", "equipment"),
            counting_callback(&calls),
            counting_teardown(&closed),
        );

        assert_eq!(registry.close_all(), 2);
        assert_eq!(closed.load(Ordering::SeqCst), 2);
        assert!(!handle.is_active());

        // Releasing after shutdown is a no-op
        handle.unsubscribe();
        assert_eq!(closed.load(Ordering::SeqCst), 2);
    }
}
