//! Listener registry for fanning values out to callbacks.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callback invoked with each delivered value.
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Identifies one registration in a [`ListenerRegistry`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(pub u64);

impl fmt::Debug for ListenerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListenerToken({})", self.0)
    }
}

/// Set of listeners keyed by token.
///
/// A listener is identified by its `Arc` allocation: registering the same
/// `Arc` twice returns the existing token. Notification runs on a snapshot
/// of the set taken under the lock, so listeners may register or unregister
/// from inside their callback.
pub struct ListenerRegistry<T> {
    listeners: RwLock<HashMap<ListenerToken, Listener<T>>>,
    next_token: AtomicU64,
}

fn same_listener<T>(a: &Listener<T>, b: &Listener<T>) -> bool {
    // Compare data pointers only; vtable pointers may differ across codegen units.
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl<T> ListenerRegistry<T> {
    /// Empty registry; tokens start at 1.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Register a listener, returning its token.
    pub fn register(&self, listener: Listener<T>) -> ListenerToken {
        let mut listeners = self.listeners.write();
        if let Some((token, _)) = listeners
            .iter()
            .find(|(_, existing)| same_listener(existing, &listener))
        {
            return *token;
        }

        let token = ListenerToken(self.next_token.fetch_add(1, Ordering::SeqCst));
        listeners.insert(token, listener);
        token
    }

    /// Remove a registration. Returns false if the token was not registered.
    pub fn unregister(&self, token: ListenerToken) -> bool {
        self.listeners.write().remove(&token).is_some()
    }

    /// True while `token` is registered.
    pub fn contains(&self, token: ListenerToken) -> bool {
        self.listeners.read().contains_key(&token)
    }

    /// Invoke every registered listener once with `value`.
    /// Returns the number of listeners invoked.
    pub fn notify_all(&self, value: &T) -> usize {
        let snapshot: Vec<Listener<T>> = self.listeners.read().values().cloned().collect();
        for listener in &snapshot {
            listener(value);
        }
        snapshot.len()
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }
}

impl<T> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
