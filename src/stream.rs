//! Observers, subscriptions and the multicast delivery stream.

use crate::promise::{self, Promise, Resolver};
use crate::types::QueryError;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

type NextFn<T> = Arc<dyn Fn(&T) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&QueryError) + Send + Sync>;

/// Pair of callbacks receiving values and errors from a source.
pub struct Observer<T> {
    next: NextFn<T>,
    error: ErrorFn,
}

impl<T> Observer<T> {
    /// Observer with separate value and error callbacks.
    pub fn new<N, E>(next: N, error: E) -> Self
    where
        N: Fn(&T) + Send + Sync + 'static,
        E: Fn(&QueryError) + Send + Sync + 'static,
    {
        Self {
            next: Arc::new(next),
            error: Arc::new(error),
        }
    }

    /// Observer that ignores errors.
    pub fn from_next<N>(next: N) -> Self
    where
        N: Fn(&T) + Send + Sync + 'static,
    {
        Self::new(next, |_| {})
    }

    /// Deliver one value.
    pub fn next(&self, value: &T) {
        (self.next)(value)
    }

    /// Deliver an error.
    pub fn error(&self, error: &QueryError) {
        (self.error)(error)
    }
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        Self {
            next: self.next.clone(),
            error: self.error.clone(),
        }
    }
}

/// Handle for an active subscription.
///
/// Released only by an explicit [`Subscription::unsubscribe`]; dropping the
/// handle leaves the subscription in place.
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Subscription that runs `release` on the first `unsubscribe`.
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Subscription with nothing to release.
    pub fn closed() -> Self {
        Self { release: None }
    }

    /// Release the subscription. Calls after the first are no-ops.
    pub fn unsubscribe(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }

    /// True once released, or if there was nothing to release.
    pub fn is_closed(&self) -> bool {
        self.release.is_none()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A source that accepts any number of independent observers.
pub trait Multicast<T> {
    fn subscribe(&self, observer: Observer<T>) -> Subscription;
}

/// Most recent event seen by a stream, replayed to late subscribers.
enum Latest<T> {
    Next(T),
    Error(QueryError),
}

struct StreamInner<T> {
    observers: RwLock<HashMap<u64, Observer<T>>>,
    next_id: AtomicU64,
    latest: Mutex<Option<Latest<T>>>,
    closed: AtomicBool,
    promise: Promise<T>,
    resolver: Resolver<T>,
}

impl<T> StreamInner<T> {
    fn snapshot(&self) -> Vec<Observer<T>> {
        self.observers.read().values().cloned().collect()
    }
}

/// Multicast stream of chunks for one in-flight request.
///
/// A new observer first receives the most recent chunk (or the failure), then
/// every chunk pushed after it subscribes. The stream's own
/// [`promise`](DeliveryStream::promise) settles once: with the last chunk on
/// [`complete`](DeliveryStream::complete), or with the error on
/// [`fail`](DeliveryStream::fail).
pub struct DeliveryStream<T> {
    inner: Arc<StreamInner<T>>,
}

impl<T: Clone + Send + 'static> DeliveryStream<T> {
    /// Open stream with no chunks and no subscribers.
    pub fn new() -> Self {
        let (promise, resolver) = promise::pending();
        Self {
            inner: Arc::new(StreamInner {
                observers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                latest: Mutex::new(None),
                closed: AtomicBool::new(false),
                promise,
                resolver,
            }),
        }
    }

    /// Promise for the final chunk.
    pub fn promise(&self) -> Promise<T> {
        self.inner.promise.clone()
    }

    /// Deliver a chunk to every observer. Returns false once the stream has
    /// completed or failed.
    pub fn push(&self, chunk: T) -> bool {
        if self.is_closed() {
            return false;
        }
        *self.inner.latest.lock() = Some(Latest::Next(chunk.clone()));

        let observers = self.inner.snapshot();
        trace!(observers = observers.len(), "DeliveryStream::push");
        for observer in observers {
            observer.next(&chunk);
        }
        true
    }

    /// Mark the stream finished, settling the promise with the last chunk.
    pub fn complete(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let last = match &*self.inner.latest.lock() {
            Some(Latest::Next(chunk)) => Some(chunk.clone()),
            _ => None,
        };
        match last {
            Some(chunk) => self.inner.resolver.resolve(chunk),
            None => self.inner.resolver.reject(QueryError::empty_stream()),
        };
        self.inner.observers.write().clear();
    }

    /// Fail the stream, notifying observers and rejecting the promise.
    pub fn fail(&self, error: QueryError) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.inner.latest.lock() = Some(Latest::Error(error.clone()));
        let observers = self.inner.snapshot();
        for observer in observers {
            observer.error(&error);
        }
        self.inner.resolver.reject(error);
        self.inner.observers.write().clear();
    }

    /// True after `complete` or `fail`.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of live observers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.observers.read().len()
    }
}

impl<T: Clone + Send + 'static> Multicast<T> for DeliveryStream<T> {
    fn subscribe(&self, observer: Observer<T>) -> Subscription {
        let latest = match &*self.inner.latest.lock() {
            Some(Latest::Next(chunk)) => Some(Latest::Next(chunk.clone())),
            Some(Latest::Error(error)) => Some(Latest::Error(error.clone())),
            None => None,
        };
        match latest {
            Some(Latest::Next(chunk)) => observer.next(&chunk),
            Some(Latest::Error(error)) => observer.error(&error),
            None => {}
        }

        if self.is_closed() {
            return Subscription::closed();
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.observers.write().insert(id, observer);

        let weak: Weak<StreamInner<T>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.observers.write().remove(&id);
            }
        })
    }
}

impl<T: Clone + Send + 'static> Default for DeliveryStream<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for DeliveryStream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}
