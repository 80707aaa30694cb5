//! Settle-once promises and the first-emission combinator.
//!
//! A [`Promise`] is a cloneable, shareable handle on a value that will be
//! produced once. Any number of threads may wait on it; the paired
//! [`Resolver`] settles it exactly once (later settle attempts are ignored).
//! Threads block with [`Promise::wait`]; async callers `.await` the promise
//! itself, which yields the same `Result<T>`.

use crate::error::{CoordinatorError, Result};
use crate::stream::{Multicast, Observer, Subscription};
use crate::types::QueryError;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

enum Settlement<T> {
    Pending,
    Fulfilled(T),
    Rejected(QueryError),
}

impl<T: Clone> Settlement<T> {
    fn outcome(&self) -> Option<Result<T>> {
        match self {
            Settlement::Pending => None,
            Settlement::Fulfilled(value) => Some(Ok(value.clone())),
            Settlement::Rejected(error) => Some(Err(CoordinatorError::Rejected(error.clone()))),
        }
    }
}

struct Shared<T> {
    state: Mutex<Settlement<T>>,
    settled: Condvar,
    wakers: Mutex<Vec<Waker>>,
}

impl<T> Shared<T> {
    fn settle(&self, settlement: Settlement<T>) -> bool {
        {
            let mut state = self.state.lock();
            if !matches!(*state, Settlement::Pending) {
                return false;
            }
            *state = settlement;
            self.settled.notify_all();
        }
        // Wake outside the state lock; a woken task polls straight back in.
        let wakers = std::mem::take(&mut *self.wakers.lock());
        for waker in wakers {
            waker.wake();
        }
        true
    }
}

/// Read side of a settle-once value.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

/// Write side of a [`Promise`].
pub struct Resolver<T> {
    shared: Arc<Shared<T>>,
}

/// Create an unsettled promise and its resolver.
pub fn pending<T>() -> (Promise<T>, Resolver<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(Settlement::Pending),
        settled: Condvar::new(),
        wakers: Mutex::new(Vec::new()),
    });
    (
        Promise {
            shared: shared.clone(),
        },
        Resolver { shared },
    )
}

impl<T> Promise<T> {
    /// Promise already fulfilled with `value`.
    pub fn resolved(value: T) -> Self {
        let (promise, resolver) = pending();
        resolver.resolve(value);
        promise
    }

    /// Promise already rejected with `error`.
    pub fn rejected(error: QueryError) -> Self {
        let (promise, resolver) = pending();
        resolver.reject(error);
        promise
    }

    /// True once fulfilled or rejected.
    pub fn is_settled(&self) -> bool {
        !matches!(*self.shared.state.lock(), Settlement::Pending)
    }

    /// True when both handles refer to the same underlying promise.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.shared, &b.shared)
    }
}

impl<T: Clone> Promise<T> {
    /// Current outcome without blocking (None while pending).
    pub fn peek(&self) -> Option<Result<T>> {
        self.shared.state.lock().outcome()
    }

    /// Block until settled.
    pub fn wait(&self) -> Result<T> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(outcome) = state.outcome() {
                return outcome;
            }
            self.shared.settled.wait(&mut state);
        }
    }

    /// Block until settled or until `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if let Some(outcome) = state.outcome() {
                return outcome;
            }
            if self
                .shared
                .settled
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state
                    .outcome()
                    .unwrap_or(Err(CoordinatorError::Timeout(timeout)));
            }
        }
    }
}

impl<T: Clone> Future for Promise<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(outcome) = self.peek() {
            return Poll::Ready(outcome);
        }

        {
            let mut wakers = self.shared.wakers.lock();
            if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                wakers.push(cx.waker().clone());
            }
        }

        // Settled between the first check and registering the waker
        match self.peek() {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Pending,
        }
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match *self.shared.state.lock() {
            Settlement::Pending => "pending",
            Settlement::Fulfilled(_) => "fulfilled",
            Settlement::Rejected(_) => "rejected",
        };
        write!(f, "Promise({})", state)
    }
}

impl<T> Resolver<T> {
    /// Fulfill the promise. Returns false if it was already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.shared.settle(Settlement::Fulfilled(value))
    }

    /// Reject the promise. Returns false if it was already settled.
    pub fn reject(&self, error: QueryError) -> bool {
        self.shared.settle(Settlement::Rejected(error))
    }

    /// True once either handle has settled the promise.
    pub fn is_settled(&self) -> bool {
        !matches!(*self.shared.state.lock(), Settlement::Pending)
    }
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

/// Promise settled by the first emission of a multicast source.
///
/// Subscribes a one-shot observer to `source`. The first `next` fulfills the
/// promise and releases the observer; an `error` before any emission rejects
/// it. Other subscribers of `source` keep receiving every emission.
pub fn first_of<T, S>(source: &S) -> Promise<T>
where
    T: Clone + Send + 'static,
    S: Multicast<T> + ?Sized,
{
    let (promise, resolver) = pending();
    let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

    let next_resolver = resolver.clone();
    let next_slot = slot.clone();
    let error_resolver = resolver.clone();
    let error_slot = slot.clone();

    let observer = Observer::new(
        move |value: &T| {
            if next_resolver.resolve(value.clone()) {
                if let Some(mut subscription) = next_slot.lock().take() {
                    subscription.unsubscribe();
                }
            }
        },
        move |error: &QueryError| {
            if error_resolver.reject(error.clone()) {
                if let Some(mut subscription) = error_slot.lock().take() {
                    subscription.unsubscribe();
                }
            }
        },
    );

    let mut subscription = source.subscribe(observer);
    let mut stored = slot.lock();
    if resolver.is_settled() {
        // Settled during subscribe (replay) or before the slot was filled.
        subscription.unsubscribe();
    } else {
        *stored = Some(subscription);
    }
    drop(stored);

    promise
}
