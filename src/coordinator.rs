//! Coordinator between one live query and its listeners.

use crate::engine::QueryEngine;
use crate::error::{CoordinatorError, Result};
use crate::promise::{first_of, Promise};
use crate::registry::{Listener, ListenerRegistry, ListenerToken};
use crate::state::ResultCell;
use crate::stream::{Observer, Subscription};
use crate::types::{FetchMoreOptions, QueryError, QueryResult, Variables};
use crossbeam_channel::{bounded, Receiver, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Hook run once when a coordinator is disposed.
pub type DisposeHook = Box<dyn FnOnce() + Send>;

/// Coordinator configuration.
pub struct CoordinatorConfig {
    /// Label used in log output.
    /// Default: "query"
    pub name: String,

    /// Called exactly once from `dispose`.
    pub on_dispose: Option<DisposeHook>,
}

impl CoordinatorConfig {
    /// Set the label used in log output.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the hook run once by [`QueryCoordinator::dispose`].
    pub fn with_on_dispose<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_dispose = Some(Box::new(hook));
        self
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            name: "query".to_string(),
            on_dispose: None,
        }
    }
}

impl fmt::Debug for CoordinatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorConfig")
            .field("name", &self.name)
            .field("on_dispose", &self.on_dispose.is_some())
            .finish()
    }
}

/// State shared with the engine observer.
struct Inner {
    name: String,
    cell: RwLock<ResultCell>,
    listeners: ListenerRegistry<QueryResult>,
    disposed: AtomicBool,
}

impl Inner {
    fn on_next(&self, result: &QueryResult) {
        if self.disposed.load(Ordering::SeqCst) {
            trace!(query = %self.name, "on_next after dispose, ignored");
            return;
        }

        let delivered = {
            let mut cell = self.cell.write();
            if !cell.try_update(result.clone()) {
                trace!(query = %self.name, "duplicate result suppressed");
                return;
            }
            cell.current().clone()
        };

        self.fan_out(&delivered);
    }

    fn on_error(&self, error: &QueryError) {
        if self.disposed.load(Ordering::SeqCst) {
            trace!(query = %self.name, "on_error after dispose, ignored");
            return;
        }

        let delivered = self.cell.write().apply_error(error.clone()).clone();
        debug!(query = %self.name, %error, "query error folded into result");

        self.fan_out(&delivered);
    }

    fn fan_out(&self, result: &QueryResult) {
        let notified = self.listeners.notify_all(result);
        trace!(
            query = %self.name,
            listeners = notified,
            status = ?result.network_status,
            "result delivered"
        );
    }
}

/// Mediates between one running query and any number of listeners.
///
/// Tracks the latest result, suppresses duplicate deliveries, keeps settled
/// data from being blanked out by data-less results, and exposes a promise
/// for the next meaningful result.
pub struct QueryCoordinator {
    inner: Arc<Inner>,
    engine: Arc<dyn QueryEngine>,
    promise: Mutex<Promise<QueryResult>>,
    subscription: Mutex<Option<Subscription>>,
    on_dispose: Mutex<Option<DisposeHook>>,
}

impl QueryCoordinator {
    /// Wrap `engine`, subscribing to it immediately.
    ///
    /// Fails with [`CoordinatorError::MissingDeliveryStream`] if the engine
    /// has no delivery stream once subscribed.
    pub fn new(engine: Arc<dyn QueryEngine>, config: CoordinatorConfig) -> Result<Self> {
        let CoordinatorConfig { name, on_dispose } = config;

        let inner = Arc::new(Inner {
            name,
            cell: RwLock::new(ResultCell::new(engine.current_result())),
            listeners: ListenerRegistry::new(),
            disposed: AtomicBool::new(false),
        });

        let on_next: Weak<Inner> = Arc::downgrade(&inner);
        let on_error: Weak<Inner> = Arc::downgrade(&inner);
        let observer = Observer::new(
            move |result: &QueryResult| {
                if let Some(inner) = on_next.upgrade() {
                    inner.on_next(result);
                }
            },
            move |error: &QueryError| {
                if let Some(inner) = on_error.upgrade() {
                    inner.on_error(error);
                }
            },
        );
        let mut subscription = engine.subscribe(observer);

        let stream = match engine.delivery_stream() {
            Some(stream) => stream,
            None => {
                warn!(query = %inner.name, "engine has no delivery stream after subscribe");
                subscription.unsubscribe();
                return Err(CoordinatorError::MissingDeliveryStream(inner.name.clone()));
            }
        };

        let incremental = engine.is_incremental();
        let promise = if incremental {
            first_of(&stream)
        } else {
            stream.promise()
        };

        debug!(query = %inner.name, incremental, "QueryCoordinator::new: subscribed");

        Ok(Self {
            inner,
            engine,
            promise: Mutex::new(promise),
            subscription: Mutex::new(Some(subscription)),
            on_dispose: Mutex::new(on_dispose),
        })
    }

    /// Label from [`CoordinatorConfig::name`].
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Latest delivered result.
    pub fn result(&self) -> QueryResult {
        self.inner.cell.read().current().clone()
    }

    /// Promise for the next meaningful result.
    pub fn promise(&self) -> Promise<QueryResult> {
        self.promise.lock().clone()
    }

    /// Register a listener for every delivered result.
    ///
    /// Registering the same `Arc` again returns a handle to the existing
    /// registration.
    pub fn listen(&self, listener: Listener<QueryResult>) -> Unlisten {
        let token = self.inner.listeners.register(listener);
        trace!(query = %self.inner.name, ?token, "listener registered");
        Unlisten {
            inner: Arc::downgrade(&self.inner),
            token,
        }
    }

    /// Register a channel-backed listener with room for `buffer_size`
    /// undelivered results (at least one).
    ///
    /// A full buffer drops that one result and keeps the listener; the
    /// receiver catches up from the next delivery. Dropping the
    /// [`ResultChannel`] unregisters the listener on the next delivery.
    pub fn listen_channel(&self, buffer_size: usize) -> ResultChannel {
        let (sender, receiver) = bounded(buffer_size.max(1));
        let token_slot: Arc<OnceLock<ListenerToken>> = Arc::new(OnceLock::new());

        let weak = Arc::downgrade(&self.inner);
        let slot = token_slot.clone();
        let listener: Listener<QueryResult> = Arc::new(move |result: &QueryResult| {
            match sender.try_send(result.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    if let Some(inner) = weak.upgrade() {
                        warn!(
                            query = %inner.name,
                            token = ?slot.get(),
                            status = ?result.network_status,
                            "channel buffer full, result dropped"
                        );
                    }
                }
                Err(TrySendError::Disconnected(_)) => {
                    if let (Some(inner), Some(token)) = (weak.upgrade(), slot.get()) {
                        debug!(
                            query = %inner.name,
                            ?token,
                            "receiver dropped, removing channel listener"
                        );
                        inner.listeners.unregister(*token);
                    }
                }
            }
        });

        let unlisten = self.listen(listener);
        let _ = token_slot.set(unlisten.token);

        ResultChannel { receiver, unlisten }
    }

    /// Re-run the query. The returned promise becomes the public promise.
    pub fn refetch(&self, variables: Option<Variables>) -> Promise<QueryResult> {
        debug!(query = %self.inner.name, has_variables = variables.is_some(), "refetch");
        let promise = self.engine.refetch(variables);
        *self.promise.lock() = promise.clone();
        promise
    }

    /// Load more results. The returned promise becomes the public promise.
    pub fn fetch_more(&self, options: FetchMoreOptions) -> Promise<QueryResult> {
        debug!(query = %self.inner.name, "fetch_more");
        let promise = self.engine.fetch_more(options);
        *self.promise.lock() = promise.clone();
        promise
    }

    /// Release the engine subscription and run the dispose hook.
    ///
    /// Listeners stay registered but receive nothing further. Calling this
    /// more than once is a no-op.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            debug!(query = %self.inner.name, "dispose called twice");
            return;
        }

        let subscription = self.subscription.lock().take();
        if let Some(mut subscription) = subscription {
            subscription.unsubscribe();
        }

        let hook = self.on_dispose.lock().take();
        if let Some(hook) = hook {
            hook();
        }

        debug!(
            query = %self.inner.name,
            listeners = self.inner.listeners.len(),
            "QueryCoordinator::dispose"
        );
    }

    /// True once [`QueryCoordinator::dispose`] has run.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Number of registered listeners, channel listeners included.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }
}

impl fmt::Debug for QueryCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCoordinator")
            .field("name", &self.inner.name)
            .field("listeners", &self.inner.listeners.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Removes one listener registration.
///
/// Dropping the handle without calling [`Unlisten::unlisten`] keeps the
/// listener registered.
pub struct Unlisten {
    inner: Weak<Inner>,
    token: ListenerToken,
}

impl Unlisten {
    /// Unregister the listener. Returns false if it was already removed.
    pub fn unlisten(&self) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.listeners.unregister(self.token),
            None => false,
        }
    }

    /// Token of the registration this handle removes.
    pub fn token(&self) -> ListenerToken {
        self.token
    }

    /// True while the listener is still registered.
    pub fn is_active(&self) -> bool {
        self.inner
            .upgrade()
            .map(|inner| inner.listeners.contains(self.token))
            .unwrap_or(false)
    }
}

impl fmt::Debug for Unlisten {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unlisten").field("token", &self.token).finish()
    }
}

/// Listener that queues delivered results on a bounded channel.
pub struct ResultChannel {
    receiver: Receiver<QueryResult>,
    unlisten: Unlisten,
}

impl ResultChannel {
    /// Receive the next result (blocking).
    pub fn recv(&self) -> std::result::Result<QueryResult, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a result (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<QueryResult, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<QueryResult> {
        self.receiver.recv_timeout(timeout).map_err(|e| match e {
            crossbeam_channel::RecvTimeoutError::Timeout => CoordinatorError::Timeout(timeout),
            crossbeam_channel::RecvTimeoutError::Disconnected => CoordinatorError::Disconnected,
        })
    }

    /// Stop receiving. Already-queued results stay readable.
    pub fn close(&self) -> bool {
        self.unlisten.unlisten()
    }

    /// True while the channel listener is still registered.
    pub fn is_active(&self) -> bool {
        self.unlisten.is_active()
    }
}
