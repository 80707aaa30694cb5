//! Integration tests for the query coordinator.

use parking_lot::Mutex;
use query_coordinator::{
    promise, CoordinatorConfig, DeliveryStream, FetchMoreOptions, Listener, NetworkStatus,
    Observer, Promise, QueryCoordinator, QueryEngine, QueryError, QueryResult, Resolver,
    Subscription, Unlisten, Variables,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Engine double: the test pushes results through the observer it was given
/// and settles refetch / fetch-more promises by hand.
struct ScriptedEngine {
    initial: QueryResult,
    incremental: bool,
    observers: Mutex<Vec<Observer<QueryResult>>>,
    stream: DeliveryStream<QueryResult>,
    unsubscribes: Arc<AtomicUsize>,
    refetches: Mutex<Vec<(Option<Variables>, Resolver<QueryResult>)>>,
    fetch_mores: Mutex<Vec<(FetchMoreOptions, Resolver<QueryResult>)>>,
}

impl ScriptedEngine {
    fn new(initial: QueryResult) -> Arc<Self> {
        Self::build(initial, false)
    }

    fn incremental(initial: QueryResult) -> Arc<Self> {
        Self::build(initial, true)
    }

    fn build(initial: QueryResult, incremental: bool) -> Arc<Self> {
        Arc::new(Self {
            initial,
            incremental,
            observers: Mutex::new(Vec::new()),
            stream: DeliveryStream::new(),
            unsubscribes: Arc::new(AtomicUsize::new(0)),
            refetches: Mutex::new(Vec::new()),
            fetch_mores: Mutex::new(Vec::new()),
        })
    }

    /// Deliver to every observer ever registered, including unsubscribed ones.
    fn emit(&self, result: QueryResult) {
        let observers = self.observers.lock().clone();
        for observer in observers {
            observer.next(&result);
        }
    }

    fn emit_error(&self, error: QueryError) {
        let observers = self.observers.lock().clone();
        for observer in observers {
            observer.error(&error);
        }
    }

    /// Push a chunk on the in-flight stream and through the observers.
    fn chunk(&self, result: QueryResult) {
        self.stream.push(result.clone());
        self.emit(result);
    }

    fn last_refetch(&self) -> (Option<Variables>, Resolver<QueryResult>) {
        self.refetches.lock().last().cloned().unwrap()
    }
}

impl QueryEngine for ScriptedEngine {
    fn current_result(&self) -> QueryResult {
        self.initial.clone()
    }

    fn subscribe(&self, observer: Observer<QueryResult>) -> Subscription {
        self.observers.lock().push(observer);
        let unsubscribes = self.unsubscribes.clone();
        Subscription::new(move || {
            unsubscribes.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn delivery_stream(&self) -> Option<DeliveryStream<QueryResult>> {
        Some(self.stream.clone())
    }

    fn refetch(&self, variables: Option<Variables>) -> Promise<QueryResult> {
        let (promise, resolver) = promise::pending();
        self.refetches.lock().push((variables, resolver));
        promise
    }

    fn fetch_more(&self, options: FetchMoreOptions) -> Promise<QueryResult> {
        let (promise, resolver) = promise::pending();
        self.fetch_mores.lock().push((options, resolver));
        promise
    }

    fn is_incremental(&self) -> bool {
        self.incremental
    }
}

fn recording_listener() -> (Listener<QueryResult>, Arc<Mutex<Vec<QueryResult>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let listener: Listener<QueryResult> = Arc::new(move |result: &QueryResult| {
        sink.lock().push(result.clone());
    });
    (listener, seen)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn coordinator_for(engine: &Arc<ScriptedEngine>) -> QueryCoordinator {
    init_tracing();
    QueryCoordinator::new(engine.clone(), CoordinatorConfig::default()).unwrap()
}

// --- Delivery ---

#[test]
fn test_duplicate_results_delivered_once() {
    let engine = ScriptedEngine::new(QueryResult::loading());
    let coordinator = coordinator_for(&engine);
    let (listener, seen) = recording_listener();
    coordinator.listen(listener);

    engine.emit(QueryResult::ready(json!({"todos": [{"id": 1}]})));
    engine.emit(QueryResult::ready(json!({"todos": [{"id": 1}]})));

    assert_eq!(seen.lock().len(), 1);
    assert_eq!(coordinator.result().data, Some(json!({"todos": [{"id": 1}]})));
}

#[test]
fn test_settled_result_without_data_keeps_previous_data() {
    let loading_with_data = QueryResult {
        data: Some(json!({"user": {"name": "Ada"}})),
        ..QueryResult::loading()
    };
    let engine = ScriptedEngine::new(loading_with_data);
    let coordinator = coordinator_for(&engine);
    let (listener, seen) = recording_listener();
    coordinator.listen(listener);

    engine.emit(QueryResult::failed(QueryError::graphql("field error")));

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].data, Some(json!({"user": {"name": "Ada"}})));
    assert_eq!(seen[0].network_status, NetworkStatus::Error);
    assert_eq!(coordinator.result(), seen[0]);
}

#[test]
fn test_in_flight_result_without_data_is_delivered_as_is() {
    let engine = ScriptedEngine::new(QueryResult::ready(json!({"n": 1})));
    let coordinator = coordinator_for(&engine);

    engine.emit(QueryResult::loading().with_status(NetworkStatus::SetVariables));

    let result = coordinator.result();
    assert_eq!(result.data, None);
    assert_eq!(result.network_status, NetworkStatus::SetVariables);
}

#[test]
fn test_errors_always_delivered() {
    let engine = ScriptedEngine::new(QueryResult::ready(json!({"n": 1})));
    let coordinator = coordinator_for(&engine);
    let (listener, seen) = recording_listener();
    coordinator.listen(listener);

    let error = QueryError::network("503 Service Unavailable");
    engine.emit_error(error.clone());
    engine.emit_error(error.clone());

    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], seen[1]);
    assert_eq!(seen[1].error, Some(error));
    assert_eq!(seen[1].data, Some(json!({"n": 1})));
    assert_eq!(seen[1].network_status, NetworkStatus::Error);
}

#[test]
fn test_recovery_after_error() {
    let engine = ScriptedEngine::new(QueryResult::loading());
    let coordinator = coordinator_for(&engine);

    engine.emit_error(QueryError::network("offline"));
    assert!(coordinator.result().error.is_some());

    engine.emit(QueryResult::ready(json!({"n": 2})));
    let result = coordinator.result();
    assert_eq!(result.error, None);
    assert_eq!(result.network_status, NetworkStatus::Ready);
}

// --- Promises ---

#[test]
fn test_incremental_promise_resolves_on_first_chunk() {
    let engine = ScriptedEngine::incremental(QueryResult::loading());
    let coordinator = coordinator_for(&engine);
    let (listener, seen) = recording_listener();
    coordinator.listen(listener);

    let first = QueryResult::ready(json!({"me": {"id": 1}})).with_partial(true);
    engine.chunk(first.clone());

    // Resolved before the second chunk exists
    let resolved = coordinator
        .promise()
        .wait_timeout(Duration::from_millis(100))
        .unwrap();
    assert_eq!(resolved, first);

    let second = QueryResult::ready(json!({"me": {"id": 1, "friends": []}}));
    engine.chunk(second.clone());
    engine.stream.complete();

    assert_eq!(coordinator.promise().wait().unwrap(), first);
    assert_eq!(*seen.lock(), vec![first, second]);
}

#[test]
fn test_incremental_promise_rejects_on_stream_error() {
    let engine = ScriptedEngine::incremental(QueryResult::loading());
    let coordinator = coordinator_for(&engine);
    let (listener, seen) = recording_listener();
    coordinator.listen(listener);

    engine.stream.fail(QueryError::network("stream reset"));
    assert!(coordinator.promise().wait().is_err());

    // Listener path is independent of the stream rejection
    engine.emit(QueryResult::ready(json!({"n": 1})));
    assert_eq!(seen.lock().len(), 1);
}

#[test]
fn test_plain_promise_waits_for_completion() {
    let engine = ScriptedEngine::new(QueryResult::loading());
    let coordinator = coordinator_for(&engine);

    engine.chunk(QueryResult::ready(json!({"page": 1})).with_partial(true));
    assert!(!coordinator.promise().is_settled());

    engine.chunk(QueryResult::ready(json!({"page": 2})));
    engine.stream.complete();
    assert_eq!(
        coordinator.promise().wait().unwrap().data,
        Some(json!({"page": 2}))
    );
}

#[test]
fn test_promise_waited_from_another_thread() {
    let engine = ScriptedEngine::incremental(QueryResult::loading());
    let coordinator = coordinator_for(&engine);
    let promise = coordinator.promise();

    let waiter = thread::spawn(move || promise.wait_timeout(Duration::from_secs(5)));
    thread::sleep(Duration::from_millis(10));
    engine.chunk(QueryResult::ready(json!({"n": 1})));

    assert_eq!(waiter.join().unwrap().unwrap().data, Some(json!({"n": 1})));
}

#[test]
fn test_refetch_swaps_promise() {
    let engine = ScriptedEngine::new(QueryResult::ready(json!({"n": 1})));
    let coordinator = coordinator_for(&engine);
    let (listener, seen) = recording_listener();
    coordinator.listen(listener);
    let before = coordinator.promise();

    let mut variables = Variables::new();
    variables.insert("id".to_string(), json!(2));
    let returned = coordinator.refetch(Some(variables.clone()));

    assert!(!Promise::ptr_eq(&before, &coordinator.promise()));
    assert!(Promise::ptr_eq(&returned, &coordinator.promise()));

    let (passed, resolver) = engine.last_refetch();
    assert_eq!(passed, Some(variables));

    let refetched = QueryResult::ready(json!({"n": 2}));
    engine.emit(refetched.clone());
    resolver.resolve(refetched.clone());

    assert_eq!(coordinator.promise().wait().unwrap(), refetched);
    assert_eq!(seen.lock().last(), Some(&refetched));
}

#[test]
fn test_fetch_more_last_promise_wins() {
    let engine = ScriptedEngine::new(QueryResult::ready(json!({"items": [1]})));
    let coordinator = coordinator_for(&engine);

    let first = coordinator.fetch_more(FetchMoreOptions::default());
    let mut variables = Variables::new();
    variables.insert("offset".to_string(), json!(10));
    let second = coordinator.fetch_more(FetchMoreOptions::variables(variables));

    assert!(!Promise::ptr_eq(&first, &second));
    assert!(Promise::ptr_eq(&second, &coordinator.promise()));
    assert_eq!(engine.fetch_mores.lock().len(), 2);
}

// --- Listeners ---

#[test]
fn test_unlisten_stops_delivery() {
    let engine = ScriptedEngine::new(QueryResult::loading());
    let coordinator = coordinator_for(&engine);
    let (listener, seen) = recording_listener();

    let unlisten = coordinator.listen(listener);
    engine.emit(QueryResult::ready(json!({"n": 1})));

    assert!(unlisten.unlisten());
    assert!(!unlisten.unlisten());
    engine.emit(QueryResult::ready(json!({"n": 2})));

    assert_eq!(seen.lock().len(), 1);
    assert_eq!(coordinator.listener_count(), 0);
}

#[test]
fn test_same_listener_invoked_once_per_result() {
    let engine = ScriptedEngine::new(QueryResult::loading());
    let coordinator = coordinator_for(&engine);
    let (listener, seen) = recording_listener();

    let a = coordinator.listen(listener.clone());
    let b = coordinator.listen(listener);
    assert_eq!(a.token(), b.token());

    engine.emit(QueryResult::ready(json!({"n": 1})));
    assert_eq!(seen.lock().len(), 1);
}

#[test]
fn test_listener_can_unlisten_itself() {
    let engine = ScriptedEngine::new(QueryResult::loading());
    let coordinator = coordinator_for(&engine);
    let calls = Arc::new(AtomicUsize::new(0));

    let handle: Arc<Mutex<Option<Unlisten>>> = Arc::new(Mutex::new(None));
    let inner_handle = handle.clone();
    let inner_calls = calls.clone();
    let unlisten = coordinator.listen(Arc::new(move |_: &QueryResult| {
        inner_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(unlisten) = inner_handle.lock().take() {
            unlisten.unlisten();
        }
    }));
    *handle.lock() = Some(unlisten);

    engine.emit(QueryResult::ready(json!({"n": 1})));
    engine.emit(QueryResult::ready(json!({"n": 2})));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_channel_listener_receives_results() {
    let engine = ScriptedEngine::new(QueryResult::loading());
    let coordinator = coordinator_for(&engine);
    let channel = coordinator.listen_channel(8);

    engine.emit(QueryResult::ready(json!({"n": 1})));
    engine.emit_error(QueryError::network("down"));

    let first = channel.recv_timeout(Duration::from_millis(100)).unwrap();
    assert_eq!(first.data, Some(json!({"n": 1})));
    let second = channel.recv_timeout(Duration::from_millis(100)).unwrap();
    assert_eq!(second.network_status, NetworkStatus::Error);
    assert!(channel.try_recv().is_err());
}

#[test]
fn test_full_channel_keeps_listener() {
    let engine = ScriptedEngine::new(QueryResult::loading());
    let coordinator = coordinator_for(&engine);
    let channel = coordinator.listen_channel(1);

    engine.emit(QueryResult::ready(json!({"n": 1})));
    // Buffer full: this one is dropped, the listener stays
    engine.emit(QueryResult::ready(json!({"n": 2})));
    assert!(channel.is_active());
    assert_eq!(coordinator.listener_count(), 1);

    assert_eq!(channel.recv().unwrap().data, Some(json!({"n": 1})));

    // Caught up: later deliveries arrive again
    engine.emit(QueryResult::ready(json!({"n": 3})));
    let third = channel.recv_timeout(Duration::from_millis(100)).unwrap();
    assert_eq!(third.data, Some(json!({"n": 3})));
    assert!(channel.try_recv().is_err());
}

#[test]
fn test_zero_buffer_channel_holds_one_result() {
    let engine = ScriptedEngine::new(QueryResult::loading());
    let coordinator = coordinator_for(&engine);
    let channel = coordinator.listen_channel(0);

    engine.emit(QueryResult::ready(json!({"n": 1})));

    assert!(channel.is_active());
    assert_eq!(channel.try_recv().unwrap().data, Some(json!({"n": 1})));
}

#[test]
fn test_dropped_channel_unregisters_on_next_delivery() {
    let engine = ScriptedEngine::new(QueryResult::loading());
    let coordinator = coordinator_for(&engine);
    let channel = coordinator.listen_channel(4);
    assert_eq!(coordinator.listener_count(), 1);

    drop(channel);
    engine.emit(QueryResult::ready(json!({"n": 1})));

    assert_eq!(coordinator.listener_count(), 0);
}

#[test]
fn test_closed_channel_disconnects() {
    let engine = ScriptedEngine::new(QueryResult::loading());
    let coordinator = coordinator_for(&engine);
    let channel = coordinator.listen_channel(4);

    assert!(channel.close());
    assert!(!channel.close());
    engine.emit(QueryResult::ready(json!({"n": 1})));

    assert!(channel.recv().is_err());
}

// --- Disposal ---

#[test]
fn test_dispose_halts_delivery() {
    let engine = ScriptedEngine::new(QueryResult::loading());
    let disposed = Arc::new(AtomicUsize::new(0));
    let hook = disposed.clone();
    let coordinator = QueryCoordinator::new(
        engine.clone(),
        CoordinatorConfig::default()
            .with_name("todos")
            .with_on_dispose(move || {
                hook.fetch_add(1, Ordering::SeqCst);
            }),
    )
    .unwrap();
    let (listener, seen) = recording_listener();
    coordinator.listen(listener);

    coordinator.dispose();
    assert_eq!(engine.unsubscribes.load(Ordering::SeqCst), 1);
    assert_eq!(disposed.load(Ordering::SeqCst), 1);

    // Engine keeps the stale observer around and fires it anyway
    engine.emit(QueryResult::ready(json!({"n": 1})));
    engine.emit_error(QueryError::network("late"));

    assert!(seen.lock().is_empty());
    assert_eq!(coordinator.result(), QueryResult::loading());
    // Listener set is left to the caller
    assert_eq!(coordinator.listener_count(), 1);

    coordinator.dispose();
    assert_eq!(engine.unsubscribes.load(Ordering::SeqCst), 1);
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_many_listeners_each_notified_once() {
    let engine = ScriptedEngine::new(QueryResult::loading());
    let coordinator = coordinator_for(&engine);

    let recorders: Vec<_> = (0..16).map(|_| recording_listener()).collect();
    for (listener, _) in &recorders {
        coordinator.listen(listener.clone());
    }

    engine.emit(QueryResult::ready(json!({"n": 1})));
    engine.emit(QueryResult::ready(json!({"n": 1})));
    engine.emit(QueryResult::ready(json!({"n": 2})));

    for (_, seen) in &recorders {
        assert_eq!(seen.lock().len(), 2);
    }
}
