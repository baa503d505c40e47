//! Calling side of the protocol
//!
//! [`RpcClient::call`] validates the request, registers a waiter keyed by
//! `(call name, id)`, publishes the envelope and hands back a
//! [`PendingCall`]. Awaiting it yields the reply, a remote failure or a
//! timeout. Dropping it abandons the call; a reply that shows up later is
//! logged and discarded.
//!
//! ```ignore
//! let client = RpcClient::new(&bus, RpcConfig::default());
//! client.initialized().await;
//! let metar = client.call::<GetMetar>(IcaoRequest::new("KJFK"))?.await?;
//! ```

use efb_core::{EventBus, ReadOnly, Subject, Subscription};
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::cell::RefCell;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::marker::PhantomData;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::config::RpcConfig;
use crate::error::RpcError;
use crate::protocol::{response_topic, CallId, Envelope, Reply, RpcCall, Validate, INITIALIZED_TOPIC};

type WaiterKey = (&'static str, CallId);

struct ClientInner {
    bus: EventBus,
    config: RpcConfig,
    pending: RefCell<FxHashMap<WaiterKey, oneshot::Sender<Value>>>,
    /// One reply listener per call kind, installed on first use
    listeners: RefCell<FxHashMap<&'static str, Subscription>>,
    initialized: Subject<bool>,
    handshake: RefCell<Option<Subscription>>,
}

impl ClientInner {
    fn resolve(&self, call: &'static str, raw: &str) {
        let envelope: Envelope<Value> = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(call, %err, "malformed reply envelope");
                return;
            }
        };
        let waiter = self.pending.borrow_mut().remove(&(call, envelope.id));
        match waiter {
            Some(tx) => {
                tracing::trace!(call, id = envelope.id, "reply matched");
                if tx.send(envelope.body).is_err() {
                    tracing::warn!(call, id = envelope.id, "reply for an abandoned call");
                }
            }
            None => tracing::warn!(call, id = envelope.id, "unmatched reply"),
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        for (_, sub) in self.listeners.get_mut().drain() {
            sub.destroy();
        }
        if let Some(sub) = self.handshake.get_mut().take() {
            sub.destroy();
        }
    }
}

/// Client half of the request/response protocol
///
/// Created once by the application root and shared by cloning.
#[derive(Clone)]
pub struct RpcClient {
    inner: Rc<ClientInner>,
}

impl RpcClient {
    pub fn new(bus: &EventBus, config: RpcConfig) -> Self {
        let inner = Rc::new(ClientInner {
            bus: bus.clone(),
            config,
            pending: RefCell::new(FxHashMap::default()),
            listeners: RefCell::new(FxHashMap::default()),
            initialized: Subject::new(false),
            handshake: RefCell::new(None),
        });

        let ready = inner.initialized.clone();
        let handshake = bus
            .subscribe::<String>(INITIALIZED_TOPIC)
            .handle_cached(move |_| ready.set(true));
        *inner.handshake.borrow_mut() = Some(handshake);

        Self { inner }
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn config(&self) -> &RpcConfig {
        &self.inner.config
    }

    /// Whether the responder has signalled readiness
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.get()
    }

    /// Readiness as an observable, for views showing a loading state
    pub fn initialized_state(&self) -> ReadOnly<bool> {
        self.inner.initialized.read_only()
    }

    /// Wait for the responder's readiness signal
    pub async fn initialized(&self) {
        if self.is_initialized() {
            return;
        }
        let (tx, rx) = oneshot::channel();
        let tx = RefCell::new(Some(tx));
        let _wait = DestroyOnDrop(self.inner.initialized.sub(
            move |ready| {
                if *ready {
                    if let Some(tx) = tx.borrow_mut().take() {
                        let _ = tx.send(());
                    }
                }
            },
            false,
        ));
        let _ = rx.await;
    }

    /// Issue a call with the configured timeout for its kind
    ///
    /// Fails synchronously, without publishing, when the request does not
    /// validate.
    pub fn call<C: RpcCall>(&self, request: C::Request) -> Result<PendingCall<C>, RpcError> {
        let timeout = self.inner.config.timeout_for(C::NAME);
        self.call_with_timeout::<C>(request, timeout)
    }

    /// Issue a call with an explicit timeout (`None` waits forever)
    pub fn call_with_timeout<C: RpcCall>(
        &self,
        request: C::Request,
        timeout: Option<Duration>,
    ) -> Result<PendingCall<C>, RpcError> {
        request.validate()?;

        let id = self.inner.bus.next_sequence();
        let payload = serde_json::to_string(&Envelope { id, body: &request })
            .map_err(|source| RpcError::Codec { call: C::NAME, source })?;

        self.ensure_listener(C::NAME);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.borrow_mut().insert((C::NAME, id), tx);
        let guard = WaiterGuard {
            client: Rc::downgrade(&self.inner),
            key: (C::NAME, id),
        };

        tracing::debug!(call = C::NAME, id, "rpc request published");
        self.inner.bus.publish(&C::request_topic(), payload);

        Ok(PendingCall {
            id,
            rx,
            timeout,
            guard,
            _call: PhantomData,
        })
    }

    /// Number of calls awaiting a reply
    pub fn pending_count(&self) -> usize {
        self.inner.pending.borrow().len()
    }

    fn ensure_listener(&self, call: &'static str) {
        if self.inner.listeners.borrow().contains_key(call) {
            return;
        }
        let weak = Rc::downgrade(&self.inner);
        let sub = self
            .inner
            .bus
            .subscribe::<String>(&response_topic(call))
            .handle(move |raw| {
                if let Some(inner) = weak.upgrade() {
                    inner.resolve(call, raw);
                }
            });
        self.inner.listeners.borrow_mut().insert(call, sub);
    }
}

impl fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClient")
            .field("pending", &self.inner.pending.borrow().len())
            .field("initialized", &self.inner.initialized.get())
            .finish()
    }
}

/// Removes the waiter when a call finishes, times out or is dropped
struct WaiterGuard {
    client: Weak<ClientInner>,
    key: WaiterKey,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        if let Some(client) = self.client.upgrade() {
            if client.pending.borrow_mut().remove(&self.key).is_some() {
                tracing::debug!(call = self.key.0, id = self.key.1, "rpc call abandoned");
            }
        }
    }
}

/// Destroys a subscription that only lives as long as one await
struct DestroyOnDrop(Subscription);

impl Drop for DestroyOnDrop {
    fn drop(&mut self) {
        self.0.destroy();
    }
}

/// An issued call awaiting its reply
///
/// Await it directly, or drop it to abandon the call.
pub struct PendingCall<C: RpcCall> {
    id: CallId,
    rx: oneshot::Receiver<Value>,
    timeout: Option<Duration>,
    guard: WaiterGuard,
    _call: PhantomData<fn() -> C>,
}

impl<C: RpcCall> PendingCall<C> {
    pub fn id(&self) -> CallId {
        self.id
    }

    pub async fn response(self) -> Result<C::Response, RpcError> {
        let PendingCall {
            id,
            rx,
            timeout,
            guard,
            ..
        } = self;

        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    tracing::warn!(call = C::NAME, id, timeout_ms = limit.as_millis() as u64, "rpc call timed out");
                    return Err(RpcError::Timeout {
                        call: C::NAME,
                        timeout: limit,
                    });
                }
            },
            None => rx.await,
        };
        drop(guard);

        let body = received.map_err(|_| RpcError::Abandoned { call: C::NAME })?;
        let reply: Reply<C::Response> =
            serde_json::from_value(body).map_err(|source| RpcError::Codec { call: C::NAME, source })?;
        reply.into_result().map_err(|source| RpcError::Remote {
            call: C::NAME,
            source,
        })
    }
}

impl<C: RpcCall> IntoFuture for PendingCall<C> {
    type Output = Result<C::Response, RpcError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output>>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.response())
    }
}

impl<C: RpcCall> fmt::Debug for PendingCall<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("call", &C::NAME)
            .field("id", &self.id)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::{GetMetar, IcaoRequest, WeatherReport};
    use crate::error::{RemoteError, ValidationError};
    use crate::rpc_call;
    use serde::{Deserialize, Serialize};
    use std::cell::Cell;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct Text(pub String);

    impl Validate for Text {
        fn validate(&self) -> Result<(), ValidationError> {
            Ok(())
        }
    }

    rpc_call! {
        Echo: Text => Text
    }

    /// Replies to every `Echo` request with its own body
    fn echo_responder(bus: &EventBus) -> Subscription {
        let reply_bus = bus.clone();
        bus.subscribe::<String>(&Echo::request_topic()).handle(move |raw| {
            let request: Envelope<Text> = serde_json::from_str(raw).unwrap();
            let reply = Envelope {
                id: request.id,
                body: Reply::Ok(request.body),
            };
            reply_bus.publish(&Echo::response_topic(), serde_json::to_string(&reply).unwrap());
        })
    }

    /// Collects raw requests of one kind without answering
    fn capture<C: RpcCall>(bus: &EventBus) -> (Rc<RefCell<Vec<Envelope<Value>>>>, Subscription) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let sub = bus
            .subscribe::<String>(&C::request_topic())
            .handle(move |raw| sink.borrow_mut().push(serde_json::from_str(raw).unwrap()));
        (seen, sub)
    }

    fn reply<C: RpcCall>(bus: &EventBus, id: CallId, body: Reply<C::Response>) {
        let envelope = Envelope { id, body };
        bus.publish(&C::response_topic(), serde_json::to_string(&envelope).unwrap());
    }

    fn report(icao: &str) -> WeatherReport {
        WeatherReport {
            icao: icao.to_string(),
            raw: format!("{icao} 121851Z 27012KT 10SM FEW045 18/09 A3002"),
        }
    }

    #[tokio::test]
    async fn test_echo_round_trip() {
        let bus = EventBus::new();
        let _responder = echo_responder(&bus);
        let client = RpcClient::new(&bus, RpcConfig::default());

        let answer = client.call::<Echo>(Text("hello".into())).unwrap().await.unwrap();
        assert_eq!(answer, Text("hello".into()));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_validation_publishes_nothing() {
        let bus = EventBus::new();
        let published = Rc::new(Cell::new(0));
        let counter = Rc::clone(&published);
        let _spy = bus.tap(move |_, _| counter.set(counter.get() + 1));
        let client = RpcClient::new(&bus, RpcConfig::default());

        let err = client.call::<GetMetar>(IcaoRequest::new("ABC")).unwrap_err();
        assert!(matches!(err, RpcError::Validation(ValidationError::Icao(_))));
        assert_eq!(published.get(), 0);
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_calls_match_by_id() {
        let bus = EventBus::new();
        let (requests, _capture) = capture::<GetMetar>(&bus);
        let client = RpcClient::new(&bus, RpcConfig::default());

        let first = client.call::<GetMetar>(IcaoRequest::new("KJFK")).unwrap();
        let second = client.call::<GetMetar>(IcaoRequest::new("EGLL")).unwrap();
        assert_eq!(client.pending_count(), 2);

        let ids: Vec<CallId> = requests.borrow().iter().map(|e| e.id).collect();
        reply::<GetMetar>(&bus, ids[1], Reply::Ok(report("EGLL")));
        reply::<GetMetar>(&bus, ids[0], Reply::Ok(report("KJFK")));

        assert_eq!(first.await.unwrap().icao, "KJFK");
        assert_eq!(second.await.unwrap().icao, "EGLL");
    }

    #[tokio::test]
    async fn test_remote_failure_surfaces() {
        let bus = EventBus::new();
        let (requests, _capture) = capture::<GetMetar>(&bus);
        let client = RpcClient::new(&bus, RpcConfig::default());

        let pending = client.call::<GetMetar>(IcaoRequest::new("ZZZZ")).unwrap();
        let id = requests.borrow()[0].id;
        reply::<GetMetar>(&bus, id, Reply::Err(RemoteError::not_found("no METAR for ZZZZ")));

        let err = pending.await.unwrap_err();
        assert_eq!(err.remote(), Some(&RemoteError::not_found("no METAR for ZZZZ")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let bus = EventBus::new();
        let config = RpcConfig::default().with_timeout("GetMetar", Duration::from_millis(500));
        let client = RpcClient::new(&bus, config);

        let started = tokio::time::Instant::now();
        let err = client
            .call::<GetMetar>(IcaoRequest::new("KJFK"))
            .unwrap()
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_abandons_call() {
        let bus = EventBus::new();
        let (requests, _capture) = capture::<GetMetar>(&bus);
        let client = RpcClient::new(&bus, RpcConfig::default());

        let pending = client.call::<GetMetar>(IcaoRequest::new("KJFK")).unwrap();
        assert_eq!(client.pending_count(), 1);
        drop(pending);
        assert_eq!(client.pending_count(), 0);

        // Late reply is discarded.
        let id = requests.borrow()[0].id;
        reply::<GetMetar>(&bus, id, Reply::Ok(report("KJFK")));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_handshake_is_replayed_to_late_clients() {
        let bus = EventBus::new();
        let early = RpcClient::new(&bus, RpcConfig::default());
        assert!(!early.is_initialized());

        bus.publish(INITIALIZED_TOPIC, "true".to_string());
        assert!(early.is_initialized());

        let late = RpcClient::new(&bus, RpcConfig::default());
        assert!(late.is_initialized());
        late.initialized().await;
    }

    #[tokio::test]
    async fn test_initialized_waits_for_signal() {
        let bus = EventBus::new();
        let client = RpcClient::new(&bus, RpcConfig::default());
        let signal_bus = bus.clone();

        tokio::join!(client.initialized(), async move {
            tokio::task::yield_now().await;
            signal_bus.publish(INITIALIZED_TOPIC, "true".to_string());
        });
        assert!(client.is_initialized());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_wait_releases_subscription() {
        let bus = EventBus::new();
        let client = RpcClient::new(&bus, RpcConfig::default());
        assert_eq!(client.initialized_state().subscriber_count(), 0);

        for _ in 0..3 {
            let waited = tokio::time::timeout(Duration::from_millis(1), client.initialized()).await;
            assert!(waited.is_err());
        }
        assert_eq!(client.initialized_state().subscriber_count(), 0);

        bus.publish(INITIALIZED_TOPIC, "true".to_string());
        client.initialized().await;
        assert_eq!(client.initialized_state().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_clients_on_one_bus_use_distinct_ids() {
        let bus = EventBus::new();
        let (requests, _capture) = capture::<GetMetar>(&bus);
        let left = RpcClient::new(&bus, RpcConfig::default());
        let right = RpcClient::new(&bus, RpcConfig::default());

        let first = left.call::<GetMetar>(IcaoRequest::new("KJFK")).unwrap();
        let second = right.call::<GetMetar>(IcaoRequest::new("EGLL")).unwrap();
        assert_ne!(first.id(), second.id());

        let ids: Vec<CallId> = requests.borrow().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![first.id(), second.id()]);

        reply::<GetMetar>(&bus, second.id(), Reply::Ok(report("EGLL")));
        assert_eq!(left.pending_count(), 1);
        assert_eq!(right.pending_count(), 0);
        assert_eq!(second.await.unwrap().icao, "EGLL");

        reply::<GetMetar>(&bus, first.id(), Reply::Ok(report("KJFK")));
        assert_eq!(left.pending_count(), 0);
        assert_eq!(first.await.unwrap().icao, "KJFK");
    }
}
