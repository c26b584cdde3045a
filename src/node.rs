//! Node builder and runtime loop.
//!
//! The [`NodeBuilder`] wires a transport, a router and the node settings
//! together. The [`Node`] manages the lifecycle:
//! 1. Consume transport events on a background task
//! 2. Track the local address and publish connectivity changes
//! 3. Run every inbound envelope on its own task; requests are bounded by a
//!    semaphore, responses to this node's calls are not
//! 4. Issue outbound requests through the shared [`Exchange`]
//!
//! # Example
//!
//! ```ignore
//! use netrpc::router::PathRouter;
//! use netrpc::transport::{MemoryLink, MemoryNetwork};
//! use netrpc::{NodeBuilder, Request, RouteResult};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> netrpc::Result<()> {
//!     let network = MemoryNetwork::new();
//!
//!     let mut router = PathRouter::new();
//!     router.handle("/ping", |_ctx| async { RouteResult::ok(json!({"pong": true})) });
//!
//!     let (transport, events) = network.join();
//!     let server = NodeBuilder::new(transport, events).router(router).start();
//!     server.add_connection(MemoryLink::Join("server".into()))?;
//!
//!     let (transport, events) = network.join();
//!     let client = NodeBuilder::new(transport, events).start();
//!     client.add_connection(MemoryLink::Join("client".into()))?;
//!     client.wait_connected().await;
//!
//!     let pong = client.request(Request::new("server", "/ping"))?.await?;
//!     assert_eq!(pong, json!({"pong": true}));
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use crate::address::{Address, AddressState, Connectivity};
use crate::dispatch::RequestDispatcher;
use crate::envelope::{Envelope, RequestId};
use crate::error::{Result, RpcError};
use crate::events::{EventBus, NodeEvent, Subscription, DEFAULT_EVENT_CAPACITY};
use crate::exchange::{Call, Exchange, Request};
use crate::pipeline::{InterceptorId, InterceptorPipeline, Stage, Verdict};
use crate::router::{PathRouter, Router};
use crate::transport::{Transport, TransportEvent};

/// Default maximum concurrent inbound request handlers.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// Default response timeout: wait indefinitely.
pub const DEFAULT_REQUEST_TIMEOUT: Option<Duration> = None;

/// Node settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Inbound requests handled at once. Excess requests are dropped.
    pub max_concurrent_handlers: usize,
    /// Response timeout for requests that don't set their own.
    pub default_timeout: Option<Duration>,
    /// Buffered events per subscriber before it starts lagging.
    pub event_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Builder for configuring and starting a [`Node`].
pub struct NodeBuilder<T: Transport> {
    transport: T,
    events: mpsc::Receiver<TransportEvent>,
    router: Arc<dyn Router>,
    config: NodeConfig,
}

impl<T: Transport> NodeBuilder<T> {
    /// Create a builder over a transport and the channel it reports on.
    ///
    /// Without a router every inbound request is answered `not_found`.
    pub fn new(transport: T, events: mpsc::Receiver<TransportEvent>) -> Self {
        Self {
            transport,
            events,
            router: Arc::new(PathRouter::new()),
            config: NodeConfig::default(),
        }
    }

    /// Set the router serving inbound requests.
    pub fn router(mut self, router: impl Router) -> Self {
        self.router = Arc::new(router);
        self
    }

    /// Set the maximum number of inbound requests handled at once.
    ///
    /// When this limit is reached, new requests are dropped with a warning.
    /// Responses to this node's own calls are never dropped.
    /// Default: 256
    pub fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.config.max_concurrent_handlers = limit;
        self
    }

    /// Set the response timeout for requests without their own.
    ///
    /// Default: none
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = Some(timeout);
        self
    }

    /// Set the per-subscriber event buffer.
    ///
    /// Default: 64
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Replace all settings at once.
    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    /// Start the node.
    ///
    /// Spawns the event loop, so this must be called within a tokio runtime.
    pub fn start(self) -> Node<T> {
        Node::start(self.transport, self.events, self.router, self.config)
    }
}

/// A running node.
///
/// Dropping the node stops its event loop.
pub struct Node<T: Transport> {
    exchange: Arc<Exchange<T>>,
    pipeline: Arc<InterceptorPipeline>,
    address: Arc<AddressState>,
    events: EventBus,
    loop_task: JoinHandle<()>,
}

impl<T: Transport> Node<T> {
    /// Create a node builder.
    pub fn builder(transport: T, events: mpsc::Receiver<TransportEvent>) -> NodeBuilder<T> {
        NodeBuilder::new(transport, events)
    }

    fn start(
        transport: T,
        transport_events: mpsc::Receiver<TransportEvent>,
        router: Arc<dyn Router>,
        config: NodeConfig,
    ) -> Self {
        let pipeline = Arc::new(InterceptorPipeline::new());
        let address = Arc::new(AddressState::new());
        let events = EventBus::new(config.event_capacity);

        let exchange = Exchange::start(
            Arc::new(transport),
            Arc::clone(&pipeline),
            Arc::clone(&address),
            RequestDispatcher::new(router),
            config.default_timeout,
        );

        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_handlers));
        let loop_task = tokio::spawn(Self::event_loop(
            transport_events,
            Arc::clone(&exchange),
            Arc::clone(&address),
            events.clone(),
            semaphore,
        ));

        Node {
            exchange,
            pipeline,
            address,
            events,
            loop_task,
        }
    }

    /// Main loop - applies transport events until the transport goes away.
    async fn event_loop(
        mut transport_events: mpsc::Receiver<TransportEvent>,
        exchange: Arc<Exchange<T>>,
        address: Arc<AddressState>,
        events: EventBus,
        semaphore: Arc<Semaphore>,
    ) {
        while let Some(event) = transport_events.recv().await {
            match event {
                TransportEvent::Message(envelope) => {
                    Self::handle_message(envelope, &exchange, &semaphore);
                }
                TransportEvent::Address(next) => match address.apply(next) {
                    Some(Connectivity::Connected(addr)) => {
                        tracing::debug!("Connected as {}", addr);
                        events.publish(NodeEvent::Connect(addr));
                    }
                    Some(Connectivity::Disconnected) => {
                        let failed = exchange.fail_pending(|| RpcError::Disconnected);
                        tracing::debug!("Disconnected, failed {} pending requests", failed);
                        events.publish(NodeEvent::Disconnect);
                    }
                    None => {}
                },
                TransportEvent::Insert(entries) => events.publish(NodeEvent::Insert(entries)),
                TransportEvent::Remove(entries) => events.publish(NodeEvent::Remove(entries)),
            }
        }

        tracing::debug!("Transport event channel closed");
        exchange.fail_pending(|| RpcError::ConnectionClosed);
    }

    /// Run one inbound envelope on its own task.
    ///
    /// Only requests count against the handler limit; a response always
    /// reaches its pending call.
    fn handle_message(envelope: Envelope, exchange: &Arc<Exchange<T>>, semaphore: &Arc<Semaphore>) {
        let exchange = Arc::clone(exchange);
        if envelope.is_response() {
            tokio::spawn(async move { exchange.receive(envelope).await });
            return;
        }

        let permit = match Arc::clone(semaphore).try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                tracing::warn!(
                    "Handler capacity reached, dropping request {}",
                    envelope.request_id()
                );
                return;
            }
        };

        tokio::spawn(async move {
            // Permit is held until this task completes
            let _permit = permit;
            exchange.receive(envelope).await;
        });
    }

    /// Issue a request and get a future for its response.
    ///
    /// Fails immediately with [`RpcError::NoAddress`] while disconnected, in
    /// which case no interceptor runs and nothing is sent. Requests reach the
    /// transport in the order they are issued.
    pub fn request(&self, request: Request) -> Result<Call> {
        self.exchange.call(request)
    }

    /// Issue a request and hand its outcome to `callback` when it arrives.
    ///
    /// The outcome is awaited on a spawned task.
    pub fn request_with_callback<F>(&self, request: Request, callback: F) -> Result<RequestId>
    where
        F: FnOnce(Result<Value>) + Send + 'static,
    {
        let call = self.exchange.call(request)?;
        let request_id = call.request_id();
        tokio::spawn(async move { callback(call.await) });
        Ok(request_id)
    }

    /// Send a request without waiting for a response.
    pub fn notify(&self, request: Request) -> Result<RequestId> {
        self.exchange.notify(request)
    }

    /// Register a connection with the underlying transport.
    pub fn add_connection(&self, connection: T::Connection) -> Result<()> {
        self.exchange.transport().add_connection(connection)
    }

    /// Current local address.
    pub fn address(&self) -> Option<Address> {
        self.address.current()
    }

    /// Check if the node holds an address.
    pub fn is_connected(&self) -> bool {
        self.address.is_connected()
    }

    /// Wait until the node holds an address.
    pub async fn wait_connected(&self) -> Address {
        let mut rx = self.address.watch();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(addr) = current {
                return addr;
            }
            if rx.changed().await.is_err() {
                // The sender lives as long as the node does.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Subscribe to connectivity and membership events.
    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    /// Add a persistent interceptor.
    pub fn on<F, Fut>(&self, stage: Stage, f: F) -> InterceptorId
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Verdict> + Send + 'static,
    {
        self.pipeline.on(stage, f)
    }

    /// Add an interceptor that runs for one emission only.
    pub fn once<F, Fut>(&self, stage: Stage, f: F) -> InterceptorId
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Verdict> + Send + 'static,
    {
        self.pipeline.once(stage, f)
    }

    /// Remove an interceptor.
    pub fn off(&self, stage: Stage, id: InterceptorId) -> bool {
        self.pipeline.off(stage, id)
    }

    /// Get the interceptor pipeline.
    pub fn pipeline(&self) -> &InterceptorPipeline {
        &self.pipeline
    }

    /// Number of requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.exchange.pending()
    }

    /// Get the transport.
    pub fn transport(&self) -> &T {
        self.exchange.transport()
    }

    /// Stop the event loop and fail every pending request.
    pub async fn shutdown(self) {
        self.loop_task.abort();
        self.exchange.fail_pending(|| RpcError::ConnectionClosed);
    }
}

impl<T: Transport> Drop for Node<T> {
    fn drop(&mut self) {
        self.loop_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{RequestEnvelope, ResponseEnvelope, RouteResult};
    use crate::pipeline::BoxFuture;
    use serde_json::json;
    use std::sync::Mutex;

    /// Transport that records sends; events are injected by the test.
    #[derive(Default)]
    struct Loopback {
        sent: Arc<Mutex<Vec<(Vec<Address>, Envelope)>>>,
    }

    impl Transport for Loopback {
        type Connection = ();

        fn send<'a>(
            &'a self,
            destinations: &'a [Address],
            envelope: Envelope,
        ) -> BoxFuture<'a, Result<()>> {
            self.sent
                .lock()
                .unwrap()
                .push((destinations.to_vec(), envelope));
            Box::pin(async { Ok(()) })
        }

        fn add_connection(&self, _connection: ()) -> Result<()> {
            Ok(())
        }
    }

    struct Harness {
        node: Node<Loopback>,
        inject: mpsc::Sender<TransportEvent>,
        sent: Arc<Mutex<Vec<(Vec<Address>, Envelope)>>>,
    }

    fn harness(builder: impl FnOnce(NodeBuilder<Loopback>) -> NodeBuilder<Loopback>) -> Harness {
        let (inject, rx) = mpsc::channel(16);
        let transport = Loopback::default();
        let sent = Arc::clone(&transport.sent);
        let node = builder(NodeBuilder::new(transport, rx)).start();
        Harness { node, inject, sent }
    }

    async fn wait_for(cond: impl Fn() -> bool) {
        while !cond() {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.max_concurrent_handlers, 256);
        assert_eq!(config.default_timeout, None);
        assert_eq!(config.event_capacity, 64);
    }

    #[test]
    fn test_builder_configuration() {
        let (_tx, rx) = mpsc::channel(1);
        let builder = NodeBuilder::new(Loopback::default(), rx)
            .max_concurrent_handlers(8)
            .default_timeout(Duration::from_secs(3))
            .event_capacity(4);

        assert_eq!(builder.config.max_concurrent_handlers, 8);
        assert_eq!(builder.config.default_timeout, Some(Duration::from_secs(3)));
        assert_eq!(builder.config.event_capacity, 4);
    }

    #[tokio::test]
    async fn test_connectivity_events() {
        let h = harness(|b| b);
        let mut sub = h.node.subscribe();
        assert!(!h.node.is_connected());

        h.inject
            .send(TransportEvent::Address(Some(Address::from("n1"))))
            .await
            .unwrap();
        assert_eq!(sub.recv().await, Some(NodeEvent::Connect(Address::from("n1"))));
        assert_eq!(h.node.address(), Some(Address::from("n1")));

        // Re-addressing while connected is not a connect.
        h.inject
            .send(TransportEvent::Address(Some(Address::from("n2"))))
            .await
            .unwrap();
        h.inject.send(TransportEvent::Address(None)).await.unwrap();
        assert_eq!(sub.recv().await, Some(NodeEvent::Disconnect));
        assert!(!h.node.is_connected());
    }

    #[tokio::test]
    async fn test_membership_passthrough() {
        let h = harness(|b| b);
        let mut sub = h.node.subscribe();

        h.inject
            .send(TransportEvent::Insert(vec![json!({"addr": "x"})]))
            .await
            .unwrap();
        h.inject
            .send(TransportEvent::Remove(vec![json!("y")]))
            .await
            .unwrap();

        assert_eq!(sub.recv().await, Some(NodeEvent::Insert(vec![json!({"addr": "x"})])));
        assert_eq!(sub.recv().await, Some(NodeEvent::Remove(vec![json!("y")])));
    }

    #[tokio::test]
    async fn test_request_requires_address() {
        let h = harness(|b| b);
        let err = h.node.request(Request::new("peer", "/ping")).unwrap_err();
        assert!(matches!(err, RpcError::NoAddress));
        assert!(h.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_request_resolved_by_injected_response() {
        let h = harness(|b| b);
        h.inject
            .send(TransportEvent::Address(Some(Address::from("me"))))
            .await
            .unwrap();
        h.node.wait_connected().await;

        let call = h.node.request(Request::new("peer", "/ping")).unwrap();
        let id = call.request_id();
        let task = tokio::spawn(call);

        let sent = Arc::clone(&h.sent);
        wait_for(move || !sent.lock().unwrap().is_empty()).await;
        assert_eq!(h.node.pending_requests(), 1);

        let response = ResponseEnvelope::new(id, RouteResult::ok(json!({"pong": true})));
        h.inject
            .send(TransportEvent::Message(response.into()))
            .await
            .unwrap();

        assert_eq!(task.await.unwrap().unwrap(), json!({"pong": true}));
        assert_eq!(h.node.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_responses_bypass_handler_limit() {
        let mut router = PathRouter::new();
        router.handle("/block", |_ctx| async {
            std::future::pending::<()>().await;
            RouteResult::ok(Value::Null)
        });
        let h = harness(move |b| b.router(router).max_concurrent_handlers(1));
        h.inject
            .send(TransportEvent::Address(Some(Address::from("me"))))
            .await
            .unwrap();
        h.node.wait_connected().await;

        // Occupies the only handler slot for good.
        let blocking = RequestEnvelope {
            request_id: RequestId(900),
            path: "/block".to_string(),
            query: Default::default(),
            src_address: Address::from("peer"),
        };
        h.inject
            .send(TransportEvent::Message(blocking.into()))
            .await
            .unwrap();

        let call = h.node.request(Request::new("peer", "/ping")).unwrap();
        let id = call.request_id();
        let task = tokio::spawn(call);
        let sent = Arc::clone(&h.sent);
        wait_for(move || !sent.lock().unwrap().is_empty()).await;

        let response = ResponseEnvelope::new(id, RouteResult::ok("pong"));
        h.inject
            .send(TransportEvent::Message(response.into()))
            .await
            .unwrap();

        assert_eq!(task.await.unwrap().unwrap(), json!("pong"));
        assert_eq!(h.node.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_fails_pending() {
        let h = harness(|b| b);
        h.inject
            .send(TransportEvent::Address(Some(Address::from("me"))))
            .await
            .unwrap();
        h.node.wait_connected().await;

        let task = tokio::spawn(h.node.request(Request::new("peer", "/slow")).unwrap());
        let sent = Arc::clone(&h.sent);
        wait_for(move || !sent.lock().unwrap().is_empty()).await;

        h.inject.send(TransportEvent::Address(None)).await.unwrap();
        assert!(matches!(task.await.unwrap(), Err(RpcError::Disconnected)));
    }

    #[tokio::test]
    async fn test_inbound_request_served_by_router() {
        let mut router = PathRouter::new();
        router.handle("/users/:id", |ctx| async move {
            RouteResult::ok(json!({"id": ctx.param("id")}))
        });
        let h = harness(move |b| b.router(router));

        let request = RequestEnvelope {
            request_id: RequestId(3),
            path: "/users/42".to_string(),
            query: Default::default(),
            src_address: Address::from("asker"),
        };
        h.inject
            .send(TransportEvent::Message(request.into()))
            .await
            .unwrap();

        let sent = Arc::clone(&h.sent);
        wait_for(move || !sent.lock().unwrap().is_empty()).await;

        let (dests, envelope) = h.sent.lock().unwrap()[0].clone();
        assert_eq!(dests, vec![Address::from("asker")]);
        match envelope {
            Envelope::Response(r) => {
                assert_eq!(r.request_id, RequestId(3));
                assert_eq!(r.into_outcome().unwrap(), json!({"id": "42"}));
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_once_interceptor_through_node() {
        let h = harness(|b| b);
        let seen = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&seen);
        h.node.once(Stage::IncomingResponse, move |env| {
            *counter.lock().unwrap() += 1;
            async move { Ok(env) }
        });
        assert_eq!(h.node.pipeline().len(Stage::IncomingResponse), 1);

        for id in 1..=2 {
            let response = ResponseEnvelope::new(RequestId(id), RouteResult::ok(1));
            h.inject
                .send(TransportEvent::Message(response.into()))
                .await
                .unwrap();
        }

        let pipeline_empty = {
            let node = &h.node;
            move || node.pipeline().is_empty(Stage::IncomingResponse)
        };
        wait_for(pipeline_empty).await;
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_callback_request() {
        let h = harness(|b| b);
        h.inject
            .send(TransportEvent::Address(Some(Address::from("me"))))
            .await
            .unwrap();
        h.node.wait_connected().await;

        let (tx, rx) = tokio::sync::oneshot::channel();
        let id = h
            .node
            .request_with_callback(Request::new("peer", "/ping"), move |outcome| {
                let _ = tx.send(outcome);
            })
            .unwrap();

        let sent = Arc::clone(&h.sent);
        wait_for(move || !sent.lock().unwrap().is_empty()).await;

        let response = ResponseEnvelope::new(id, RouteResult::err("denied"));
        h.inject
            .send(TransportEvent::Message(response.into()))
            .await
            .unwrap();

        match rx.await.unwrap() {
            Err(RpcError::Remote { error, .. }) => assert_eq!(error, json!("denied")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shutdown_fails_pending() {
        let h = harness(|b| b);
        h.inject
            .send(TransportEvent::Address(Some(Address::from("me"))))
            .await
            .unwrap();
        h.node.wait_connected().await;

        let task = tokio::spawn(h.node.request(Request::new("peer", "/slow")).unwrap());
        let sent = Arc::clone(&h.sent);
        wait_for(move || !sent.lock().unwrap().is_empty()).await;

        h.node.shutdown().await;
        assert!(matches!(task.await.unwrap(), Err(RpcError::ConnectionClosed)));
    }
}
