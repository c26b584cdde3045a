//! Exchange - outbound requests, response correlation, inbound routing.
//!
//! Outbound:
//! 1. Check the node has an address (fails before any interceptor runs)
//! 2. Assign a fresh request ID and register the pending response (calls only)
//! 3. Queue the request for the outbound task
//! 4. The outbound task runs the `OutgoingRequest` stage and hands the
//!    envelope to the transport, one request at a time in ID order
//!
//! ```text
//! call / notify ─► mpsc::UnboundedSender<Outbound> ─► Outbound Task ─► Transport
//! ```
//!
//! Inbound envelopes run the `IncomingResponse` or `IncomingRequest` stage,
//! then either resolve their pending call or go to the
//! [`RequestDispatcher`], whose reply runs `OutgoingResponse` and is sent
//! back to the request's source address.

mod correlation;
mod request;

pub use correlation::CorrelationTable;
pub use request::{Call, Request, RequestOptions};

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::address::{Address, AddressState};
use crate::dispatch::RequestDispatcher;
use crate::envelope::{Envelope, RequestEnvelope, RequestId};
use crate::error::{Result, RpcError};
use crate::pipeline::{InterceptorPipeline, Rejection, Stage, Verdict};
use crate::transport::Transport;
use correlation::PendingGuard;

/// A request waiting for the outbound task.
struct Outbound {
    destinations: Vec<Address>,
    envelope: RequestEnvelope,
    /// A caller holds a pending entry for this request.
    awaited: bool,
}

/// ID counter and queue, locked together so IDs enter the queue in order.
struct OutboundQueue {
    next_request_id: u64,
    tx: mpsc::UnboundedSender<Outbound>,
}

/// A validated request that has not been given an ID yet.
struct Prepared {
    destinations: Vec<Address>,
    path: String,
    query: Map<String, Value>,
    src_address: Address,
    timeout: Option<Duration>,
}

impl Prepared {
    fn into_outbound(self, request_id: RequestId, awaited: bool) -> Outbound {
        Outbound {
            destinations: self.destinations,
            envelope: RequestEnvelope {
                request_id,
                path: self.path,
                query: self.query,
                src_address: self.src_address,
            },
            awaited,
        }
    }
}

/// Request/response engine shared by a node and its background tasks.
pub struct Exchange<T: Transport> {
    transport: Arc<T>,
    pipeline: Arc<InterceptorPipeline>,
    address: Arc<AddressState>,
    dispatcher: RequestDispatcher,
    correlations: Arc<CorrelationTable>,
    queue: Mutex<OutboundQueue>,
    default_timeout: Option<Duration>,
}

impl<T: Transport> Exchange<T> {
    /// Create an exchange and spawn its outbound task.
    ///
    /// Must be called within a tokio runtime. The outbound task stops once
    /// the exchange is dropped.
    pub fn start(
        transport: Arc<T>,
        pipeline: Arc<InterceptorPipeline>,
        address: Arc<AddressState>,
        dispatcher: RequestDispatcher,
        default_timeout: Option<Duration>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let exchange = Arc::new(Self {
            transport,
            pipeline,
            address,
            dispatcher,
            correlations: Arc::new(CorrelationTable::new()),
            queue: Mutex::new(OutboundQueue {
                next_request_id: 1,
                tx,
            }),
            default_timeout,
        });

        tokio::spawn(Self::outbound_loop(Arc::downgrade(&exchange), rx));
        exchange
    }

    /// Issue a request that expects a response.
    ///
    /// Fails immediately with [`RpcError::NoAddress`] while disconnected.
    /// Otherwise the request is queued for sending before this returns,
    /// whether or not the [`Call`] is ever awaited.
    pub fn call(&self, request: Request) -> Result<Call> {
        let prepared = self.prepare(request)?;
        let deadline = prepared.timeout.map(|limit| Instant::now() + limit);

        let mut queue = self.lock_queue();
        let request_id = RequestId(queue.next_request_id);
        let rx = self.correlations.insert(request_id)?;
        let pending = PendingGuard {
            table: Arc::clone(&self.correlations),
            request_id,
        };

        // The address is cleared before pending calls are failed, so an entry
        // registered after that sweep is caught here.
        if !self.address.is_connected() {
            return Err(RpcError::Disconnected);
        }

        Self::push(&mut queue, prepared.into_outbound(request_id, true))?;
        drop(queue);

        Ok(Call::new(
            request_id,
            Box::pin(async move {
                let _pending = pending;
                let outcome = match deadline {
                    Some(deadline) => tokio::time::timeout_at(deadline, rx)
                        .await
                        .map_err(|_| RpcError::Timeout)?,
                    None => rx.await,
                };

                // Sender dropped without an answer: the table was torn down.
                outcome.unwrap_or(Err(RpcError::ConnectionClosed))
            }),
        ))
    }

    /// Issue a fire-and-forget request.
    ///
    /// Only the address precondition is reported. Interceptor rejections and
    /// transport failures are logged and otherwise swallowed, since nobody
    /// waits on the outcome.
    pub fn notify(&self, request: Request) -> Result<RequestId> {
        let prepared = self.prepare(request)?;

        let mut queue = self.lock_queue();
        let request_id = RequestId(queue.next_request_id);
        Self::push(&mut queue, prepared.into_outbound(request_id, false))?;
        Ok(request_id)
    }

    /// Process an envelope delivered by the transport.
    pub async fn receive(&self, envelope: Envelope) {
        let stage = if envelope.is_response() {
            Stage::IncomingResponse
        } else {
            Stage::IncomingRequest
        };

        let envelope = match self.pipeline.emit(stage, envelope).await {
            Ok(envelope) => envelope,
            Err(rejection) => {
                tracing::debug!("Inbound envelope dropped at {}: {}", stage, rejection);
                return;
            }
        };

        match envelope {
            Envelope::Response(response) => {
                let request_id = response.request_id;
                if !self.correlations.resolve(response) {
                    tracing::debug!("Dropping unmatched response {}", request_id);
                }
            }
            Envelope::Request(request) => self.answer(request).await,
        }
    }

    /// Fail every pending call, returning how many were failed.
    pub fn fail_pending(&self, error: impl Fn() -> RpcError) -> usize {
        self.correlations.fail_all(error)
    }

    /// Number of calls awaiting a response.
    pub fn pending(&self) -> usize {
        self.correlations.len()
    }

    /// Get the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Get the interceptor pipeline.
    pub fn pipeline(&self) -> &InterceptorPipeline {
        &self.pipeline
    }

    fn prepare(&self, request: Request) -> Result<Prepared> {
        let src_address = self.address.current().ok_or(RpcError::NoAddress)?;

        let Request {
            destinations,
            path,
            query,
            options,
        } = request;

        if !path.starts_with('/') {
            return Err(RpcError::InvalidPath(path));
        }

        let destinations = self.transport.normalize_addresses(destinations);
        if destinations.is_empty() {
            return Err(RpcError::NoDestination);
        }

        Ok(Prepared {
            destinations,
            path,
            query,
            src_address,
            timeout: options.timeout.or(self.default_timeout),
        })
    }

    fn push(queue: &mut OutboundQueue, outbound: Outbound) -> Result<()> {
        queue
            .tx
            .send(outbound)
            .map_err(|_| RpcError::ConnectionClosed)?;
        queue.next_request_id += 1;
        Ok(())
    }

    fn lock_queue(&self) -> MutexGuard<'_, OutboundQueue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Outbound loop - sends queued requests one at a time, in queue order.
    async fn outbound_loop(exchange: Weak<Self>, mut rx: mpsc::UnboundedReceiver<Outbound>) {
        while let Some(outbound) = rx.recv().await {
            let Some(exchange) = exchange.upgrade() else {
                break;
            };
            exchange.deliver(outbound).await;
        }
    }

    async fn deliver(&self, outbound: Outbound) {
        let Outbound {
            destinations,
            envelope,
            awaited,
        } = outbound;
        let request_id = envelope.request_id;

        let sent = match self.emit_outbound(Stage::OutgoingRequest, envelope.into()).await {
            Ok(envelope) => self.transport.send(&destinations, envelope).await,
            Err(rejection) => Err(rejection.into()),
        };

        if let Err(e) = sent {
            tracing::debug!("Request {} not sent: {}", request_id, e);
            if awaited {
                self.correlations.fail(request_id, e);
            }
        }
    }

    async fn answer(&self, request: RequestEnvelope) {
        let request_id = request.request_id;
        let reply = self.dispatcher.dispatch(request).await;

        let envelope = match self
            .emit_outbound(Stage::OutgoingResponse, reply.envelope.into())
            .await
        {
            Ok(envelope) => envelope,
            Err(rejection) => {
                tracing::debug!("Response to {} suppressed: {}", request_id, rejection);
                return;
            }
        };

        let destinations = [reply.destination];
        if let Err(e) = self.transport.send(&destinations, envelope).await {
            tracing::warn!(
                "Failed to send response {} to {}: {}",
                request_id,
                destinations[0],
                e
            );
        }
    }

    /// Run an outbound stage; interceptors may rewrite the envelope but not
    /// turn a request into a response or back.
    async fn emit_outbound(&self, stage: Stage, envelope: Envelope) -> Verdict {
        let was_response = envelope.is_response();
        let envelope = self.pipeline.emit(stage, envelope).await?;
        if envelope.is_response() != was_response {
            return Err(Rejection::new(format!("{} changed the envelope kind", stage)));
        }
        Ok(envelope)
    }
}
