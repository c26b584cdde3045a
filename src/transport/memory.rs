//! In-process multipoint network.
//!
//! Every endpoint joined to a [`MemoryNetwork`] gets its own event channel.
//! Addresses are claimed through [`MemoryLink::Join`]; the endpoint then
//! sees `Address(Some)` and every other endpoint sees `Insert`. Envelopes are
//! encoded once per send and decoded at each destination, so receivers never
//! share state with the sender.
//!
//! # Example
//!
//! ```ignore
//! use netrpc::transport::{MemoryLink, MemoryNetwork, Transport};
//!
//! let network = MemoryNetwork::new();
//! let (transport, events) = network.join();
//! transport.add_connection(MemoryLink::Join("node-1".into()))?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::mpsc;

use super::{Transport, TransportEvent};
use crate::address::Address;
use crate::codec::EnvelopeCodec;
use crate::envelope::Envelope;
use crate::error::{Result, RpcError};
use crate::pipeline::BoxFuture;

/// Default per-endpoint event channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Connection handle for a [`MemoryTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryLink {
    /// Claim an address, replacing any address held before.
    Join(Address),
    /// Give up the current address.
    Leave,
}

struct Endpoint {
    address: Option<Address>,
    tx: mpsc::Sender<TransportEvent>,
}

#[derive(Default)]
struct Hub {
    endpoints: HashMap<u64, Endpoint>,
    next_endpoint: u64,
}

impl Hub {
    fn find(&self, address: &Address) -> Option<&Endpoint> {
        self.endpoints
            .values()
            .find(|e| e.address.as_ref() == Some(address))
    }

    fn push(endpoint: &Endpoint, event: TransportEvent) {
        match endpoint.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Endpoint queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Endpoint receiver gone, dropping event");
            }
        }
    }

    fn broadcast_except(&self, id: u64, event: TransportEvent) {
        for (_, endpoint) in self.endpoints.iter().filter(|(k, _)| **k != id) {
            Self::push(endpoint, event.clone());
        }
    }
}

fn membership(address: &Address) -> Vec<Value> {
    vec![Value::String(address.to_string())]
}

/// Shared in-process network.
///
/// Cheap to clone; clones refer to the same network.
#[derive(Clone)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
    sends: Arc<AtomicU64>,
    capacity: usize,
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a network whose endpoints buffer up to `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            hub: Arc::new(Mutex::new(Hub::default())),
            sends: Arc::new(AtomicU64::new(0)),
            capacity: capacity.max(1),
        }
    }

    /// Add an endpoint with no address.
    pub fn join(&self) -> (MemoryTransport, mpsc::Receiver<TransportEvent>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut hub = self.lock();
        let id = hub.next_endpoint;
        hub.next_endpoint += 1;
        hub.endpoints.insert(id, Endpoint { address: None, tx });

        let transport = MemoryTransport {
            id,
            network: self.clone(),
        };
        (transport, rx)
    }

    /// Addresses currently claimed, sorted.
    pub fn addresses(&self) -> Vec<Address> {
        let mut out: Vec<Address> = self
            .lock()
            .endpoints
            .values()
            .filter_map(|e| e.address.clone())
            .collect();
        out.sort();
        out
    }

    /// Number of `send` calls made by all endpoints.
    pub fn send_count(&self) -> u64 {
        self.sends.load(Ordering::Acquire)
    }

    fn lock(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// One endpoint of a [`MemoryNetwork`].
///
/// Dropping the transport leaves the network.
pub struct MemoryTransport {
    id: u64,
    network: MemoryNetwork,
}

impl MemoryTransport {
    /// Address currently held by this endpoint.
    pub fn address(&self) -> Option<Address> {
        self.network
            .lock()
            .endpoints
            .get(&self.id)
            .and_then(|e| e.address.clone())
    }

    fn claim(&self, address: Address) -> Result<()> {
        let mut hub = self.network.lock();
        let taken = hub
            .endpoints
            .iter()
            .any(|(id, e)| *id != self.id && e.address.as_ref() == Some(&address));
        if taken {
            return Err(RpcError::Transport(format!("address {} already in use", address)));
        }

        let Some(endpoint) = hub.endpoints.get_mut(&self.id) else {
            return Err(RpcError::ConnectionClosed);
        };
        let previous = endpoint.address.replace(address.clone());
        if previous.as_ref() == Some(&address) {
            return Ok(());
        }

        let hub = &*hub;
        if let Some(old) = previous {
            hub.broadcast_except(self.id, TransportEvent::Remove(membership(&old)));
        }
        if let Some(endpoint) = hub.endpoints.get(&self.id) {
            Hub::push(endpoint, TransportEvent::Address(Some(address.clone())));
        }
        hub.broadcast_except(self.id, TransportEvent::Insert(membership(&address)));
        Ok(())
    }

    fn release(&self) {
        let mut hub = self.network.lock();
        let Some(endpoint) = hub.endpoints.get_mut(&self.id) else {
            return;
        };
        let Some(old) = endpoint.address.take() else {
            return;
        };

        let hub = &*hub;
        if let Some(endpoint) = hub.endpoints.get(&self.id) {
            Hub::push(endpoint, TransportEvent::Address(None));
        }
        hub.broadcast_except(self.id, TransportEvent::Remove(membership(&old)));
    }

    fn deliver(&self, destinations: &[Address], envelope: &Envelope) -> Result<()> {
        self.network.sends.fetch_add(1, Ordering::AcqRel);
        let frame = EnvelopeCodec::encode(envelope)?;

        let hub = self.network.lock();
        for destination in destinations {
            match hub.find(destination) {
                Some(endpoint) => {
                    let copy = EnvelopeCodec::decode(&frame)?;
                    Hub::push(endpoint, TransportEvent::Message(copy));
                }
                None => {
                    tracing::debug!("No endpoint at {}, dropping envelope", destination);
                }
            }
        }
        Ok(())
    }
}

impl Transport for MemoryTransport {
    type Connection = MemoryLink;

    fn send<'a>(
        &'a self,
        destinations: &'a [Address],
        envelope: Envelope,
    ) -> BoxFuture<'a, Result<()>> {
        let result = self.deliver(destinations, &envelope);
        Box::pin(async move { result })
    }

    fn add_connection(&self, connection: MemoryLink) -> Result<()> {
        match connection {
            MemoryLink::Join(address) => self.claim(address),
            MemoryLink::Leave => {
                self.release();
                Ok(())
            }
        }
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.release();
        self.network.lock().endpoints.remove(&self.id);
    }
}
