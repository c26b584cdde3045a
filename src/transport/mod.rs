//! Transport module - the network the node exchanges envelopes over.
//!
//! A transport delivers envelopes to one or more addresses and reports what
//! happens on its side (inbound envelopes, address assignment, membership)
//! as [`TransportEvent`]s on an `mpsc` channel handed to the node builder.
//!
//! Provides:
//! - [`Transport`] - the trait a network implementation provides
//! - [`MemoryNetwork`] - an in-process multipoint network

mod memory;

pub use memory::{MemoryLink, MemoryNetwork, MemoryTransport, DEFAULT_CHANNEL_CAPACITY};

use serde_json::Value;

use crate::address::{Address, Destinations};
use crate::envelope::Envelope;
use crate::error::Result;
use crate::pipeline::BoxFuture;

/// Something that happened on the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// An envelope arrived.
    Message(Envelope),
    /// The local address was assigned (`Some`) or lost (`None`).
    Address(Option<Address>),
    /// Membership insert, passed through to node subscribers.
    Insert(Vec<Value>),
    /// Membership removal, passed through to node subscribers.
    Remove(Vec<Value>),
}

/// A point-to-multipoint network.
pub trait Transport: Send + Sync + 'static {
    /// Handle registered through [`Transport::add_connection`].
    type Connection: Send;

    /// Best-effort delivery of an envelope to every destination.
    fn send<'a>(&'a self, destinations: &'a [Address], envelope: Envelope)
        -> BoxFuture<'a, Result<()>>;

    /// Register a connection with the transport.
    fn add_connection(&self, connection: Self::Connection) -> Result<()>;

    /// Coerce one address or a list into the canonical list form.
    fn normalize_addresses(&self, destinations: Destinations) -> Vec<Address> {
        destinations.into_list()
    }
}
