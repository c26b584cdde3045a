//! Local address and connectivity tracking.
//!
//! The transport assigns (and withdraws) the node's address. Connectivity is
//! derived from it: a node holding an address is connected. [`AddressState`]
//! reports a [`Connectivity`] transition only when a notification flips it,
//! while every change, including re-addressing, is visible through
//! [`AddressState::watch`].

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Transport-assigned endpoint identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Create an address from any string-like value.
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// Get the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One destination address or a list of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destinations {
    /// A single address.
    One(Address),
    /// Several addresses (may contain duplicates before normalization).
    Many(Vec<Address>),
}

impl Destinations {
    /// Flatten into a list, dropping duplicates while keeping first-seen order.
    pub fn into_list(self) -> Vec<Address> {
        match self {
            Destinations::One(a) => vec![a],
            Destinations::Many(list) => {
                let mut out: Vec<Address> = Vec::with_capacity(list.len());
                for a in list {
                    if !out.contains(&a) {
                        out.push(a);
                    }
                }
                out
            }
        }
    }
}

impl From<Address> for Destinations {
    fn from(a: Address) -> Self {
        Destinations::One(a)
    }
}

impl From<&Address> for Destinations {
    fn from(a: &Address) -> Self {
        Destinations::One(a.clone())
    }
}

impl From<&str> for Destinations {
    fn from(s: &str) -> Self {
        Destinations::One(Address::from(s))
    }
}

impl From<Vec<Address>> for Destinations {
    fn from(list: Vec<Address>) -> Self {
        Destinations::Many(list)
    }
}

impl From<Vec<&str>> for Destinations {
    fn from(list: Vec<&str>) -> Self {
        Destinations::Many(list.into_iter().map(Address::from).collect())
    }
}

/// Connectivity transition caused by an address notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connectivity {
    /// The node gained an address.
    Connected(Address),
    /// The node lost its address.
    Disconnected,
}

/// Holds the node's current address.
#[derive(Debug)]
pub struct AddressState {
    current: watch::Sender<Option<Address>>,
}

impl AddressState {
    /// Create a disconnected state.
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self { current }
    }

    /// Get the current address, `None` while disconnected.
    pub fn current(&self) -> Option<Address> {
        self.current.borrow().clone()
    }

    /// Check whether the node holds an address.
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.current.borrow().is_some()
    }

    /// Apply a transport address notification.
    ///
    /// Returns the transition if connectivity flipped.
    pub fn apply(&self, address: Option<Address>) -> Option<Connectivity> {
        let was_connected = self.is_connected();
        let transition = match (&address, was_connected) {
            (Some(a), false) => Some(Connectivity::Connected(a.clone())),
            (None, true) => Some(Connectivity::Disconnected),
            _ => None,
        };

        self.current.send_if_modified(|cur| {
            if *cur == address {
                false
            } else {
                *cur = address;
                true
            }
        });

        transition
    }

    /// Subscribe to every address change.
    pub fn watch(&self) -> watch::Receiver<Option<Address>> {
        self.current.subscribe()
    }
}

impl Default for AddressState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_disconnected() {
        let state = AddressState::new();
        assert!(!state.is_connected());
        assert_eq!(state.current(), None);
    }

    #[test]
    fn test_transitions_only_on_flip() {
        let state = AddressState::new();

        assert_eq!(
            state.apply(Some(Address::from("a"))),
            Some(Connectivity::Connected(Address::from("a")))
        );
        // Re-addressing while connected is not a flip.
        assert_eq!(state.apply(Some(Address::from("b"))), None);
        assert_eq!(state.current(), Some(Address::from("b")));

        assert_eq!(state.apply(None), Some(Connectivity::Disconnected));
        assert_eq!(state.apply(None), None);
        assert!(!state.is_connected());
    }

    #[test]
    fn test_watch_sees_readdressing() {
        let state = AddressState::new();
        let mut rx = state.watch();

        state.apply(Some(Address::from("a")));
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), Some(Address::from("a")));

        state.apply(Some(Address::from("a")));
        assert!(!rx.has_changed().unwrap());

        state.apply(Some(Address::from("b")));
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn test_destinations_normalize() {
        let d: Destinations = vec!["a", "b", "a", "c"].into();
        assert_eq!(
            d.into_list(),
            vec![Address::from("a"), Address::from("b"), Address::from("c")]
        );

        let single: Destinations = "x".into();
        assert_eq!(single.into_list(), vec![Address::from("x")]);
    }
}
