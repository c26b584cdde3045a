//! Context handed to route handlers.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::address::Address;
use crate::envelope::RequestId;
use crate::error::Result;

/// Everything a route handler knows about the request it serves.
#[derive(Debug, Clone)]
pub struct RouteContext {
    /// ID of the request being served.
    request_id: RequestId,
    /// Address the response goes back to.
    src_address: Address,
    /// Query object sent by the requester.
    query: Map<String, Value>,
    /// Values captured from `:name` path segments.
    params: HashMap<String, String>,
}

impl RouteContext {
    /// Create a context with no captured params.
    pub fn new(request_id: RequestId, src_address: Address, query: Map<String, Value>) -> Self {
        Self {
            request_id,
            src_address,
            query,
            params: HashMap::new(),
        }
    }

    /// Get the request ID.
    #[inline]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Get the requester's address.
    #[inline]
    pub fn src_address(&self) -> &Address {
        &self.src_address
    }

    /// Get the query object.
    pub fn query(&self) -> &Map<String, Value> {
        &self.query
    }

    /// Deserialize the query object into a typed value.
    pub fn query_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.query.clone()))?)
    }

    /// Get a captured path parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// All captured path parameters.
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    pub(crate) fn with_params(mut self, params: HashMap<String, String>) -> Self {
        self.params = params;
        self
    }
}
