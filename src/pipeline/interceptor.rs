//! Interceptor trait and closure adapter.
//!
//! An interceptor receives the envelope by value and either hands it on
//! (possibly modified) or rejects it:
//!
//! ```ignore
//! pipeline.on(Stage::OutgoingRequest, |mut env: Envelope| async move {
//!     if let Envelope::Request(req) = &mut env {
//!         req.query.insert("token".into(), "abc".into());
//!     }
//!     Ok(env)
//! });
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use thiserror::Error;

use crate::envelope::Envelope;

/// Boxed future used at trait seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of an interceptor: continue with the envelope, or abort.
pub type Verdict = std::result::Result<Envelope, Rejection>;

/// Reason an interceptor aborted a chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct Rejection {
    reason: String,
}

impl Rejection {
    /// Create a rejection with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Get the reason.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// A handler invoked at a pipeline stage.
pub trait Interceptor: Send + Sync + 'static {
    /// Inspect the envelope and decide whether processing continues.
    fn intercept(&self, envelope: Envelope) -> BoxFuture<'static, Verdict>;
}

/// Adapter turning an async closure into an [`Interceptor`].
pub struct FnInterceptor<F, Fut>
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Verdict> + Send + 'static,
{
    f: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnInterceptor<F, Fut>
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Verdict> + Send + 'static,
{
    /// Wrap a closure.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Interceptor for FnInterceptor<F, Fut>
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Verdict> + Send + 'static,
{
    fn intercept(&self, envelope: Envelope) -> BoxFuture<'static, Verdict> {
        Box::pin((self.f)(envelope))
    }
}
