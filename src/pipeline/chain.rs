//! Stage registry and sequential chain execution.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::interceptor::{FnInterceptor, Interceptor, Verdict};
use super::Stage;
use crate::envelope::Envelope;

/// Handle identifying a registered interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterceptorId(u64);

#[derive(Clone)]
struct Entry {
    id: InterceptorId,
    once: bool,
    interceptor: Arc<dyn Interceptor>,
}

/// Ordered interceptor chains, one per [`Stage`].
///
/// Registration order is invocation order. The pipeline is cheap to share
/// behind an `Arc`; registration may happen while emissions are running.
#[derive(Default)]
pub struct InterceptorPipeline {
    stages: Mutex<HashMap<Stage, Vec<Entry>>>,
    next_id: AtomicU64,
}

impl InterceptorPipeline {
    /// Create a pipeline with every stage empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a persistent interceptor closure.
    pub fn on<F, Fut>(&self, stage: Stage, f: F) -> InterceptorId
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Verdict> + Send + 'static,
    {
        self.register(stage, FnInterceptor::new(f), false)
    }

    /// Register an interceptor closure that runs for a single emission.
    pub fn once<F, Fut>(&self, stage: Stage, f: F) -> InterceptorId
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Verdict> + Send + 'static,
    {
        self.register(stage, FnInterceptor::new(f), true)
    }

    /// Register any [`Interceptor`] implementation.
    pub fn register(
        &self,
        stage: Stage,
        interceptor: impl Interceptor,
        once: bool,
    ) -> InterceptorId {
        let id = InterceptorId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().entry(stage).or_default().push(Entry {
            id,
            once,
            interceptor: Arc::new(interceptor),
        });
        id
    }

    /// Remove an interceptor. Returns false if it was not registered.
    pub fn off(&self, stage: Stage, id: InterceptorId) -> bool {
        self.remove(stage, id)
    }

    /// Number of interceptors currently registered for a stage.
    pub fn len(&self, stage: Stage) -> usize {
        self.lock().get(&stage).map_or(0, Vec::len)
    }

    /// Check if a stage has no interceptors.
    pub fn is_empty(&self, stage: Stage) -> bool {
        self.len(stage) == 0
    }

    /// Run the stage's chain over an envelope.
    ///
    /// Interceptors run one after another; the first rejection stops the
    /// chain and is returned. An empty stage returns the envelope untouched.
    /// A once-interceptor is deregistered as it is invoked, so it runs on
    /// exactly one emission even when emissions overlap.
    pub async fn emit(&self, stage: Stage, mut envelope: Envelope) -> Verdict {
        let chain = self.snapshot(stage);

        for entry in chain {
            if entry.once && !self.remove(stage, entry.id) {
                // Claimed by a concurrent emission.
                continue;
            }
            envelope = entry.interceptor.intercept(envelope).await?;
        }

        Ok(envelope)
    }

    fn snapshot(&self, stage: Stage) -> Vec<Entry> {
        self.lock().get(&stage).cloned().unwrap_or_default()
    }

    fn remove(&self, stage: Stage, id: InterceptorId) -> bool {
        let mut stages = self.lock();
        let Some(list) = stages.get_mut(&stage) else {
            return false;
        };
        match list.iter().position(|e| e.id == id) {
            Some(pos) => {
                list.remove(pos);
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Stage, Vec<Entry>>> {
        // Entries stay consistent even if a holder panicked.
        self.stages.lock().unwrap_or_else(|e| e.into_inner())
    }
}
