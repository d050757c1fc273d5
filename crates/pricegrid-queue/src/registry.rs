//! Handler registry: job type -> handler

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::job::JobResult;
use crate::store::QueueError;

/// Work performed for one job type.
///
/// Delivery is at-least-once: a crash between a successful `handle` and the
/// status update runs the job again on a later pass. Handlers must be
/// idempotent or tolerate re-invocation.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, payload: &serde_json::Value) -> JobResult;
}

/// Adapts an async closure into a [`JobHandler`]
pub struct FnHandler<F> {
    f: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    async fn handle(&self, payload: &serde_json::Value) -> JobResult {
        (self.f)(payload.clone()).await
    }
}

pub(crate) fn validate_job_type(job_type: &str) -> Result<(), QueueError> {
    if job_type.trim().is_empty() {
        return Err(QueueError::InvalidJobType(job_type.to_string()));
    }
    Ok(())
}

/// Static mapping from job type to handler.
///
/// Built once at startup and then handed to the engine, which never mutates
/// it. Registration errors surface here rather than per job.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a job type
    pub fn register<H>(&mut self, job_type: &str, handler: H) -> Result<(), QueueError>
    where
        H: JobHandler + 'static,
    {
        self.register_arc(job_type, Arc::new(handler))
    }

    /// Register a shared handler (useful when one handler serves several types)
    pub fn register_arc(
        &mut self,
        job_type: &str,
        handler: Arc<dyn JobHandler>,
    ) -> Result<(), QueueError> {
        validate_job_type(job_type)?;
        if self.handlers.contains_key(job_type) {
            return Err(QueueError::DuplicateHandler(job_type.to_string()));
        }
        self.handlers.insert(job_type.to_string(), handler);
        Ok(())
    }

    /// Register an async closure
    pub fn register_fn<F, Fut>(&mut self, job_type: &str, f: F) -> Result<(), QueueError>
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        self.register(job_type, FnHandler::new(f))
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Registered job types, sorted
    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Startup check that every expected job type has a handler
    pub fn require(&self, job_types: &[&str]) -> Result<(), QueueError> {
        match job_types.iter().find(|t| !self.contains(t)) {
            Some(missing) => Err(QueueError::MissingHandler(missing.to_string())),
            None => Ok(()),
        }
    }

    /// Run the handler for `job_type`. Unknown types fail like any handler.
    pub async fn dispatch(&self, job_type: &str, payload: &serde_json::Value) -> JobResult {
        match self.handlers.get(job_type) {
            Some(handler) => handler.handle(payload).await,
            None => JobResult::Failure(format!("Unknown job type: {}", job_type)),
        }
    }
}
