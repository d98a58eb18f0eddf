use super::events::DopplerEvent;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower_service::Service;

/// A metric sink that consumes [`DopplerEvent`]s. Implemented as a
/// `tower_service::Service` so it composes with layering combinators;
/// `poll_ready`/`call` gives every implementer an explicit backpressure seam
/// even though none of ours currently need it.
pub trait MetricSink:
    tower_service::Service<DopplerEvent, Response = (), Error = Infallible> + Clone + Send + 'static
where
    Self::Future: Send,
{
}

impl<S> MetricSink for S
where
    S: tower_service::Service<DopplerEvent, Response = (), Error = Infallible> + Clone + Send + 'static,
    S::Future: Send,
{
}

/// Best-effort emit: swallow errors, don't block the caller waiting on
/// readiness beyond a single poll.
pub async fn emit<S>(sink: &mut S, event: DopplerEvent)
where
    S: tower_service::Service<DopplerEvent, Response = (), Error = Infallible>,
    S::Future: Send,
{
    use std::future::poll_fn;
    if poll_fn(|cx| sink.poll_ready(cx)).await.is_ok() {
        let _ = sink.call(event).await;
    }
}

/// Discards every event. Default sink for production paths that don't wire
/// up a collector.
#[derive(Clone, Debug, Default)]
pub struct NullMetricSink;

impl Service<DopplerEvent> for NullMetricSink {
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: DopplerEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

/// Routes every event through `tracing` at `debug` level.
#[derive(Clone, Debug, Default)]
pub struct LogMetricSink;

impl Service<DopplerEvent> for LogMetricSink {
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: DopplerEvent) -> Self::Future {
        tracing::debug!(event = %event, "doppler_event");
        Box::pin(async { Ok(()) })
    }
}

/// Records every event in memory, bounded, with an eviction counter. Used in
/// tests to assert that a particular drop/shed/population event fired.
#[derive(Clone, Debug)]
pub struct MemoryMetricSink {
    events: Arc<Mutex<Vec<DopplerEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemoryMetricSink {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn events(&self) -> Vec<DopplerEvent> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for MemoryMetricSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<DopplerEvent> for MemoryMetricSink {
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: DopplerEvent) -> Self::Future {
        let mut guard = self.events.lock().unwrap_or_else(|p| p.into_inner());
        if guard.len() >= self.capacity {
            guard.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push(event);
        Box::pin(async { Ok(()) })
    }
}
