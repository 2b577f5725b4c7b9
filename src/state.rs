use std::sync::{
    Arc,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::catalog::ModelCatalog;
use crate::config::Config;
use crate::events::EventSink;
use crate::metrics::Metrics;
use crate::upstream::UpstreamClient;
use crate::validate::RequestValidator;

#[derive(Clone)]
pub struct AppState {
    pub upstream: UpstreamClient,
    pub validator: RequestValidator,
    pub catalog: Arc<ModelCatalog>,
    pub admission: Admission,
    pub metrics: Metrics,
    pub sink: Arc<dyn EventSink>,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(
        config: &Config,
        sink: Arc<dyn EventSink>,
        metrics: Metrics,
        inflight_count: Arc<AtomicU64>,
    ) -> Result<Self, String> {
        let catalog = Arc::new(config.catalog());
        let validator = RequestValidator::new(
            catalog.clone(),
            config.models.default_model.clone(),
            config.models.strict_model,
            sink.clone(),
        );
        Ok(Self {
            upstream: UpstreamClient::new(&config.upstream)?,
            validator,
            catalog,
            admission: Admission::new(
                config.limits.max_inflight,
                config.limits.max_queued,
                inflight_count,
            ),
            metrics,
            sink,
            max_body_bytes: config.server.max_body_bytes,
        })
    }
}

/// Fixed number of in-flight slots plus a bounded wait queue. A request that
/// finds every slot taken and the queue full is turned away.
#[derive(Clone)]
pub struct Admission {
    permits: Arc<Semaphore>,
    inflight: Arc<AtomicU64>,
    queued: Arc<AtomicUsize>,
    max_queued: usize,
}

impl Admission {
    pub fn new(max_inflight: usize, max_queued: usize, inflight: Arc<AtomicU64>) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_inflight)),
            inflight,
            queued: Arc::new(AtomicUsize::new(0)),
            max_queued,
        }
    }

    pub async fn acquire(&self) -> Option<InflightGuard> {
        if let Ok(permit) = self.permits.clone().try_acquire_owned() {
            return Some(InflightGuard::new(permit, self.inflight.clone()));
        }
        let max_queued = self.max_queued;
        self.queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max_queued).then_some(n + 1)
            })
            .ok()?;
        let _waiting = QueueSlot(self.queued.clone());
        let permit = self.permits.clone().acquire_owned().await.ok()?;
        Some(InflightGuard::new(permit, self.inflight.clone()))
    }

    #[cfg(test)]
    pub fn inflight(&self) -> u64 {
        self.inflight.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }
}

struct QueueSlot(Arc<AtomicUsize>);

impl Drop for QueueSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct InflightGuard {
    _permit: OwnedSemaphorePermit,
    counter: Arc<AtomicU64>,
}

impl InflightGuard {
    pub fn new(permit: OwnedSemaphorePermit, counter: Arc<AtomicU64>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self {
            _permit: permit,
            counter,
        }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}
