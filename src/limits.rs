//! Admission control for stream deliveries
//!
//! A fixed number of delivery slots. Admission either succeeds at once or
//! fails at once; nothing queues.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Concurrency ceiling for in-flight deliveries
#[derive(Debug)]
pub struct AdmissionController {
    /// In-flight deliveries
    active: AtomicUsize,
    /// Maximum concurrent deliveries
    max_concurrent: usize,
}

impl AdmissionController {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            active: AtomicUsize::new(0),
            max_concurrent,
        }
    }

    /// Take a slot if one is free
    pub fn try_admit(&self) -> bool {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < self.max_concurrent).then_some(active + 1)
            })
            .is_ok()
    }

    /// Give a slot back. Never drops below zero.
    pub fn release(&self) {
        let released = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                active.checked_sub(1)
            })
            .is_ok();
        if !released {
            tracing::warn!("admission release without a matching admit");
        }
    }

    /// Take a slot as a permit that releases it when dropped
    pub fn try_acquire(self: &Arc<Self>) -> Option<StreamPermit> {
        self.try_admit().then(|| StreamPermit {
            controller: Arc::clone(self),
        })
    }

    /// Current in-flight count
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Reset the counter on shutdown
    pub fn reset(&self) {
        self.active.store(0, Ordering::Release);
    }
}

/// One admitted delivery slot, released exactly once on drop
#[derive(Debug)]
pub struct StreamPermit {
    controller: Arc<AdmissionController>,
}

impl Drop for StreamPermit {
    fn drop(&mut self) {
        self.controller.release();
    }
}
