//! Bound on concurrent and waiting render jobs.
//!
//! `try_enter` is the admission decision and never waits: it hands out a
//! ticket while fewer than `max_concurrent + max_queued` jobs are admitted.
//! A ticket then waits for one of the `max_concurrent` run slots. Both are
//! released on drop.

use phishnet_core::config::AdmissionConfig;
use phishnet_core::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Clone)]
pub struct Admission {
    slots: Arc<Semaphore>,
    admitted: Arc<AtomicUsize>,
    max_concurrent: usize,
    capacity: usize,
}

impl Admission {
    pub fn new(max_concurrent: usize, max_queued: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            slots: Arc::new(Semaphore::new(max_concurrent)),
            admitted: Arc::new(AtomicUsize::new(0)),
            max_concurrent,
            capacity: max_concurrent + max_queued,
        }
    }

    pub fn from_config(config: &AdmissionConfig) -> Self {
        Self::new(config.max_concurrent_jobs, config.max_queued_jobs)
    }

    /// Admit one job or refuse with [`Error::Busy`].
    pub fn try_enter(&self) -> Result<AdmissionTicket> {
        let capacity = self.capacity;
        self.admitted
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < capacity).then_some(n + 1)
            })
            .map_err(|_| Error::Busy("render queue is full".into()))?;
        Ok(AdmissionTicket {
            slots: self.slots.clone(),
            admitted: self.admitted.clone(),
        })
    }

    /// Jobs admitted and not yet finished, running or waiting.
    pub fn admitted(&self) -> usize {
        self.admitted.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.max_concurrent - self.slots.available_permits()
    }
}

/// An admitted job that may still be waiting for a run slot.
pub struct AdmissionTicket {
    slots: Arc<Semaphore>,
    admitted: Arc<AtomicUsize>,
}

impl AdmissionTicket {
    /// Wait for a run slot.
    pub async fn acquire(self) -> Result<AdmissionPermit> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Busy("admission closed".into()))?;
        Ok(AdmissionPermit {
            _slot: permit,
            _ticket: self,
        })
    }
}

impl Drop for AdmissionTicket {
    fn drop(&mut self) {
        self.admitted.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A running job's slot.
pub struct AdmissionPermit {
    _slot: OwnedSemaphorePermit,
    _ticket: AdmissionTicket,
}
