/// Worker Pool - Bounded concurrent grading
///
/// Each in-flight submission holds one slot (a semaphore permit) from
/// dequeue until its outcome is handed to the result sink, so a worker never
/// pulls more jobs than it can grade. Every running job is registered with
/// its cancel handle so it can be cancelled by id or all at once on shutdown.

use crate::cancel::{cancel_pair, CancelHandle};
use crate::grader::{GradeError, GradeOutcome, Grader};
use crate::sandbox::Sandbox;
use grader_common::types::JobRequest;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// A graded (or abandoned) job on its way to the result sink
#[derive(Debug)]
pub struct JobOutcome {
    pub job: JobRequest,
    pub outcome: Result<GradeOutcome, GradeError>,
}

/// A reserved unit of grading capacity
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

type Registry = Arc<Mutex<HashMap<Uuid, CancelHandle>>>;

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<Uuid, CancelHandle>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct WorkerPool<S> {
    grader: Arc<Grader<S>>,
    slots: Arc<Semaphore>,
    capacity: usize,
    active: Registry,
    outcomes: mpsc::Sender<JobOutcome>,
}

impl<S> Clone for WorkerPool<S> {
    fn clone(&self) -> Self {
        Self {
            grader: self.grader.clone(),
            slots: self.slots.clone(),
            capacity: self.capacity,
            active: self.active.clone(),
            outcomes: self.outcomes.clone(),
        }
    }
}

impl<S: Sandbox + 'static> WorkerPool<S> {
    pub fn new(grader: Grader<S>, capacity: usize) -> (Self, mpsc::Receiver<JobOutcome>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity * 2);
        let pool = Self {
            grader: Arc::new(grader),
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            active: Arc::new(Mutex::new(HashMap::new())),
            outcomes: tx,
        };
        (pool, rx)
    }

    /// Wait for a free slot
    pub async fn reserve(&self) -> anyhow::Result<Slot> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| anyhow::anyhow!("worker pool closed: {}", e))?;
        Ok(Slot { _permit: permit })
    }

    /// Grade `job` in the background on a reserved slot
    pub fn spawn(&self, slot: Slot, job: JobRequest) -> JoinHandle<()> {
        let (handle, signal) = cancel_pair();
        lock(&self.active).insert(job.id, handle);

        let grader = self.grader.clone();
        let active = self.active.clone();
        let outcomes = self.outcomes.clone();

        tokio::spawn(async move {
            let outcome = grader.grade(&job.submission, &job.problem, &signal).await;
            lock(&active).remove(&job.id);

            let job_id = job.id;
            if outcomes.send(JobOutcome { job, outcome }).await.is_err() {
                warn!(job_id = %job_id, "Result sink closed; dropping outcome");
            }
            drop(slot);
        })
    }

    /// Raise the cancel signal of a running job; false if it is not running here
    pub fn cancel(&self, job_id: &Uuid) -> bool {
        match lock(&self.active).get(job_id) {
            Some(handle) => {
                debug!(job_id = %job_id, "Cancelling job");
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for handle in lock(&self.active).values() {
            handle.cancel();
        }
    }

    pub fn monitor(&self) -> PoolMonitor {
        PoolMonitor {
            slots: self.slots.clone(),
            capacity: self.capacity,
            active: self.active.clone(),
        }
    }

    /// Wait until every slot is free again; false on timeout
    pub async fn drain(&self, timeout: Duration) -> bool {
        let all = self.capacity as u32;
        matches!(
            tokio::time::timeout(timeout, self.slots.acquire_many(all)).await,
            Ok(Ok(_))
        )
    }
}

/// Read-only view of pool occupancy
#[derive(Clone)]
pub struct PoolMonitor {
    slots: Arc<Semaphore>,
    capacity: usize,
    active: Registry,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStatus {
    pub capacity: usize,
    pub available_slots: usize,
    pub active_jobs: Vec<Uuid>,
}

impl PoolMonitor {
    pub fn active_jobs(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = lock(&self.active).keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            capacity: self.capacity,
            available_slots: self.slots.available_permits(),
            active_jobs: self.active_jobs(),
        }
    }
}
