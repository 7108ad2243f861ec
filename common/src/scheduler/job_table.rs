// In-process job state table owned by the engine

use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// `Idle -> Due -> Running -> Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Due,
    Running,
}

/// Tracks which jobs are due or running in this process.
///
/// A job that is `Running` cannot be started again until its `RunSlot` is dropped.
#[derive(Debug, Default)]
pub struct JobTable {
    states: Mutex<HashMap<Uuid, JobState>>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn states(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, JobState>> {
        self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self, job_id: Uuid) -> JobState {
        self.states()
            .get(&job_id)
            .copied()
            .unwrap_or(JobState::Idle)
    }

    /// Returns false when the job is already running
    pub fn mark_due(&self, job_id: Uuid) -> bool {
        let mut states = self.states();
        match states.get(&job_id) {
            Some(JobState::Running) => false,
            _ => {
                states.insert(job_id, JobState::Due);
                true
            }
        }
    }

    /// Move the job to `Running`; `None` if it already is
    pub fn begin(&self, job_id: Uuid) -> Option<RunSlot<'_>> {
        let mut states = self.states();
        if states.get(&job_id) == Some(&JobState::Running) {
            return None;
        }
        states.insert(job_id, JobState::Running);
        Some(RunSlot {
            table: self,
            job_id,
        })
    }

    pub fn running_count(&self) -> usize {
        self.states()
            .values()
            .filter(|state| **state == JobState::Running)
            .count()
    }
}

/// Held for the duration of a run; returns the job to `Idle` on drop
#[derive(Debug)]
pub struct RunSlot<'a> {
    table: &'a JobTable,
    job_id: Uuid,
}

impl RunSlot<'_> {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }
}

impl Drop for RunSlot<'_> {
    fn drop(&mut self) {
        self.table.states().remove(&self.job_id);
    }
}
