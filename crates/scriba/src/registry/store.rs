//! The authoritative in-memory job store.
//!
//! Every read and write crosses the `RwLock`; race-prone check-then-act
//! sequences (claiming a queued job, finishing a job that may have been
//! cancelled meanwhile) are single methods that resolve the race under one
//! write lock. The raw transition itself is assertion-level: an illegal edge
//! can only mean a dispatcher bug.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::models::Language;
use crate::registry::job::{JobRecord, JobStatus};
use crate::render::TranscriptResult;

/// Outcome of a cancellation request, resolved under the registry lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelDisposition {
    NotFound,
    /// Job was still queued; it is now `cancelled` and will never dispatch.
    CancelledWhileQueued,
    /// Job was processing; it is now `cancelling` until the worker observes
    /// the flag.
    MarkedCancelling,
    /// A previous request already marked it; nothing to do.
    AlreadyCancelling,
    /// Job had already reached the given terminal status.
    AlreadyTerminal(JobStatus),
}

/// Outcome of a worker reporting a finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishDisposition {
    /// The reported outcome was written to the record.
    Applied,
    /// Cancellation won the race; the reported outcome was discarded and the
    /// job is `cancelled`.
    CancelledInstead,
    /// The job was already terminal (e.g. force-cancelled by the sweeper);
    /// the report was dropped.
    Stale,
}

struct Inner {
    jobs: HashMap<String, JobRecord>,
    /// Secondary index: session id -> job ids in creation order.
    by_session: HashMap<String, Vec<String>>,
}

pub struct JobRegistry {
    inner: RwLock<Inner>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                jobs: HashMap::new(),
                by_session: HashMap::new(),
            }),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// The one place a status actually changes. Panics on an illegal edge:
    /// callers resolve races under the write lock first, so hitting the
    /// assertion means the dispatcher broke the state graph.
    fn apply_transition(record: &mut JobRecord, next: JobStatus) {
        assert!(
            record.status.can_transition_to(next),
            "illegal job transition {} -> {} for job {}",
            record.status,
            next,
            record.id
        );
        log::debug!("Job {}: {} -> {}", record.id, record.status, next);
        record.status = next;
        if next.is_terminal() {
            record.finished_at = Some(Utc::now());
            record.eta = None;
        }
    }

    /// Inserts a new job in `queued` and returns a snapshot of it.
    pub fn create(
        &self,
        session_id: &str,
        filename: &str,
        model_id: &str,
        language: Language,
    ) -> JobRecord {
        let record = JobRecord::new(session_id, filename, model_id, language);
        let mut inner = self.write();
        inner
            .by_session
            .entry(session_id.to_string())
            .or_default()
            .push(record.id.clone());
        inner.jobs.insert(record.id.clone(), record.clone());
        log::info!("Created job {} for session {}", record.id, session_id);
        record
    }

    /// Inserts a job that completes immediately with a cached result. Walks
    /// the normal `queued -> processing -> completed` path under one lock so
    /// no intermediate state is ever observable.
    pub fn create_completed(
        &self,
        session_id: &str,
        filename: &str,
        model_id: &str,
        language: Language,
        result: TranscriptResult,
    ) -> JobRecord {
        let mut record = JobRecord::new(session_id, filename, model_id, language);
        let now = Utc::now();
        Self::apply_transition(&mut record, JobStatus::Processing);
        record.started_at = Some(now);
        Self::apply_transition(&mut record, JobStatus::Completed);
        record.progress = 100;
        record.result = Some(result);

        let mut inner = self.write();
        inner
            .by_session
            .entry(session_id.to_string())
            .or_default()
            .push(record.id.clone());
        inner.jobs.insert(record.id.clone(), record.clone());
        log::info!(
            "Created job {} for session {} from cached result",
            record.id,
            session_id
        );
        record
    }

    /// Current snapshot of one job.
    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.read().jobs.get(job_id).cloned()
    }

    /// Snapshots of all jobs whose session is in the set, newest first.
    /// Unknown sessions contribute nothing; an empty set yields an empty
    /// result.
    pub fn list_by_sessions(&self, sessions: &HashSet<String>) -> Vec<JobRecord> {
        let inner = self.read();
        let mut records: Vec<JobRecord> = sessions
            .iter()
            .filter_map(|session| inner.by_session.get(session))
            .flatten()
            .filter_map(|id| inner.jobs.get(id))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    /// Job ids of one session in creation order.
    pub fn session_job_ids(&self, session_id: &str) -> Vec<String> {
        self.read()
            .by_session
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Applies a progress tick. Legal only while `processing`; a tick that
    /// arrives after the job moved on (cancellation, terminal) is dropped
    /// silently to tolerate the worker/canceller race. Progress never
    /// decreases; the ETA is replaced wholesale on every applied tick.
    pub fn update_progress(&self, job_id: &str, percent: u8, eta: Option<DateTime<Utc>>) {
        let mut inner = self.write();
        let Some(record) = inner.jobs.get_mut(job_id) else {
            return;
        };
        if record.status != JobStatus::Processing {
            return;
        }
        record.progress = record.progress.max(percent.min(100));
        record.eta = eta;
    }

    /// Atomically claims a queued job for a worker slot. Returns the
    /// `started_at` timestamp on success, `None` if the job is no longer
    /// queued (cancelled before dispatch, or gone).
    pub fn try_claim_for_processing(&self, job_id: &str) -> Option<DateTime<Utc>> {
        let mut inner = self.write();
        let record = inner.jobs.get_mut(job_id)?;
        if record.status != JobStatus::Queued {
            return None;
        }
        Self::apply_transition(record, JobStatus::Processing);
        let now = Utc::now();
        record.started_at = Some(now);
        Some(now)
    }

    fn finish(&self, job_id: &str, outcome: FinishOutcome) -> FinishDisposition {
        let mut inner = self.write();
        let Some(record) = inner.jobs.get_mut(job_id) else {
            // Evicted mid-flight; nothing to record.
            return FinishDisposition::Stale;
        };
        match record.status {
            JobStatus::Processing => {
                match outcome {
                    FinishOutcome::Success(result) => {
                        Self::apply_transition(record, JobStatus::Completed);
                        record.progress = 100;
                        record.result = Some(result);
                    }
                    FinishOutcome::Failure(error) => {
                        Self::apply_transition(record, JobStatus::Failed);
                        record.error = Some(error);
                    }
                    FinishOutcome::Cancelled => {
                        Self::apply_transition(record, JobStatus::Cancelled);
                    }
                }
                FinishDisposition::Applied
            }
            JobStatus::Cancelling => {
                // Cancellation wins regardless of what the worker produced.
                Self::apply_transition(record, JobStatus::Cancelled);
                match outcome {
                    FinishOutcome::Cancelled => FinishDisposition::Applied,
                    _ => FinishDisposition::CancelledInstead,
                }
            }
            status if status.is_terminal() => FinishDisposition::Stale,
            status => {
                // A worker finished a job it never claimed.
                panic!("job {job_id} finished while {status}");
            }
        }
    }

    /// Records a successful transcription, unless cancellation already won.
    pub fn finish_success(&self, job_id: &str, result: TranscriptResult) -> FinishDisposition {
        self.finish(job_id, FinishOutcome::Success(result))
    }

    /// Records a failure with the engine's error detail preserved verbatim.
    pub fn finish_failure(&self, job_id: &str, error: String) -> FinishDisposition {
        self.finish(job_id, FinishOutcome::Failure(error))
    }

    /// Records that the worker observed the cancellation flag.
    pub fn finish_cancelled(&self, job_id: &str) -> FinishDisposition {
        self.finish(job_id, FinishOutcome::Cancelled)
    }

    /// Resolves a cancellation request under one lock. Idempotent: repeated
    /// calls (including concurrent ones) converge on the same terminal state
    /// without double transitions.
    pub fn begin_cancel(&self, job_id: &str) -> CancelDisposition {
        let mut inner = self.write();
        let Some(record) = inner.jobs.get_mut(job_id) else {
            return CancelDisposition::NotFound;
        };
        match record.status {
            JobStatus::Queued => {
                Self::apply_transition(record, JobStatus::Cancelled);
                CancelDisposition::CancelledWhileQueued
            }
            JobStatus::Processing => {
                Self::apply_transition(record, JobStatus::Cancelling);
                record.cancel_requested_at = Some(Utc::now());
                CancelDisposition::MarkedCancelling
            }
            JobStatus::Cancelling => CancelDisposition::AlreadyCancelling,
            status => CancelDisposition::AlreadyTerminal(status),
        }
    }

    /// True while the job should stop: the flag the worker's cancellation
    /// callback polls. A missing record (evicted mid-flight) also reads as
    /// cancelled so an orphaned worker stops early.
    pub fn is_cancel_requested(&self, job_id: &str) -> bool {
        match self.read().jobs.get(job_id) {
            Some(record) => matches!(
                record.status,
                JobStatus::Cancelling | JobStatus::Cancelled
            ),
            None => true,
        }
    }

    /// Sweeper reconciliation: forces a stuck `cancelling` job to
    /// `cancelled`. Returns false if the worker got there first.
    pub fn force_cancel(&self, job_id: &str) -> bool {
        let mut inner = self.write();
        let Some(record) = inner.jobs.get_mut(job_id) else {
            return false;
        };
        if record.status != JobStatus::Cancelling {
            return false;
        }
        Self::apply_transition(record, JobStatus::Cancelled);
        true
    }

    /// Jobs stuck in `cancelling` since before the given instant.
    pub fn stuck_cancelling(&self, requested_before: DateTime<Utc>) -> Vec<String> {
        self.read()
            .jobs
            .values()
            .filter(|r| {
                r.status == JobStatus::Cancelling
                    && r.cancel_requested_at
                        .map(|at| at < requested_before)
                        .unwrap_or(false)
            })
            .map(|r| r.id.clone())
            .collect()
    }

    /// Evicts terminal records that finished before the given instant,
    /// pruning the session index with them. Returns the evicted ids.
    pub fn evict_terminal(&self, finished_before: DateTime<Utc>) -> Vec<String> {
        let mut inner = self.write();
        let evicted: Vec<String> = inner
            .jobs
            .values()
            .filter(|r| {
                r.status.is_terminal()
                    && r.finished_at
                        .map(|at| at < finished_before)
                        .unwrap_or(false)
            })
            .map(|r| r.id.clone())
            .collect();

        for id in &evicted {
            if let Some(record) = inner.jobs.remove(id) {
                if let Some(ids) = inner.by_session.get_mut(&record.session_id) {
                    ids.retain(|jid| jid != id);
                    if ids.is_empty() {
                        inner.by_session.remove(&record.session_id);
                    }
                }
            }
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.read().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().jobs.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn backdate_finished(&self, job_id: &str, finished_at: DateTime<Utc>) {
        if let Some(record) = self.write().jobs.get_mut(job_id) {
            record.finished_at = Some(finished_at);
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate_cancel_request(&self, job_id: &str, requested_at: DateTime<Utc>) {
        if let Some(record) = self.write().jobs.get_mut(job_id) {
            record.cancel_requested_at = Some(requested_at);
        }
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

enum FinishOutcome {
    Success(TranscriptResult),
    Failure(String),
    Cancelled,
}
