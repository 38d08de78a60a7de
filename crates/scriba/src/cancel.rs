//! Cancellation intent, mediated between API callers and worker slots.
//!
//! Cancellation is cooperative: the coordinator records intent in the
//! registry (the `cancelling` status is the flag workers poll) and the
//! executing slot acts on it at its next checkpoint. Nothing here stops an
//! in-flight engine call; worst case the computation runs to completion and
//! its result is discarded.

use std::sync::Arc;

use serde::Serialize;

use crate::registry::{CancelDisposition, JobRegistry, JobStatus};

/// What a cancel request achieved: whether it (or an earlier request) took
/// effect, and the status the job is now in.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelReceipt {
    pub accepted: bool,
    pub status: JobStatus,
}

#[derive(Clone)]
pub struct CancellationCoordinator {
    registry: Arc<JobRegistry>,
}

impl CancellationCoordinator {
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self { registry }
    }

    /// Requests cancellation of one job. Idempotent: repeat calls return the
    /// same receipt a single call would have produced. `None` means the job
    /// id is unknown.
    pub fn request_cancel(&self, job_id: &str) -> Option<CancelReceipt> {
        let receipt = match self.registry.begin_cancel(job_id) {
            CancelDisposition::NotFound => return None,
            CancelDisposition::CancelledWhileQueued => {
                log::info!("Job {job_id} cancelled before dispatch");
                CancelReceipt {
                    accepted: true,
                    status: JobStatus::Cancelled,
                }
            }
            CancelDisposition::MarkedCancelling => {
                log::info!("Job {job_id} marked cancelling; awaiting worker checkpoint");
                CancelReceipt {
                    accepted: true,
                    status: JobStatus::Cancelling,
                }
            }
            CancelDisposition::AlreadyCancelling => CancelReceipt {
                accepted: true,
                status: JobStatus::Cancelling,
            },
            CancelDisposition::AlreadyTerminal(status) => CancelReceipt {
                accepted: false,
                status,
            },
        };
        Some(receipt)
    }

    /// Cancels every non-terminal job in a session; returns how many jobs
    /// this request newly affected.
    pub fn request_cancel_session(&self, session_id: &str) -> usize {
        let mut affected = 0;
        for job_id in self.registry.session_job_ids(session_id) {
            match self.registry.begin_cancel(&job_id) {
                CancelDisposition::CancelledWhileQueued
                | CancelDisposition::MarkedCancelling => affected += 1,
                _ => {}
            }
        }
        if affected > 0 {
            log::info!("Cancelled {affected} jobs in session {session_id}");
        }
        affected
    }

    /// The flag worker slots poll between processing checkpoints.
    pub fn is_cancelled(&self, job_id: &str) -> bool {
        self.registry.is_cancel_requested(job_id)
    }

    /// A cancellation check bound to one job, for handing into an engine.
    pub fn check_for(&self, job_id: &str) -> impl Fn() -> bool + Send + Sync {
        let registry = Arc::clone(&self.registry);
        let job_id = job_id.to_string();
        move || registry.is_cancel_requested(&job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Language;

    const MODEL: &str = "distil_large_v3_ptbr";

    fn setup() -> (Arc<JobRegistry>, CancellationCoordinator) {
        let registry = Arc::new(JobRegistry::new());
        let coordinator = CancellationCoordinator::new(Arc::clone(&registry));
        (registry, coordinator)
    }

    #[test]
    fn unknown_job_yields_none() {
        let (_, coordinator) = setup();
        assert!(coordinator.request_cancel("nope").is_none());
    }

    #[test]
    fn queued_job_cancels_immediately() {
        let (registry, coordinator) = setup();
        let record = registry.create("s1", "a.wav", MODEL, Language::Portuguese);

        let receipt = coordinator.request_cancel(&record.id).unwrap();
        assert!(receipt.accepted);
        assert_eq!(receipt.status, JobStatus::Cancelled);
        assert_eq!(registry.get(&record.id).unwrap().status, JobStatus::Cancelled);
    }

    #[test]
    fn processing_job_enters_cancelling_and_repeat_is_idempotent() {
        let (registry, coordinator) = setup();
        let record = registry.create("s1", "a.wav", MODEL, Language::Portuguese);
        registry.try_claim_for_processing(&record.id).unwrap();

        let first = coordinator.request_cancel(&record.id).unwrap();
        let second = coordinator.request_cancel(&record.id).unwrap();
        assert!(first.accepted && second.accepted);
        assert_eq!(first.status, JobStatus::Cancelling);
        assert_eq!(second.status, JobStatus::Cancelling);
        assert!(coordinator.is_cancelled(&record.id));
    }

    #[test]
    fn terminal_job_reports_existing_status() {
        let (registry, coordinator) = setup();
        let record = registry.create("s1", "a.wav", MODEL, Language::Portuguese);
        registry.try_claim_for_processing(&record.id).unwrap();
        registry.finish_failure(&record.id, "boom".to_string());

        let receipt = coordinator.request_cancel(&record.id).unwrap();
        assert!(!receipt.accepted);
        assert_eq!(receipt.status, JobStatus::Failed);
    }

    #[test]
    fn session_cancel_counts_only_newly_affected() {
        let (registry, coordinator) = setup();
        let queued = registry.create("s1", "a.wav", MODEL, Language::Portuguese);
        let processing = registry.create("s1", "b.wav", MODEL, Language::Portuguese);
        let done = registry.create("s1", "c.wav", MODEL, Language::Portuguese);
        registry.create("other", "d.wav", MODEL, Language::Portuguese);

        registry.try_claim_for_processing(&processing.id).unwrap();
        registry.try_claim_for_processing(&done.id).unwrap();
        registry.finish_failure(&done.id, "boom".to_string());

        assert_eq!(coordinator.request_cancel_session("s1"), 2);
        assert_eq!(registry.get(&queued.id).unwrap().status, JobStatus::Cancelled);
        assert_eq!(
            registry.get(&processing.id).unwrap().status,
            JobStatus::Cancelling
        );

        // Second sweep affects nothing new.
        assert_eq!(coordinator.request_cancel_session("s1"), 0);
        assert_eq!(coordinator.request_cancel_session("unknown"), 0);
    }

    #[test]
    fn check_for_tracks_flag() {
        let (registry, coordinator) = setup();
        let record = registry.create("s1", "a.wav", MODEL, Language::Portuguese);
        registry.try_claim_for_processing(&record.id).unwrap();

        let check = coordinator.check_for(&record.id);
        assert!(!check());
        coordinator.request_cancel(&record.id);
        assert!(check());
    }
}
