//! Session-scoped read projections over the job registry.
//!
//! No state of its own: every query re-reads the registry, so pollers always
//! see the latest progress of in-flight jobs.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::registry::{JobRecord, JobRegistry, JobStatus};

/// Per-status counts for one session.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub total: usize,
    pub queued: usize,
    pub processing: usize,
    pub cancelling: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

#[derive(Clone)]
pub struct SessionAggregator {
    registry: Arc<JobRegistry>,
}

impl SessionAggregator {
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self { registry }
    }

    /// Snapshot of all jobs belonging to the given sessions. Unknown session
    /// ids contribute nothing; an empty set yields an empty list.
    pub fn jobs(&self, sessions: &HashSet<String>) -> Vec<JobRecord> {
        self.registry.list_by_sessions(sessions)
    }

    /// Status breakdown for one session.
    pub fn summarize(&self, session_id: &str) -> SessionSummary {
        let sessions: HashSet<String> = std::iter::once(session_id.to_string()).collect();
        let mut summary = SessionSummary {
            session_id: session_id.to_string(),
            ..SessionSummary::default()
        };
        for record in self.registry.list_by_sessions(&sessions) {
            summary.total += 1;
            match record.status {
                JobStatus::Queued => summary.queued += 1,
                JobStatus::Processing => summary.processing += 1,
                JobStatus::Cancelling => summary.cancelling += 1,
                JobStatus::Completed => summary.completed += 1,
                JobStatus::Failed => summary.failed += 1,
                JobStatus::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Language;

    const MODEL: &str = "distil_large_v3_ptbr";

    #[test]
    fn summary_counts_by_status() {
        let registry = Arc::new(JobRegistry::new());
        let aggregator = SessionAggregator::new(Arc::clone(&registry));

        registry.create("s1", "q.wav", MODEL, Language::Portuguese);
        let processing = registry.create("s1", "p.wav", MODEL, Language::Portuguese);
        registry.try_claim_for_processing(&processing.id).unwrap();
        let failed = registry.create("s1", "f.wav", MODEL, Language::Portuguese);
        registry.try_claim_for_processing(&failed.id).unwrap();
        registry.finish_failure(&failed.id, "boom".to_string());
        registry.create("other", "x.wav", MODEL, Language::Portuguese);

        let summary = aggregator.summarize("s1");
        assert_eq!(summary.total, 3);
        assert_eq!(summary.queued, 1);
        assert_eq!(summary.processing, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.completed, 0);
    }

    #[test]
    fn projection_reflects_live_progress_without_caching() {
        let registry = Arc::new(JobRegistry::new());
        let aggregator = SessionAggregator::new(Arc::clone(&registry));

        let record = registry.create("s1", "a.wav", MODEL, Language::Portuguese);
        registry.try_claim_for_processing(&record.id).unwrap();

        let sessions: HashSet<String> = std::iter::once("s1".to_string()).collect();
        registry.update_progress(&record.id, 30, None);
        assert_eq!(aggregator.jobs(&sessions)[0].progress, 30);

        registry.update_progress(&record.id, 60, None);
        assert_eq!(aggregator.jobs(&sessions)[0].progress, 60);
    }

    #[test]
    fn unknown_session_summarizes_empty() {
        let registry = Arc::new(JobRegistry::new());
        let aggregator = SessionAggregator::new(registry);
        let summary = aggregator.summarize("ghost");
        assert_eq!(summary.total, 0);
    }
}
