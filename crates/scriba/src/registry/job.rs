use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Language;
use crate::render::TranscriptResult;

/// Progress below this is too noisy to extrapolate an ETA from.
const MIN_PROGRESS_FOR_ETA: u8 = 5;

/// Lifecycle status of a transcription job.
///
/// `Cancelling` is a transient marker: cancellation was requested but the
/// owning worker has not observed it yet. `Completed`, `Failed` and
/// `Cancelled` are terminal; nothing transitions out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// The state graph. `Queued` may cancel directly (never dispatched) or
    /// via the `Cancelling` marker; `Cancelling` only ever resolves to
    /// `Cancelled`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match self {
            Queued => matches!(next, Processing | Cancelling | Cancelled),
            Processing => matches!(next, Completed | Failed | Cancelling | Cancelled),
            Cancelling => matches!(next, Cancelled),
            Completed | Failed | Cancelled => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Cancelling => "cancelling",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One transcription job as stored in the registry.
///
/// Exactly one of `result` / `error` is ever populated: `result` iff the job
/// completed, `error` iff it failed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    pub session_id: String,
    pub filename: String,
    pub model_id: String,
    pub language: Language,
    pub status: JobStatus,
    /// 0–100; monotonically non-decreasing while `processing`, pinned to 100
    /// on completion, frozen on failure/cancellation.
    pub progress: u8,
    /// Estimated completion time, recomputed on each progress update and
    /// cleared on any terminal transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TranscriptResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// When cancellation was requested, for reconciling workers that never
    /// observe the flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_requested_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub(crate) fn new(session_id: &str, filename: &str, model_id: &str, language: Language) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            filename: filename.to_string(),
            model_id: model_id.to_string(),
            language,
            status: JobStatus::Queued,
            progress: 0,
            eta: None,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            cancel_requested_at: None,
        }
    }
}

/// Extrapolates a completion timestamp from elapsed time and progress.
/// Suppressed for early progress (too noisy) and whenever the estimate would
/// land in the past.
pub fn estimate_completion(
    started_at: DateTime<Utc>,
    progress: u8,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if progress <= MIN_PROGRESS_FOR_ETA || progress > 100 {
        return None;
    }
    let elapsed_ms = (now - started_at).num_milliseconds();
    if elapsed_ms <= 0 {
        return None;
    }
    let total_ms = elapsed_ms as f64 / (f64::from(progress) / 100.0);
    let remaining_ms = total_ms - elapsed_ms as f64;
    if remaining_ms < 0.0 {
        return None;
    }
    Some(now + Duration::milliseconds(remaining_ms as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Language;

    #[test]
    fn terminal_states_have_no_exits() {
        for terminal in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            assert!(terminal.is_terminal());
            for next in [
                JobStatus::Queued,
                JobStatus::Processing,
                JobStatus::Cancelling,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn cancelling_only_resolves_to_cancelled() {
        assert!(JobStatus::Cancelling.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Cancelling.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Cancelling.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Cancelling.can_transition_to(JobStatus::Processing));
    }

    #[test]
    fn queued_can_cancel_directly() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Processing));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn new_record_starts_queued() {
        let record = JobRecord::new("s1", "a.wav", "distil_large_v3_ptbr", Language::Portuguese);
        assert_eq!(record.status, JobStatus::Queued);
        assert_eq!(record.progress, 0);
        assert!(record.eta.is_none());
        assert!(record.result.is_none());
        assert!(record.error.is_none());
        assert!(!record.id.is_empty());
    }

    #[test]
    fn eta_suppressed_for_early_progress() {
        let started = Utc::now() - Duration::seconds(10);
        assert!(estimate_completion(started, 0, Utc::now()).is_none());
        assert!(estimate_completion(started, 5, Utc::now()).is_none());
    }

    #[test]
    fn eta_extrapolates_linearly() {
        let now = Utc::now();
        let started = now - Duration::seconds(30);
        // 50% in 30s: roughly 30s to go.
        let eta = estimate_completion(started, 50, now).unwrap();
        let remaining = (eta - now).num_seconds();
        assert!((29..=31).contains(&remaining), "remaining = {remaining}");
    }

    #[test]
    fn eta_collapses_to_now_at_full_progress() {
        let now = Utc::now();
        let started = now - Duration::seconds(30);
        // 100%: nothing remains, and the estimate would be "now".
        let eta = estimate_completion(started, 100, now);
        assert_eq!(eta, Some(now));
    }
}
