//! The boundary facade the HTTP/CLI layer talks to.
//!
//! Owns the wiring: registry, worker pool, cancellation coordinator, session
//! aggregator, retention sweeper and the result cache. Validation faults are
//! rejected here synchronously and never create a job record.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::cache::ResultCache;
use crate::cancel::{CancelReceipt, CancellationCoordinator};
use crate::config::Settings;
use crate::engine::{EngineFactory, EngineInput};
use crate::error::{ScribaError, SubmitError};
use crate::hardware::HardwareProbe;
use crate::janitor::RetentionSweeper;
use crate::models::{resolve_available, Language, ModelCatalog};
use crate::package::{self, AudioEntry, DownloadPackage, PackageFormat, TextKind};
use crate::pool::WorkerPool;
use crate::registry::{JobRecord, JobRegistry, JobStatus};
use crate::session::{SessionAggregator, SessionSummary};

/// One uploaded file, as received by the transport layer.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Returned per created job at submission.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTicket {
    pub job_id: String,
    pub filename: String,
}

/// Slim per-job view for bulk listings; the result payload is omitted to
/// keep poll responses small.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: String,
    pub session_id: String,
    pub filename: String,
    pub model_id: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl JobSummary {
    fn from_record(record: &JobRecord) -> Self {
        Self {
            job_id: record.id.clone(),
            session_id: record.session_id.clone(),
            filename: record.filename.clone(),
            model_id: record.model_id.clone(),
            status: record.status,
            progress: record.progress,
            eta: record.eta,
            created_at: record.created_at,
        }
    }
}

/// Response of a session-wide cancellation.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelSessionReceipt {
    pub cancelled_count: usize,
}

pub struct TranscriptionService {
    settings: Settings,
    catalog: ModelCatalog,
    probe: Arc<dyn HardwareProbe>,
    registry: Arc<JobRegistry>,
    coordinator: CancellationCoordinator,
    aggregator: SessionAggregator,
    cache: Arc<ResultCache>,
    pool: WorkerPool,
    sweeper: RetentionSweeper,
    sweeper_handle: Option<JoinHandle<()>>,
    sweep_trigger: broadcast::Sender<()>,
}

impl TranscriptionService {
    /// Boots the orchestration core with the built-in model catalog.
    pub fn start(
        settings: Settings,
        factory: Arc<dyn EngineFactory>,
        probe: Arc<dyn HardwareProbe>,
    ) -> crate::error::Result<Self> {
        Self::start_with_catalog(settings, ModelCatalog::builtin(), factory, probe)
    }

    pub fn start_with_catalog(
        settings: Settings,
        catalog: ModelCatalog,
        factory: Arc<dyn EngineFactory>,
        probe: Arc<dyn HardwareProbe>,
    ) -> crate::error::Result<Self> {
        settings.validate()?;

        let registry = Arc::new(JobRegistry::new());
        let coordinator = CancellationCoordinator::new(Arc::clone(&registry));
        let aggregator = SessionAggregator::new(Arc::clone(&registry));
        let cache = Arc::new(ResultCache::new(
            settings.cache_capacity,
            settings.cache_ttl(),
        ));

        // Slots exist only for models usable right now; a model that becomes
        // available later (credential added, GPU attached) needs a restart to
        // get slots, but list_models reflects it immediately.
        let enabled: Vec<_> = resolve_available(
            &catalog,
            probe.snapshot(),
            settings.cloud_api_key.as_deref(),
        )
        .into_iter()
        .cloned()
        .collect();
        log::info!(
            "Enabled models: [{}]",
            enabled
                .iter()
                .map(|s| s.id)
                .collect::<Vec<_>>()
                .join(", ")
        );

        let pool = WorkerPool::start(
            Arc::clone(&registry),
            coordinator.clone(),
            factory,
            Arc::clone(&cache),
            enabled,
            settings.default_workers,
        );

        let sweeper = RetentionSweeper::new(
            Arc::clone(&registry),
            pool.handle(),
            settings.job_retention(),
            settings.cancel_grace(),
            settings.sweep_interval(),
        );
        let (sweep_trigger, trigger_rx) = broadcast::channel(16);
        let sweeper_handle = Some(sweeper.start(trigger_rx));

        Ok(Self {
            settings,
            catalog,
            probe,
            registry,
            coordinator,
            aggregator,
            cache,
            pool,
            sweeper,
            sweeper_handle,
            sweep_trigger,
        })
    }

    /// Model ids usable right now. Recomputed from a fresh hardware snapshot
    /// and the configured credential on every call.
    pub fn list_models(&self) -> Vec<String> {
        resolve_available(
            &self.catalog,
            self.probe.snapshot(),
            self.settings.cloud_api_key.as_deref(),
        )
        .into_iter()
        .map(|spec| spec.id.to_string())
        .collect()
    }

    /// Accepts an upload batch and creates one queued job per audio file.
    /// Zip uploads are expanded into their audio entries first. Fails fast,
    /// before any record exists, on an unavailable model or an effectively
    /// empty upload.
    pub fn submit(
        &self,
        session_id: &str,
        model_id: &str,
        language: Language,
        files: Vec<UploadFile>,
    ) -> Result<Vec<JobTicket>, SubmitError> {
        let enabled = resolve_available(
            &self.catalog,
            self.probe.snapshot(),
            self.settings.cloud_api_key.as_deref(),
        );
        if !enabled.iter().any(|spec| spec.id == model_id) {
            return Err(SubmitError::UnsupportedModel(model_id.to_string()));
        }
        if files.is_empty() {
            return Err(SubmitError::EmptyUpload);
        }

        let mut audios: Vec<AudioEntry> = Vec::new();
        for file in files {
            if file.filename.to_lowercase().ends_with(".zip") {
                let entries = package::extract_audio_entries(&file.bytes).map_err(|source| {
                    SubmitError::Archive {
                        filename: file.filename.clone(),
                        source,
                    }
                })?;
                audios.extend(entries);
            } else {
                audios.push(AudioEntry {
                    internal_path: file.filename,
                    bytes: file.bytes,
                });
            }
        }
        if audios.is_empty() {
            return Err(SubmitError::EmptyUpload);
        }

        let mut tickets = Vec::with_capacity(audios.len());
        for audio in audios {
            let content_key = ResultCache::key(&audio.bytes);

            if let Some(mut cached) = self.cache.get(&content_key) {
                cached.filename = audio.internal_path.clone();
                let record = self.registry.create_completed(
                    session_id,
                    &audio.internal_path,
                    model_id,
                    language,
                    cached,
                );
                tickets.push(JobTicket {
                    job_id: record.id,
                    filename: audio.internal_path,
                });
                continue;
            }

            let record =
                self.registry
                    .create(session_id, &audio.internal_path, model_id, language);
            let input = EngineInput {
                job_id: record.id.clone(),
                filename: audio.internal_path.clone(),
                language,
                audio: audio.bytes,
                duration_hint: None,
            };
            if let Err(e) = self.pool.submit(&record.id, input, Some(content_key)) {
                // Only happens while shutting down; the record would sit in
                // `queued` forever otherwise.
                log::error!("Could not dispatch job {}: {e}", record.id);
                self.registry.begin_cancel(&record.id);
            }
            tickets.push(JobTicket {
                job_id: record.id,
                filename: audio.internal_path,
            });
        }
        Ok(tickets)
    }

    /// Full record of one job, result payload included.
    pub fn get_job(&self, job_id: &str) -> crate::error::Result<JobRecord> {
        self.registry
            .get(job_id)
            .ok_or_else(|| ScribaError::JobNotFound(job_id.to_string()))
    }

    /// Slim listing of all jobs in the given sessions.
    pub fn list_jobs(&self, session_ids: &[String]) -> Vec<JobSummary> {
        let sessions: HashSet<String> = session_ids.iter().cloned().collect();
        self.aggregator
            .jobs(&sessions)
            .iter()
            .map(JobSummary::from_record)
            .collect()
    }

    pub fn session_summary(&self, session_id: &str) -> SessionSummary {
        self.aggregator.summarize(session_id)
    }

    /// Requests cancellation of one job.
    pub fn cancel(&self, job_id: &str) -> crate::error::Result<CancelReceipt> {
        self.coordinator
            .request_cancel(job_id)
            .ok_or_else(|| ScribaError::JobNotFound(job_id.to_string()))
    }

    /// Cancels every non-terminal job in a session.
    pub fn cancel_session(&self, session_id: &str) -> CancelSessionReceipt {
        CancelSessionReceipt {
            cancelled_count: self.coordinator.request_cancel_session(session_id),
        }
    }

    /// Plain-text download of one completed job's transcript.
    pub fn download_job(
        &self,
        job_id: &str,
        kind: TextKind,
    ) -> crate::error::Result<DownloadPackage> {
        let record = self.get_job(job_id)?;
        match record.result {
            Some(ref result) => Ok(package::package_job(result, kind)),
            None => Err(ScribaError::ResultUnavailable {
                job_id: job_id.to_string(),
                status: record.status.to_string(),
            }),
        }
    }

    /// Session-wide download built from completed jobs, in creation order.
    /// `None` when the session has no completed results yet.
    pub fn download_session(
        &self,
        session_id: &str,
        format: PackageFormat,
        kind: TextKind,
    ) -> crate::error::Result<Option<DownloadPackage>> {
        let results: Vec<_> = self
            .registry
            .session_job_ids(session_id)
            .iter()
            .filter_map(|id| self.registry.get(id))
            .filter_map(|record| record.result)
            .collect();
        Ok(package::package_session(&results, format, kind)?)
    }

    /// Forces a sweep cycle outside the regular interval.
    pub fn trigger_sweep(&self) {
        let _ = self.sweep_trigger.send(());
    }

    /// Stops the sweeper and the worker pool, then blocks until both have
    /// exited. An engine call that ignores cancellation delays this until it
    /// returns.
    pub fn shutdown(mut self) {
        self.sweeper.stop();
        let _ = self.sweep_trigger.send(());
        if let Some(handle) = self.sweeper_handle.take() {
            if handle.join().is_err() {
                log::error!("Sweeper thread panicked");
            }
        }
        self.pool.shutdown();
        self.pool.wait();
        log::info!("Transcription service stopped");
    }
}
