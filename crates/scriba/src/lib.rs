//! Asynchronous audio-transcription job orchestration.
//!
//! Uploads become jobs polled by identifier; transcription runs out-of-band
//! on a pool of persistent engine-bound worker slots. The crate provides the
//! job registry and its state machine, the dispatcher, cooperative
//! cancellation, session-scoped queries, the retention sweeper, and the
//! model availability resolver. Transcription engines themselves plug in
//! through [`engine::TranscriptionEngine`].

pub mod cache;
pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod hardware;
pub mod janitor;
pub mod logging;
pub mod models;
pub mod package;
pub mod pool;
pub mod registry;
pub mod render;
pub mod service;
pub mod session;

pub use cancel::{CancelReceipt, CancellationCoordinator};
pub use config::Settings;
pub use engine::{EngineFactory, EngineInput, EngineOutcome, RawTranscript, TranscriptionEngine};
pub use error::{Result, ScribaError, SubmitError};
pub use hardware::{EnvProbe, HardwareProbe, HardwareSnapshot};
pub use janitor::RetentionSweeper;
pub use models::{Language, ModelCatalog, ModelSpec};
pub use registry::{JobRecord, JobRegistry, JobStatus};
pub use render::TranscriptResult;
pub use service::{CancelSessionReceipt, JobSummary, JobTicket, TranscriptionService, UploadFile};
pub use session::{SessionAggregator, SessionSummary};
