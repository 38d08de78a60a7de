//! The boundary to pluggable transcription engines.
//!
//! Engines are opaque to the orchestration core: a slot hands one an input
//! plus two callbacks and gets back exactly one outcome. The call may be
//! arbitrarily slow and is not interruptible: the cancellation callback is
//! advisory, and an engine that never polls it simply runs to completion.

use crate::error::EngineError;
use crate::models::{Language, ModelSpec};

/// Everything an engine needs for one transcription.
#[derive(Debug, Clone)]
pub struct EngineInput {
    pub job_id: String,
    /// Original filename (or archive-internal path) of the audio.
    pub filename: String,
    pub language: Language,
    pub audio: Vec<u8>,
    /// Audio duration in seconds when the upload layer could determine it;
    /// engines use it for progress estimation.
    pub duration_hint: Option<f64>,
}

/// Transcript as produced by an engine, before rendering.
#[derive(Debug, Clone, Default)]
pub struct RawTranscript {
    pub text: String,
    pub segments: Vec<RawSegment>,
    /// Named entities detected by the engine, if it supports extraction.
    pub entities: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RawSegment {
    /// Segment start offset in seconds (some engines report milliseconds;
    /// the renderer normalises).
    pub start: f64,
    pub speaker: Option<u32>,
    pub text: String,
}

/// The three ways an engine call resolves. Anything else escaping the
/// adapter (a panic) is an executor fault handled by the slot.
#[derive(Debug)]
pub enum EngineOutcome {
    Completed(RawTranscript),
    /// The engine observed the cancellation callback and stopped; any
    /// partial output is discarded by the caller.
    Cancelled,
    /// Structured failure; the detail string is preserved verbatim on the
    /// job record.
    Fault(String),
}

/// Progress callback handed into [`TranscriptionEngine::run`].
/// Percentages are clamped to 0–100 by the registry.
pub type ProgressFn<'a> = &'a (dyn Fn(u8) + Send + Sync);

/// Cancellation check handed into [`TranscriptionEngine::run`]. Cheap to
/// call; engines should poll it between processing chunks.
pub type CancelFn<'a> = &'a (dyn Fn() -> bool + Send + Sync);

/// One loaded engine instance, owned by exactly one worker slot.
pub trait TranscriptionEngine: Send {
    fn model_id(&self) -> &str;

    /// Runs a single transcription to completion, reporting progress and
    /// polling for cancellation along the way.
    fn run(&mut self, input: &EngineInput, on_progress: ProgressFn, is_cancelled: CancelFn)
        -> EngineOutcome;
}

/// Loads engine instances for worker slots. Called once per slot at startup
/// and again whenever a slot is reset after an executor fault.
pub trait EngineFactory: Send + Sync {
    fn load(&self, spec: &ModelSpec) -> Result<Box<dyn TranscriptionEngine>, EngineError>;
}
