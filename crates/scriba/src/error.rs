use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScribaError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Submission rejected: {0}")]
    Submit(#[from] SubmitError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Packaging error: {0}")]
    Package(#[from] PackageError),

    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("No downloadable result for job {job_id} (status: {status})")]
    ResultUnavailable { job_id: String, status: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Settings validation failed: {message}")]
    Validation { message: String },
}

/// Validation faults raised synchronously at submission.
/// These never create a job record.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("Model '{0}' is not available")]
    UnsupportedModel(String),

    #[error("No valid audio files found in the upload")]
    EmptyUpload,

    #[error("Failed to expand archive '{filename}': {source}")]
    Archive {
        filename: String,
        #[source]
        source: PackageError,
    },
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to load engine for model '{model_id}': {reason}")]
    LoadFailed { model_id: String, reason: String },
}

#[derive(Error, Debug)]
pub enum PackageError {
    #[error("Invalid or corrupted zip archive: {0}")]
    InvalidArchive(String),

    #[error("Failed to write zip entry '{name}': {source}")]
    WriteEntry {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Worker pool control channel closed unexpectedly")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, ScribaError>;
