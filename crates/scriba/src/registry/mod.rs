pub mod job;
pub mod store;

pub use job::{estimate_completion, JobRecord, JobStatus};
pub use store::{CancelDisposition, FinishDisposition, JobRegistry};
