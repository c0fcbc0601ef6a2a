/// Job Queue
///
/// FIFO of background jobs executed one at a time by a single worker. Progress
/// and status changes are streamed on the "ml" channel and persisted.
pub mod queue;
pub mod runner;
pub mod training;
pub mod types;

pub use queue::JobQueue;
pub use runner::{JobContext, JobRunner};
pub use training::TrainingRunner;
pub use types::{Job, JobId, JobKind, JobSpec, JobStatus, ProgressEvent};
