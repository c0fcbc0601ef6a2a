/// Telemetry Pipeline
///
/// Inbound samples are always broadcast live on the "telemetry" channel; the
/// ones admitted by the Session Registry are buffered and flushed to storage
/// in batches.
pub mod pipeline;
pub mod types;

pub use pipeline::TelemetryPipeline;
pub use types::{PipelineStats, TelemetryFrame, TelemetryRecord};
