mod bridge_service;
mod job_worker_service;
mod telemetry_flush_service;
#[cfg(feature = "web")]
mod webserver_service;

pub use bridge_service::BridgeService;
pub use job_worker_service::JobWorkerService;
pub use telemetry_flush_service::TelemetryFlushService;
#[cfg(feature = "web")]
pub use webserver_service::WebserverService;
