/// Session Registry
///
/// Per-device recording state machine: `NoActiveSession` ⇄ `ActiveSession`.
/// Telemetry is persisted only while its device has an active session that
/// admits the sensor.
pub mod registry;
pub mod types;

pub use registry::{Admission, SessionRegistry};
pub use types::{EndMode, RecordingSession, SessionConfig, SessionId};
