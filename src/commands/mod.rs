/// Outbound actuation commands
///
/// Typed commands are published to per-device topics through the bridge.
/// Connectivity errors reach the caller; the audit row and the "robot"
/// channel echo are best-effort.
pub mod service;
pub mod types;

pub use service::CommandService;
pub use types::{CommandKind, CommandMessage};
