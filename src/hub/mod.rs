/// Broadcast Hub
///
/// Live subscriber connections grouped by channel. Every broadcast goes to the
/// subscribers registered on the channel when the call starts.
///
/// ## Key Components
/// - `hub`: channel registry, bounded-deadline fan-out and eviction
/// - `subscriber`: subscriber trait and the queue-backed adapter
/// - `message`: envelope and client/server control message schemas
/// - `intake`: routing of client control messages
/// - `metrics`: hub-level counters
pub mod hub;
pub mod intake;
pub mod message;
pub mod metrics;
pub mod subscriber;

pub use hub::{BroadcastHub, BroadcastReport};
pub use message::{channels, ClientMessage, Envelope, ServerMessage};
pub use metrics::{HubMetrics, HubMetricsSnapshot};
pub use subscriber::{QueueSubscriber, Subscriber, SubscriberId};
