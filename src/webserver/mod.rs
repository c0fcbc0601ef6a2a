/// WebSocket binding for the Broadcast Hub
///
/// - `GET /ws` and `GET /ws/:channel` upgrade to a WebSocket; each connection
///   is one hub subscriber driven by a [`ClientIntake`](crate::hub::intake::ClientIntake)
/// - `GET /metrics` returns hub, pipeline and queue counters as JSON
pub mod connection;
pub mod server;
pub mod state;

pub use server::{bind, build_app, serve};
pub use state::WebState;
