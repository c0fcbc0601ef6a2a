/// Message Bridge
///
/// Owns the broker session: outbound command publishing to per-device topics
/// and dispatch of inbound topic messages to registered handlers.
///
/// ## Key Components
/// - `topics`: pure topic naming, parsing and wildcard matching
/// - `transport`: broker transport trait and the in-process loopback adapter
/// - `bridge`: connection lifecycle, publish deadlines, handler registry
pub mod bridge;
pub mod topics;
pub mod transport;

pub use bridge::{coerce_payload, HandlerFn, MessageBridge, TopicHandler};
pub use transport::{BrokerTransport, InboundMessage, LoopbackTransport};

use serde::{Deserialize, Serialize};

/// Broker delivery guarantee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    pub fn level(&self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}
