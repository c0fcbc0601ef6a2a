use serde_json::json;
use std::sync::Arc;

use super::types::{CommandKind, CommandMessage};
use crate::bridge::topics::{cmd_vel_topic, navigation_goal_topic};
use crate::bridge::{MessageBridge, QoS};
use crate::config::Config;
use crate::errors::BridgeResult;
use crate::hub::{channels, BroadcastHub};
use crate::logger::{self, LogTag};
use crate::storage::CommandAudit;

pub struct CommandService {
    bridge: Arc<MessageBridge>,
    hub: Arc<BroadcastHub>,
    audit: Option<Arc<dyn CommandAudit>>,
    fleet: String,
    qos: QoS,
}

impl CommandService {
    /// `audit` is ignored when `commands.audit` is off
    pub fn new(
        bridge: Arc<MessageBridge>,
        hub: Arc<BroadcastHub>,
        audit: Option<Arc<dyn CommandAudit>>,
        config: &Config,
    ) -> Self {
        Self {
            bridge,
            hub,
            audit: audit.filter(|_| config.commands.audit),
            fleet: config.fleet.name.clone(),
            qos: config.bridge.default_qos,
        }
    }

    /// Topic the command is published on
    pub fn topic_for(&self, command: &CommandMessage) -> String {
        match command.kind {
            CommandKind::Velocity { .. } => cmd_vel_topic(&self.fleet, &command.device_id),
            CommandKind::Navigation { .. } => navigation_goal_topic(&self.fleet, &command.device_id),
        }
    }

    /// Publish a command; returns the topic it went to
    pub async fn send(&self, command: &CommandMessage) -> BridgeResult<String> {
        let topic = self.topic_for(command);
        let parameters = command.payload();

        self.bridge.publish(&topic, &parameters, self.qos).await?;
        logger::info(
            LogTag::Commands,
            &format!("{} command sent to {}", command.kind.name(), command.device_id),
        );

        if let Some(audit) = &self.audit {
            if let Err(e) = audit.record_command(command, &topic).await {
                logger::error(
                    LogTag::Commands,
                    &format!("Failed to audit command for {}: {}", command.device_id, e),
                );
            }
        }

        self.hub
            .broadcast(
                channels::ROBOT,
                json!({
                    "type": "command_ack",
                    "device_id": command.device_id,
                    "command": command.kind.name(),
                    "topic": topic,
                    "parameters": parameters,
                }),
            )
            .await;

        Ok(topic)
    }

    pub async fn send_velocity(&self, device_id: &str, linear: f64, angular: f64) -> BridgeResult<String> {
        self.send(&CommandMessage::velocity(device_id, linear, angular)).await
    }

    pub async fn send_navigation(
        &self,
        device_id: &str,
        x: f64,
        y: f64,
        orientation: f64,
    ) -> BridgeResult<String> {
        self.send(&CommandMessage::navigation(device_id, x, y, orientation))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::LoopbackTransport;
    use crate::errors::BridgeError;
    use crate::storage::MemoryStore;
    use std::time::Duration;

    struct Fixture {
        transport: Arc<LoopbackTransport>,
        bridge: Arc<MessageBridge>,
        hub: Arc<BroadcastHub>,
        store: Arc<MemoryStore>,
        service: CommandService,
    }

    fn fixture(audit: bool) -> Fixture {
        let mut config = Config::default();
        config.fleet.name = "warehouse".to_string();
        config.commands.audit = audit;

        let transport = Arc::new(LoopbackTransport::new());
        let bridge = MessageBridge::new(transport.clone(), &config.bridge);
        let hub = BroadcastHub::with_settings(Duration::from_millis(100), 8);
        let store = Arc::new(MemoryStore::new());
        let service = CommandService::new(bridge.clone(), hub.clone(), Some(store.clone()), &config);
        Fixture {
            transport,
            bridge,
            hub,
            store,
            service,
        }
    }

    #[tokio::test]
    async fn test_velocity_goes_to_cmd_vel_topic() {
        let f = fixture(true);
        f.bridge.connect().await.expect("connect");
        let (_sub, mut acks) = f.hub.subscribe_queue(channels::ROBOT);

        let topic = f.service.send_velocity("r1", 0.5, -0.1).await.expect("send");
        assert_eq!(topic, "/warehouse/r1/cmd_vel");

        let published = f.transport.published();
        assert_eq!(published.len(), 1);
        let payload: serde_json::Value =
            serde_json::from_slice(&published[0].0.payload).expect("json payload");
        assert_eq!(payload, json!({"linear": 0.5, "angular": -0.1}));

        let ack = acks.recv().await.expect("ack");
        assert_eq!(ack.data["command"], "velocity");
        assert_eq!(f.store.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_navigation_topic_and_audit_switch() {
        let f = fixture(false);
        f.bridge.connect().await.expect("connect");

        let topic = f
            .service
            .send_navigation("r2", 1.0, 2.0, 0.5)
            .await
            .expect("send");
        assert_eq!(topic, "/warehouse/r2/navigation_goal");
        assert!(f.store.commands().is_empty());
    }

    #[tokio::test]
    async fn test_not_connected_is_surfaced() {
        let f = fixture(true);
        let result = f.service.send_velocity("r1", 1.0, 0.0).await;
        assert!(matches!(result, Err(BridgeError::NotConnected)));
        assert!(f.store.commands().is_empty());
    }
}
