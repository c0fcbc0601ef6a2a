/// Client intake - routing of control messages from one connection
///
/// Each live connection owns a [`ClientIntake`]. Text frames from the client
/// are parsed as [`ClientMessage`] and routed: channel membership goes to the
/// hub, actuation commands go to the command service. Every message gets
/// exactly one [`ServerMessage`] reply.
use serde_json::json;
use std::sync::Arc;

use super::hub::BroadcastHub;
use super::message::{channels, ClientMessage, ServerMessage};
use super::subscriber::Subscriber;
use crate::commands::{CommandMessage, CommandService};
use crate::logger::{self, LogTag};

pub struct ClientIntake {
    hub: Arc<BroadcastHub>,
    commands: Option<Arc<CommandService>>,
    subscriber: Arc<dyn Subscriber>,
    channel: Option<String>,
}

impl ClientIntake {
    /// Bind a connection's subscriber, joining `channel` when given
    pub fn new(
        hub: Arc<BroadcastHub>,
        commands: Option<Arc<CommandService>>,
        subscriber: Arc<dyn Subscriber>,
        channel: Option<&str>,
    ) -> Self {
        let mut intake = Self {
            hub,
            commands,
            subscriber,
            channel: None,
        };
        if let Some(channel) = channel {
            intake.join(channel);
        }
        intake
    }

    /// Channel this connection currently belongs to
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    /// A subscriber belongs to one channel at a time; joining moves it
    fn join(&mut self, channel: &str) {
        if self.channel.as_deref() == Some(channel) {
            return;
        }
        self.leave();
        self.hub.subscribe(channel, self.subscriber.clone());
        self.channel = Some(channel.to_string());
    }

    fn leave(&mut self) {
        if let Some(current) = self.channel.take() {
            self.hub.unsubscribe(&current, self.subscriber.id());
        }
    }

    /// Parse and route one text frame
    pub async fn handle_text(&mut self, text: &str) -> ServerMessage {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle(message).await,
            Err(e) => {
                logger::debug(
                    LogTag::Websocket,
                    &format!(
                        "Rejected client message from subscriber {}: {}",
                        self.subscriber.id(),
                        e
                    ),
                );
                ServerMessage::error("invalid_message", format!("Invalid message: {}", e))
            }
        }
    }

    pub async fn handle(&mut self, message: ClientMessage) -> ServerMessage {
        match message {
            ClientMessage::Subscribe { channel } => {
                self.join(&channel);
                ServerMessage::Ack {
                    message: "subscribed".to_string(),
                    context: Some(json!({ "channel": channel })),
                }
            }
            ClientMessage::Unsubscribe => {
                let channel = self.channel.clone();
                self.leave();
                ServerMessage::Ack {
                    message: "unsubscribed".to_string(),
                    context: channel.map(|c| json!({ "channel": c })),
                }
            }
            ClientMessage::Ping { id } => ServerMessage::Pong { id },
            ClientMessage::Velocity {
                device_id,
                linear,
                angular,
            } => {
                self.send_command(CommandMessage::velocity(&device_id, linear, angular))
                    .await
            }
            ClientMessage::Navigation {
                device_id,
                x,
                y,
                orientation,
            } => {
                self.send_command(CommandMessage::navigation(&device_id, x, y, orientation))
                    .await
            }
            ClientMessage::Relay { data } => match self.channel.clone() {
                // Server-produced channels only carry data from the pipeline,
                // the job queue and the command service
                Some(channel) if channel != channels::CHAT => ServerMessage::error(
                    "relay_not_allowed",
                    format!("Relay is only allowed on '{}'", channels::CHAT),
                ),
                Some(channel) => {
                    let report = self.hub.broadcast(&channel, data).await;
                    ServerMessage::Ack {
                        message: "relayed".to_string(),
                        context: Some(json!({
                            "channel": channel,
                            "seq": report.seq,
                            "delivered": report.delivered,
                        })),
                    }
                }
                None => ServerMessage::error("not_subscribed", "Subscribe to a channel before relaying"),
            },
        }
    }

    async fn send_command(&self, command: CommandMessage) -> ServerMessage {
        let commands = match &self.commands {
            Some(commands) => commands,
            None => return ServerMessage::error("commands_disabled", "Command relay is not available"),
        };

        match commands.send(&command).await {
            Ok(topic) => ServerMessage::Ack {
                message: format!("{} command sent", command.kind.name()),
                context: Some(json!({
                    "device_id": command.device_id,
                    "topic": topic,
                })),
            },
            Err(e) => ServerMessage::error("command_failed", e.to_string()),
        }
    }

    /// Leave the current channel
    pub fn close(&mut self) {
        self.leave();
    }
}

impl Drop for ClientIntake {
    fn drop(&mut self) {
        self.leave();
    }
}
