/// WebSocket connection handler
///
/// One hub subscriber per connection:
/// - envelopes from the hub are forwarded as `data` messages
/// - client text frames go through the intake and get one reply each
/// - the subscriber leaves its channel when the socket closes or the hub
///   evicts it
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};

use super::state::WebState;
use crate::hub::intake::ClientIntake;
use crate::hub::{Envelope, ServerMessage, Subscriber};
use crate::logger::{self, LogTag};

pub async fn handle_connection(socket: WebSocket, state: WebState, channel: Option<String>) {
    let (subscriber, mut hub_rx) = state.hub.queue_subscriber();
    let conn_id = subscriber.id();
    let mut intake = ClientIntake::new(
        state.hub.clone(),
        state.commands.clone(),
        subscriber,
        channel.as_deref(),
    );

    let (mut ws_tx, mut ws_rx) = socket.split();
    logger::debug(
        LogTag::Websocket,
        &format!("Connection {} opened (channel: {:?})", conn_id, channel),
    );

    let mut sent: u64 = 0;
    loop {
        tokio::select! {
            envelope = hub_rx.recv() => match envelope {
                Some(envelope) => {
                    if let Err(e) = forward_to_client(&mut ws_tx, &envelope).await {
                        logger::warning(
                            LogTag::Websocket,
                            &format!("Connection {}: failed to send message: {}", conn_id, e),
                        );
                        break;
                    }
                    sent += 1;
                }
                // Every sender is gone: the hub evicted us
                None => break,
            },

            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let reply = intake.handle_text(&text).await;
                    if let Err(e) = send_message(&mut ws_tx, &reply).await {
                        logger::warning(
                            LogTag::Websocket,
                            &format!("Connection {}: failed to reply: {}", conn_id, e),
                        );
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    logger::warning(
                        LogTag::Websocket,
                        &format!("Connection {}: websocket error: {}", conn_id, e),
                    );
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    intake.close();
    logger::debug(
        LogTag::Websocket,
        &format!("Connection {} closed (sent={})", conn_id, sent),
    );
}

async fn forward_to_client(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    envelope: &Envelope,
) -> Result<(), axum::Error> {
    send_message(ws_tx, &ServerMessage::Data(envelope.clone())).await
}

async fn send_message(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    match message.to_json() {
        Ok(json) => ws_tx.send(Message::Text(json)).await,
        Err(e) => {
            logger::error(
                LogTag::Websocket,
                &format!("Failed to serialize message: {}", e),
            );
            Ok(())
        }
    }
}
