use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, Stream, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use courier_core::{FeedEvent, Subscription};
use courier_types::api::MessageResponse;
use courier_types::events::LiveEvent;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Relay one conversation's feed to an already-authorised client.
///
/// The subscription is created before the upgrade, so nothing appended after
/// `Ready` is missed. Dropping out of this function drops the subscription.
pub async fn handle_live(socket: WebSocket, subscription: Subscription, user_id: Uuid) {
    let conversation_id = subscription.conversation_id();
    let events = live_events(subscription);
    let (mut sender, mut receiver) = socket.split();

    info!("{} subscribed to conversation {}", user_id, conversation_id);

    let ready = LiveEvent::Ready {
        conversation_id,
        user_id,
    };
    let Some(frame) = encode(&ready) else {
        return;
    };
    if sender.send(frame).await.is_err() {
        return;
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;
        let mut events = std::pin::pin!(events);

        loop {
            tokio::select! {
                event = events.next() => {
                    let Some(event) = event else {
                        // Feed closed: server is shutting down.
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    };

                    let Some(frame) = encode(&event) else { continue };
                    if sender.send(frame).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // The live socket is one-way; the client only answers pings and closes.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Pong(_) => pong_flag_recv.store(true, Ordering::Release),
                Message::Close(_) => break,
                Message::Text(text) => {
                    debug!("{} sent {} unexpected bytes on live socket", user_id, text.len());
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("{} left conversation {}", user_id, conversation_id);
}

/// Frames for one subscription, in feed order.
pub fn live_events(subscription: Subscription) -> impl Stream<Item = LiveEvent> + Send {
    let conversation_id = subscription.conversation_id();
    subscription.into_stream().map(move |event| match event {
        FeedEvent::Message(message) => LiveEvent::MessageCreate(MessageResponse::new(message, Vec::new())),
        FeedEvent::Lagged(missed) => LiveEvent::Resync { conversation_id, missed },
    })
}

fn encode(event: &LiveEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            warn!("Failed to encode live event: {}", e);
            None
        }
    }
}
