//! WebSocket handler for real-time updates

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use crate::AppState;

/// Messages that are not engine events
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsEvent<'a> {
    Connected,
    Snapshot { state: &'a hub_core::InputSnapshot },
}

fn to_message<T: Serialize>(value: &T) -> Option<Message> {
    match serde_json::to_string(value) {
        Ok(json) => Some(Message::Text(json)),
        Err(e) => {
            tracing::warn!("Failed to encode websocket message: {}", e);
            None
        }
    }
}

/// Handle a WebSocket connection
pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let Some(connected) = to_message(&WsEvent::Connected) else {
        return;
    };
    if sender.send(connected).await.is_err() {
        return;
    }

    let mut event_rx = state.events.subscribe();
    let mut snapshot_rx = state.poller.snapshots().subscribe();

    // Forward engine events and every published snapshot
    let send_task = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                event = event_rx.recv() => match event {
                    Ok(event) => to_message(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("WebSocket client lagged, skipped {} events", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                changed = snapshot_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = std::sync::Arc::clone(&snapshot_rx.borrow_and_update().current);
                    to_message(&WsEvent::Snapshot { state: &current })
                }
            };

            if let Some(message) = message {
                if sender.send(message).await.is_err() {
                    break;
                }
            }
        }
    });

    // Client messages are ignored; wait for close
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    send_task.abort();
}
