use crate::realtime::broadcaster::{SubscriberRegistry, Subscription};
use crate::startup::AppState;
use axum::{
    extract::{
        Extension,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::{SinkExt, Stream, StreamExt};
use std::sync::Arc;

pub async fn live_updates_ws(
    Extension(app_state): Extension<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let registry = app_state.registry.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

async fn handle_socket(socket: WebSocket, registry: Arc<SubscriberRegistry>) {
    let subscription = registry.subscribe();
    let handle = subscription.handle();
    let (sender, receiver) = socket.split();

    let mut send_task = tokio::spawn(forward_updates(subscription, sender));
    let mut recv_task = tokio::spawn(wait_for_close(receiver));

    // whichever side finishes first tears the other down
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    registry.unsubscribe(handle);
    info!(subscriber = handle.id(), "websocket closed");
}

/// Writes every update as a JSON text frame until the socket or the
/// subscription goes away.
async fn forward_updates<S>(mut subscription: Subscription, mut sender: S)
where
    S: futures::Sink<Message> + Unpin,
{
    while let Some(update) = subscription.recv().await {
        let text = match serde_json::to_string(&*update) {
            Ok(text) => text,
            Err(e) => {
                error!("failed to encode vote update: {e}");
                continue;
            }
        };
        if sender.send(Message::Text(text)).await.is_err() {
            break;
        }
    }
}

/// Reads and discards client frames; returns on close or error.
async fn wait_for_close<St, E>(mut receiver: St)
where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("websocket read error: {e}");
                break;
            }
        }
    }
}
