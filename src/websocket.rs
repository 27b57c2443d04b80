//! WebSocket stream of workflow events for one organization

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::api::Actor;
use crate::error::Result;
use crate::workflow::WorkflowEvent;
use crate::AppState;

/// WebSocket handler
pub async fn handler(
    ws: WebSocketUpgrade,
    Path(org_id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
) -> Result<impl IntoResponse> {
    state.store.get_organization(org_id).await?;
    tracing::debug!(org = %org_id, actor = %actor, "Event stream requested");
    // Subscribe before the upgrade completes so no event is missed
    let events = state.workflow.subscribe();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, org_id, events)))
}

async fn handle_socket(
    socket: WebSocket,
    org_id: Uuid,
    mut events: broadcast::Receiver<WorkflowEvent>,
) {
    let (mut sender, mut receiver) = socket.split();

    if send_json(&mut sender, &ServerMessage::Subscribed { organization_id: org_id })
        .await
        .is_err()
    {
        return;
    }
    tracing::debug!(org = %org_id, "Event stream opened");

    loop {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::error!("WebSocket error: {}", e);
                    break;
                }
            },
            event = events.recv() => match event {
                Ok(event) if event.organization_id() == org_id => {
                    if send_json(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(org = %org_id, skipped, "Event stream lagged");
                    if send_json(&mut sender, &ServerMessage::Lagged { skipped })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    tracing::debug!(org = %org_id, "Event stream closed");
}

async fn send_json<T: Serialize>(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    value: &T,
) -> std::result::Result<(), ()> {
    let text = match serde_json::to_string(value) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("Failed to encode event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text)).await.map_err(|e| {
        tracing::debug!("Failed to send event: {}", e);
    })
}

/// Control messages from server to client. Workflow events are sent as-is.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The stream is live
    Subscribed { organization_id: Uuid },
    /// Events were dropped because the client fell behind
    Lagged { skipped: u64 },
}
