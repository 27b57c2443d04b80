//! WebSocket integration tests

use futures::{SinkExt, StreamExt};
use grc_workflow::models::Organization;
use grc_workflow::workflow::{ContentKind, Decision};
use grc_workflow::{api, AppState};
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn setup_server() -> (SocketAddr, Arc<AppState>) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    let state = AppState::new(pool);
    state.store.migrate().await.expect("Failed to run migrations");
    let app = api::router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, state)
}

async fn connect(addr: SocketAddr, org_id: Uuid, user: Uuid) -> WsStream {
    let url = format!("ws://{}/organizations/{}/events", addr, org_id);
    let mut request = url.into_client_request().unwrap();
    request
        .headers_mut()
        .insert(api::USER_HEADER, user.to_string().parse().unwrap());

    let (ws_stream, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    ws_stream
}

async fn next_json(ws: &mut WsStream) -> Value {
    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("Timed out waiting for event");
    match msg {
        Some(Ok(Message::Text(text))) => serde_json::from_str(&text).unwrap(),
        other => panic!("Expected text message, got {:?}", other),
    }
}

async fn seed(state: &AppState, approvers: &[Uuid]) -> Organization {
    let org = state.store.create_organization("Acme").await.unwrap();
    for (rank, user) in approvers.iter().enumerate() {
        state
            .store
            .add_approver(org.id, ContentKind::Risk, *user, rank as i32)
            .await
            .unwrap();
    }
    org
}

#[tokio::test]
async fn test_websocket_subscribed_greeting() {
    let (addr, state) = setup_server().await;
    let org = seed(&state, &[]).await;

    let mut ws = connect(addr, org.id, Uuid::new_v4()).await;
    let greeting = next_json(&mut ws).await;
    assert_eq!(greeting["type"], "subscribed");
    assert_eq!(greeting["organization_id"], org.id.to_string());
}

#[tokio::test]
async fn test_websocket_streams_workflow_events() {
    let (addr, state) = setup_server().await;
    let (alice, carol) = (Uuid::new_v4(), Uuid::new_v4());
    let org = seed(&state, &[alice]).await;
    let item = state
        .store
        .create_item(org.id, ContentKind::Risk, "Key person dependency", carol)
        .await
        .unwrap();

    let mut ws = connect(addr, org.id, carol).await;
    assert_eq!(next_json(&mut ws).await["type"], "subscribed");

    let approval = state
        .workflow
        .initiate_approval(org.id, item.id, carol)
        .await
        .unwrap();
    let requested = next_json(&mut ws).await;
    assert_eq!(requested["type"], "approval_requested");
    assert_eq!(requested["approval_id"], approval.id.to_string());
    assert_eq!(requested["approver_id"], alice.to_string());

    state
        .workflow
        .process_approval(org.id, approval.id, alice, Decision::Rejected, "Needs mitigation")
        .await
        .unwrap();
    let decided = next_json(&mut ws).await;
    assert_eq!(decided["type"], "approval_decided");
    assert_eq!(decided["status"], "rejected");
    assert_eq!(decided["item_state"], "rejected");

    state.workflow.reopen(org.id, item.id, carol).await.unwrap();
    let reopened = next_json(&mut ws).await;
    assert_eq!(reopened["type"], "item_reopened");
    assert_eq!(reopened["content_item_id"], item.id.to_string());
}

#[tokio::test]
async fn test_websocket_filters_other_organizations() {
    let (addr, state) = setup_server().await;
    let alice = Uuid::new_v4();
    let watched = seed(&state, &[alice]).await;
    let busy = seed(&state, &[alice]).await;

    let mut ws = connect(addr, watched.id, alice).await;
    assert_eq!(next_json(&mut ws).await["type"], "subscribed");

    let noise = state
        .store
        .create_item(busy.id, ContentKind::Risk, "Elsewhere", alice)
        .await
        .unwrap();
    state
        .workflow
        .initiate_approval(busy.id, noise.id, alice)
        .await
        .unwrap();

    let item = state
        .store
        .create_item(watched.id, ContentKind::Risk, "Here", alice)
        .await
        .unwrap();
    state
        .workflow
        .initiate_approval(watched.id, item.id, alice)
        .await
        .unwrap();

    let event = next_json(&mut ws).await;
    assert_eq!(event["type"], "approval_requested");
    assert_eq!(event["organization_id"], watched.id.to_string());
    assert_eq!(event["content_item_id"], item.id.to_string());
}

#[tokio::test]
async fn test_websocket_unknown_organization_rejected() {
    let (addr, _state) = setup_server().await;
    let url = format!("ws://{}/organizations/{}/events", addr, Uuid::new_v4());
    let mut request = url.into_client_request().unwrap();
    request
        .headers_mut()
        .insert(api::USER_HEADER, Uuid::new_v4().to_string().parse().unwrap());

    assert!(tokio_tungstenite::connect_async(request).await.is_err());
}

#[tokio::test]
async fn test_websocket_requires_user_header() {
    let (addr, state) = setup_server().await;
    let org = seed(&state, &[]).await;
    let url = format!("ws://{}/organizations/{}/events", addr, org.id);

    assert!(tokio_tungstenite::connect_async(&url).await.is_err());
}

#[tokio::test]
async fn test_websocket_close() {
    let (addr, state) = setup_server().await;
    let org = seed(&state, &[]).await;

    let mut ws = connect(addr, org.id, Uuid::new_v4()).await;
    assert_eq!(next_json(&mut ws).await["type"], "subscribed");
    ws.send(Message::Close(None)).await.unwrap();

    // Server acknowledges the close and ends the stream
    while let Some(msg) = ws.next().await {
        if msg.is_err() {
            break;
        }
    }
}
