//! API integration tests

use axum::body::Body;
use axum::Router;
use grc_workflow::config::{AppOptions, ChainKind};
use grc_workflow::store::Store;
use grc_workflow::workflow::notify;
use grc_workflow::{api, AppState};
use hyper::{Request, StatusCode};
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

async fn setup_state(options: AppOptions) -> Arc<AppState> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    let state = AppState::with_options(pool, options);
    state.store.migrate().await.expect("Failed to run migrations");
    state
}

async fn setup_app() -> Router {
    api::router(setup_state(AppOptions::default()).await)
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    user: Option<Uuid>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header(api::USER_HEADER, user.to_string());
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

async fn get(app: &Router, uri: &str, user: Uuid) -> (StatusCode, Value) {
    send(app, "GET", uri, Some(user), None).await
}

fn id(value: &Value) -> Uuid {
    value["id"].as_str().unwrap().parse().unwrap()
}

/// Organization with approvers for audit issues, in the given order
async fn seed(app: &Router, admin: Uuid, approvers: &[Uuid]) -> Uuid {
    let body = json!({"name": "Acme"});
    let (status, org) = send(app, "POST", "/organizations", Some(admin), Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
    let org_id = id(&org);

    for (rank, user) in approvers.iter().enumerate() {
        let (status, _) = send(
            app,
            "POST",
            &format!("/organizations/{}/approvers", org_id),
            Some(admin),
            Some(json!({"kind": "audit_issue", "user_id": user, "rank": rank})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }
    org_id
}

async fn create_item(app: &Router, org_id: Uuid, user: Uuid) -> Uuid {
    let (status, item) = send(
        app,
        "POST",
        &format!("/organizations/{}/items", org_id),
        Some(user),
        Some(json!({"kind": "audit_issue", "title": "Access review overdue"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(item["state"], "draft");
    id(&item)
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = setup_app().await;
    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("ok".to_string()));
}

#[tokio::test]
async fn test_missing_user_header_is_bad_request() {
    let app = setup_app().await;
    let body = json!({"name": "Acme"});
    let (status, body) = send(&app, "POST", "/organizations", None, Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("x-user-id"));
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let app = setup_app().await;
    let admin = Uuid::new_v4();
    let org_id = seed(&app, admin, &[]).await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/organizations/{}/items", org_id),
        Some(admin),
        Some(json!({"kind": "invoice", "title": "Unknown kind"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_approval_flow_approve() {
    let app = setup_app().await;
    let (admin, alice, bob, carol) = (
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
    );
    let org_id = seed(&app, admin, &[alice, bob]).await;
    let item_id = create_item(&app, org_id, carol).await;

    let (status, approval) = send(
        &app,
        "POST",
        &format!("/organizations/{}/items/{}/approval", org_id, item_id),
        Some(carol),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(approval["status"], "pending");
    assert_eq!(approval["approver_id"], json!(alice));
    assert_eq!(approval["requester_id"], json!(carol));
    let approval_id = id(&approval);

    let uri = format!("/organizations/{}/items/{}", org_id, item_id);
    let (_, item) = get(&app, &uri, carol).await;
    assert_eq!(item["state"], "pending_approval");
    assert_eq!(item["current_approval_id"], json!(approval_id));

    let inbox_uri = format!("/organizations/{}/users/{}/approvals", org_id, alice);
    let (_, inbox) = get(&app, &inbox_uri, alice).await;
    assert_eq!(inbox.as_array().unwrap().len(), 1);

    let (status, next) = send(
        &app,
        "POST",
        &format!("/organizations/{}/approvals/{}/decision", org_id, approval_id),
        Some(alice),
        Some(json!({"decision": "approved", "comments": "Evidence attached"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(next["outcome"], "completed");
    assert_eq!(next["state"], "approved");

    let approval_uri = format!("/organizations/{}/approvals/{}", org_id, approval_id);
    let (_, approval) = get(&app, &approval_uri, carol).await;
    assert_eq!(approval["status"], "approved");
    assert_eq!(approval["comments"], "Evidence attached");

    let uri = format!("/organizations/{}/items/{}", org_id, item_id);
    let (_, item) = get(&app, &uri, carol).await;
    assert_eq!(item["state"], "approved");

    let uri = format!("/organizations/{}/audit", org_id);
    let (_, audit) = get(&app, &uri, admin).await;
    let actions: Vec<&str> = audit
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap())
        .collect();
    assert_eq!(actions, vec!["approval_initiated", "approval_decided"]);
}

#[tokio::test]
async fn test_initiate_twice_conflicts() {
    let app = setup_app().await;
    let (admin, dan) = (Uuid::new_v4(), Uuid::new_v4());
    let org_id = seed(&app, admin, &[Uuid::new_v4()]).await;
    let item_id = create_item(&app, org_id, admin).await;
    let uri = format!("/organizations/{}/items/{}/approval", org_id, item_id);

    let (status, _) = send(&app, "POST", &uri, Some(admin), None).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = send(&app, "POST", &uri, Some(dan), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("pending_approval"));

    let history_uri = format!("/organizations/{}/items/{}/approvals", org_id, item_id);
    let (_, history) = get(&app, &history_uri, admin).await;
    assert_eq!(history.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_initiate_without_approvers_is_unprocessable() {
    let app = setup_app().await;
    let (admin, erin) = (Uuid::new_v4(), Uuid::new_v4());
    let org_id = seed(&app, admin, &[]).await;
    let item_id = create_item(&app, org_id, erin).await;

    let (status, _) = send(
        &app,
        "POST",
        &format!("/organizations/{}/items/{}/approval", org_id, item_id),
        Some(erin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let uri = format!("/organizations/{}/items/{}", org_id, item_id);
    let (_, item) = get(&app, &uri, erin).await;
    assert_eq!(item["state"], "draft");
}

#[tokio::test]
async fn test_decision_errors() {
    let app = setup_app().await;
    let (admin, alice, bob) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let org_id = seed(&app, admin, &[alice, bob]).await;
    let item_id = create_item(&app, org_id, admin).await;
    let (_, approval) = send(
        &app,
        "POST",
        &format!("/organizations/{}/items/{}/approval", org_id, item_id),
        Some(admin),
        None,
    )
    .await;
    let uri = format!("/organizations/{}/approvals/{}/decision", org_id, id(&approval));

    let approve = json!({"decision": "approved"});
    let (status, _) = send(&app, "POST", &uri, Some(bob), Some(approve.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let maybe = json!({"decision": "maybe"});
    let (status, _) = send(&app, "POST", &uri, Some(alice), Some(maybe)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let reject = json!({"decision": "rejected", "comments": "Scope unclear"});
    let (status, _) = send(&app, "POST", &uri, Some(alice), Some(reject)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "POST", &uri, Some(alice), Some(approve)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("rejected"));
}

#[tokio::test]
async fn test_reopen_starts_new_cycle() {
    let app = setup_app().await;
    let (admin, alice) = (Uuid::new_v4(), Uuid::new_v4());
    let org_id = seed(&app, admin, &[alice]).await;
    let item_id = create_item(&app, org_id, admin).await;
    let submit = format!("/organizations/{}/items/{}/approval", org_id, item_id);
    let reopen = format!("/organizations/{}/items/{}/reopen", org_id, item_id);

    let (status, _) = send(&app, "POST", &reopen, Some(admin), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, approval) = send(&app, "POST", &submit, Some(admin), None).await;
    send(
        &app,
        "POST",
        &format!("/organizations/{}/approvals/{}/decision", org_id, id(&approval)),
        Some(alice),
        Some(json!({"decision": "rejected"})),
    )
    .await;

    let (status, item) = send(&app, "POST", &reopen, Some(admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(item["state"], "draft");

    let (status, _) = send(&app, "POST", &submit, Some(admin), None).await;
    assert_eq!(status, StatusCode::CREATED);
    let history_uri = format!("/organizations/{}/items/{}/approvals", org_id, item_id);
    let (_, history) = get(&app, &history_uri, admin).await;
    let statuses: Vec<&str> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["status"].as_str().unwrap())
        .collect();
    assert_eq!(statuses, vec!["rejected", "pending"]);
}

#[tokio::test]
async fn test_other_organization_gets_not_found() {
    let app = setup_app().await;
    let admin = Uuid::new_v4();
    let org_id = seed(&app, admin, &[Uuid::new_v4()]).await;
    let other_id = seed(&app, admin, &[]).await;
    let item_id = create_item(&app, org_id, admin).await;

    let foreign_item = format!("/organizations/{}/items/{}", other_id, item_id);
    let (status, _) = get(&app, &foreign_item, admin).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(
        &app,
        "POST",
        &format!("/organizations/{}/items/{}/approval", other_id, item_id),
        Some(admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let uri = format!("/organizations/{}/audit", Uuid::new_v4());
    let (status, _) = get(&app, &uri, admin).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_notifications_are_delivered() {
    let app = setup_app().await;
    let (admin, alice, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let org_id = seed(&app, admin, &[alice]).await;
    let item_id = create_item(&app, org_id, carol).await;
    let (_, approval) = send(
        &app,
        "POST",
        &format!("/organizations/{}/items/{}/approval", org_id, item_id),
        Some(carol),
        None,
    )
    .await;
    send(
        &app,
        "POST",
        &format!("/organizations/{}/approvals/{}/decision", org_id, id(&approval)),
        Some(alice),
        Some(json!({"decision": "approved"})),
    )
    .await;

    // Delivery happens on a background worker
    let uri = format!("/organizations/{}/users/{}/notifications", org_id, carol);
    let mut inbox = Value::Null;
    for _ in 0..50 {
        let (_, body) = get(&app, &uri, carol).await;
        if body.as_array().map_or(false, |a| !a.is_empty()) {
            inbox = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let inbox = inbox.as_array().expect("Requester was never notified");
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0]["kind"], "approval_decided");
    assert_eq!(inbox[0]["approval_id"], approval["id"]);
}

#[tokio::test]
async fn test_sequential_chain_over_http() {
    let state = setup_state(AppOptions {
        chain: ChainKind::Sequential,
        ..AppOptions::default()
    })
    .await;
    let app = api::router(state);
    let (admin, alice, bob) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let org_id = seed(&app, admin, &[alice, bob]).await;
    let item_id = create_item(&app, org_id, admin).await;
    let (_, first) = send(
        &app,
        "POST",
        &format!("/organizations/{}/items/{}/approval", org_id, item_id),
        Some(admin),
        None,
    )
    .await;

    let (status, next) = send(
        &app,
        "POST",
        &format!("/organizations/{}/approvals/{}/decision", org_id, id(&first)),
        Some(alice),
        Some(json!({"decision": "approved"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(next["outcome"], "next_approver");
    assert_eq!(next["approval"]["approver_id"], json!(bob));
    assert_eq!(next["approval"]["step"], 2);

    let second_id: Uuid = next["approval"]["id"].as_str().unwrap().parse().unwrap();
    let (_, done) = send(
        &app,
        "POST",
        &format!("/organizations/{}/approvals/{}/decision", org_id, second_id),
        Some(bob),
        Some(json!({"decision": "approved"})),
    )
    .await;
    assert_eq!(done["outcome"], "completed");
    assert_eq!(done["state"], "approved");
}

#[tokio::test]
async fn test_queued_notifications_survive_shutdown() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    let state = AppState::with_options(pool.clone(), AppOptions::default());
    state.store.migrate().await.expect("Failed to run migrations");
    let worker = state
        .take_notification_worker()
        .expect("Worker handed out once");
    assert!(state.take_notification_worker().is_none());

    let app = api::router(state);
    let (admin, alice) = (Uuid::new_v4(), Uuid::new_v4());
    let org_id = seed(&app, admin, &[alice]).await;
    let item_id = create_item(&app, org_id, admin).await;
    let uri = format!("/organizations/{}/items/{}/approval", org_id, item_id);
    let (status, _) = send(&app, "POST", &uri, Some(admin), None).await;
    assert_eq!(status, StatusCode::CREATED);

    // Dropping the router closes the queue; the worker finishes the backlog
    drop(app);
    let report = notify::drain(worker, Duration::from_secs(5))
        .await
        .expect("Worker drained");
    assert_eq!(report.delivered, 1);
    assert_eq!(report.dropped, 0);

    let inbox = Store::new(pool)
        .list_notifications(org_id, alice)
        .await
        .unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].recipient_id, alice);
}
