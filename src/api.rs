//! HTTP routes
//!
//! Every route under `/organizations` identifies the caller through the
//! `x-user-id` header.

use axum::{
    extract::{rejection::JsonRejection, FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{
    AssignApproverRequest, CreateItemRequest, CreateOrganizationRequest, DecisionRequest,
};
use crate::websocket;
use crate::AppState;

/// Header carrying the caller's user id
pub const USER_HEADER: &str = "x-user-id";

/// The authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor(pub Uuid);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let value = parts
            .headers
            .get(USER_HEADER)
            .ok_or_else(|| AppError::BadRequest(format!("Missing {} header", USER_HEADER)))?;
        let value = value
            .to_str()
            .map_err(|_| AppError::BadRequest(format!("Invalid {} header", USER_HEADER)))?;
        let id = Uuid::parse_str(value.trim())
            .map_err(|e| AppError::BadRequest(format!("Invalid {} header: {}", USER_HEADER, e)))?;
        Ok(Actor(id))
    }
}

/// Unwrap a JSON body, reporting malformed input as a 400
fn body<T: DeserializeOwned>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| AppError::BadRequest(e.body_text()))
}

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/organizations", post(create_organization))
        .route("/organizations/:org_id/approvers", post(assign_approver))
        .route("/organizations/:org_id/items", post(create_item))
        .route("/organizations/:org_id/items/:item_id", get(get_item))
        .route(
            "/organizations/:org_id/items/:item_id/approval",
            post(initiate_approval),
        )
        .route("/organizations/:org_id/items/:item_id/reopen", post(reopen_item))
        .route(
            "/organizations/:org_id/items/:item_id/approvals",
            get(item_approvals),
        )
        .route("/organizations/:org_id/approvals/:approval_id", get(get_approval))
        .route(
            "/organizations/:org_id/approvals/:approval_id/decision",
            post(decide),
        )
        .route(
            "/organizations/:org_id/users/:user_id/approvals",
            get(user_approvals),
        )
        .route(
            "/organizations/:org_id/users/:user_id/notifications",
            get(user_notifications),
        )
        .route("/organizations/:org_id/audit", get(audit_trail))
        .route("/organizations/:org_id/events", get(websocket::handler))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn create_organization(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    payload: std::result::Result<Json<CreateOrganizationRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let req = body(payload)?;
    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Organization name is required".to_string()));
    }

    let org = state.store.create_organization(name).await?;
    tracing::info!(org = %org.id, actor = %actor, "Organization created");
    Ok((StatusCode::CREATED, Json(org)))
}

async fn assign_approver(
    State(state): State<Arc<AppState>>,
    Path(org_id): Path<Uuid>,
    Actor(actor): Actor,
    payload: std::result::Result<Json<AssignApproverRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let req = body(payload)?;
    let approver = state
        .store
        .add_approver(org_id, req.kind, req.user_id, req.rank)
        .await?;
    tracing::info!(
        org = %org_id,
        actor = %actor,
        user = %approver.user_id,
        kind = approver.kind.as_str(),
        "Approver assigned"
    );
    Ok((StatusCode::CREATED, Json(approver)))
}

async fn create_item(
    State(state): State<Arc<AppState>>,
    Path(org_id): Path<Uuid>,
    Actor(actor): Actor,
    payload: std::result::Result<Json<CreateItemRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let req = body(payload)?;
    let title = req.title.trim();
    if title.is_empty() {
        return Err(AppError::BadRequest("Title is required".to_string()));
    }

    let item = state.store.create_item(org_id, req.kind, title, actor).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn get_item(
    State(state): State<Arc<AppState>>,
    Path((org_id, item_id)): Path<(Uuid, Uuid)>,
    _actor: Actor,
) -> Result<impl IntoResponse> {
    let item = state.workflow.content_item(org_id, item_id).await?;
    Ok(Json(item))
}

async fn initiate_approval(
    State(state): State<Arc<AppState>>,
    Path((org_id, item_id)): Path<(Uuid, Uuid)>,
    Actor(actor): Actor,
) -> Result<impl IntoResponse> {
    let approval = state
        .workflow
        .initiate_approval(org_id, item_id, actor)
        .await?;
    Ok((StatusCode::CREATED, Json(approval)))
}

async fn reopen_item(
    State(state): State<Arc<AppState>>,
    Path((org_id, item_id)): Path<(Uuid, Uuid)>,
    Actor(actor): Actor,
) -> Result<impl IntoResponse> {
    let item = state.workflow.reopen(org_id, item_id, actor).await?;
    Ok(Json(item))
}

async fn item_approvals(
    State(state): State<Arc<AppState>>,
    Path((org_id, item_id)): Path<(Uuid, Uuid)>,
    _actor: Actor,
) -> Result<impl IntoResponse> {
    let approvals = state.workflow.approvals_for_item(org_id, item_id).await?;
    Ok(Json(approvals))
}

async fn get_approval(
    State(state): State<Arc<AppState>>,
    Path((org_id, approval_id)): Path<(Uuid, Uuid)>,
    _actor: Actor,
) -> Result<impl IntoResponse> {
    let approval = state.workflow.approval(org_id, approval_id).await?;
    Ok(Json(approval))
}

async fn decide(
    State(state): State<Arc<AppState>>,
    Path((org_id, approval_id)): Path<(Uuid, Uuid)>,
    Actor(actor): Actor,
    payload: std::result::Result<Json<DecisionRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let req = body(payload)?;
    let next = state
        .workflow
        .process_approval(org_id, approval_id, actor, req.decision, req.comments)
        .await?;
    Ok(Json(next))
}

async fn user_approvals(
    State(state): State<Arc<AppState>>,
    Path((org_id, user_id)): Path<(Uuid, Uuid)>,
    _actor: Actor,
) -> Result<impl IntoResponse> {
    let approvals = state.workflow.pending_for_approver(org_id, user_id).await?;
    Ok(Json(approvals))
}

async fn user_notifications(
    State(state): State<Arc<AppState>>,
    Path((org_id, user_id)): Path<(Uuid, Uuid)>,
    _actor: Actor,
) -> Result<impl IntoResponse> {
    let notifications = state.store.list_notifications(org_id, user_id).await?;
    Ok(Json(notifications))
}

async fn audit_trail(
    State(state): State<Arc<AppState>>,
    Path(org_id): Path<Uuid>,
    _actor: Actor,
) -> Result<impl IntoResponse> {
    state.store.get_organization(org_id).await?;
    let entries = state.store.list_audit(org_id).await?;
    Ok(Json(entries))
}
