//! Error types for the application

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::workflow::{ApprovalStatus, ContentState};

/// Failures raised by the approval workflow engine and its collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Content item {item_id} is {} and cannot make this transition", .state.as_str())]
    InvalidState { item_id: Uuid, state: ContentState },

    #[error("No approvers configured for content item {item_id}")]
    NoApprovers { item_id: Uuid },

    #[error("Approval {approval_id} is already {}", .status.as_str())]
    InvalidApprovalState {
        approval_id: Uuid,
        status: ApprovalStatus,
    },

    #[error("User {user_id} is not the assigned approver for approval {approval_id}")]
    NotAssignedApprover { approval_id: Uuid, user_id: Uuid },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for WorkflowError {
    fn from(err: sqlx::Error) -> Self {
        WorkflowError::Storage(err.to_string())
    }
}

/// Result type for workflow operations
pub type WorkflowResult<T> = std::result::Result<T, WorkflowError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Workflow(err) => match err {
                WorkflowError::InvalidState { .. } | WorkflowError::InvalidApprovalState { .. } => {
                    StatusCode::CONFLICT
                }
                WorkflowError::NoApprovers { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                WorkflowError::NotAssignedApprover { .. } => StatusCode::FORBIDDEN,
                WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
                WorkflowError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "Database error".to_string()
            }
            AppError::Workflow(WorkflowError::Storage(e)) => {
                tracing::error!("Storage error: {}", e);
                "Storage error".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                e.clone()
            }
            other => other.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
