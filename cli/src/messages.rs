//! Wire types for the GRC workflow HTTP and event APIs
//!
//! These mirror the server's JSON. Some fields are not printed by the CLI
//! but are kept so responses decode completely.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approver {
    pub organization_id: Uuid,
    pub kind: String,
    pub user_id: Uuid,
    pub rank: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub kind: String,
    pub title: String,
    pub state: String,
    #[serde(default)]
    pub current_approval_id: Option<Uuid>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub id: Uuid,
    pub content_item_id: Uuid,
    pub organization_id: Uuid,
    pub requester_id: Uuid,
    pub approver_id: Uuid,
    pub status: String,
    #[serde(default)]
    pub comments: String,
    pub step: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub recipient_id: Uuid,
    pub approval_id: Uuid,
    pub kind: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a decision
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NextStep {
    Completed {
        content_item_id: Uuid,
        state: String,
    },
    NextApprover {
        approval: Approval,
    },
}

// Request bodies

#[derive(Debug, Serialize)]
pub struct CreateOrganization<'a> {
    pub name: &'a str,
}

#[derive(Debug, Serialize)]
pub struct AssignApprover<'a> {
    pub kind: &'a str,
    pub user_id: Uuid,
    pub rank: i32,
}

#[derive(Debug, Serialize)]
pub struct CreateItem<'a> {
    pub kind: &'a str,
    pub title: &'a str,
}

#[derive(Debug, Serialize)]
pub struct DecisionBody<'a> {
    pub decision: &'a str,
    pub comments: &'a str,
}

/// Error body returned by the server
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Messages on the event stream
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Subscribed {
        organization_id: Uuid,
    },
    Lagged {
        skipped: u64,
    },
    ApprovalRequested {
        organization_id: Uuid,
        approval_id: Uuid,
        content_item_id: Uuid,
        requester_id: Uuid,
        approver_id: Uuid,
        step: u32,
    },
    ApprovalDecided {
        organization_id: Uuid,
        approval_id: Uuid,
        content_item_id: Uuid,
        approver_id: Uuid,
        status: String,
        item_state: String,
    },
    ItemReopened {
        organization_id: Uuid,
        content_item_id: Uuid,
        actor_id: Uuid,
    },
}
