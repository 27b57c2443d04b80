//! Data models for organizations, approver assignments, notifications and the audit trail

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::{Approval, ContentKind, Decision, NotificationMessage};

/// A tenant. Every other record is scoped to exactly one organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A user allowed to approve one kind of content within an organization.
///
/// Approvers are consulted in ascending `rank`, ties broken by `user_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approver {
    pub organization_id: Uuid,
    pub kind: ContentKind,
    pub user_id: Uuid,
    pub rank: i32,
}

impl Approver {
    pub fn sort_key(&self) -> (i32, Uuid) {
        (self.rank, self.user_id)
    }
}

/// What a notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Sent to the approver when an approval is opened
    ApprovalRequested,
    /// Sent to the requester when a decision is recorded
    ApprovalDecided,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::ApprovalRequested => "approval_requested",
            NotificationKind::ApprovalDecided => "approval_decided",
        }
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approval_requested" => Ok(NotificationKind::ApprovalRequested),
            "approval_decided" => Ok(NotificationKind::ApprovalDecided),
            _ => Err(format!("Invalid notification kind: {}", s)),
        }
    }
}

/// A delivered notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub recipient_id: Uuid,
    pub approval_id: Uuid,
    pub kind: NotificationKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Record of a message handed to a sink
    pub fn delivered(message: &NotificationMessage) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id: message.organization_id,
            recipient_id: message.recipient_id,
            approval_id: message.approval_id,
            kind: message.kind,
            message: message.message.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Audited workflow actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ApprovalInitiated,
    ApprovalDecided,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::ApprovalInitiated => "approval_initiated",
            AuditAction::ApprovalDecided => "approval_decided",
        }
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approval_initiated" => Ok(AuditAction::ApprovalInitiated),
            "approval_decided" => Ok(AuditAction::ApprovalDecided),
            _ => Err(format!("Invalid audit action: {}", s)),
        }
    }
}

/// An append-only audit trail entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub approval_id: Uuid,
    pub content_item_id: Uuid,
    pub actor_id: Uuid,
    pub action: AuditAction,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Audit entry for an approval event. The requester is the actor for
    /// initiation, the approver for a decision.
    pub fn for_approval(approval: &Approval, action: AuditAction) -> Self {
        let actor_id = match action {
            AuditAction::ApprovalInitiated => approval.requester_id,
            AuditAction::ApprovalDecided => approval.approver_id,
        };
        Self {
            id: Uuid::new_v4(),
            organization_id: approval.organization_id,
            approval_id: approval.id,
            content_item_id: approval.content_item_id,
            actor_id,
            action,
            detail: serde_json::json!({
                "status": approval.status.as_str(),
                "step": approval.step,
                "approver_id": approval.approver_id,
                "comments": approval.comments,
            }),
            created_at: Utc::now(),
        }
    }
}

/// Request to create an organization
#[derive(Debug, Deserialize)]
pub struct CreateOrganizationRequest {
    pub name: String,
}

/// Request to assign an approver
#[derive(Debug, Deserialize)]
pub struct AssignApproverRequest {
    pub kind: ContentKind,
    pub user_id: Uuid,
    #[serde(default)]
    pub rank: i32,
}

/// Request to create a content item
#[derive(Debug, Deserialize)]
pub struct CreateItemRequest {
    pub kind: ContentKind,
    pub title: String,
}

/// Request to record a decision on an approval
#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub decision: Decision,
    #[serde(default)]
    pub comments: String,
}
