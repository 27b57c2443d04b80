//! Approval records
//!
//! One approval tracks a single request for sign-off on a content item.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::content_item::ContentItem;
use crate::error::{WorkflowError, WorkflowResult};

/// Status of an approval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Waiting for the approver
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ApprovalStatus::Pending),
            "approved" => Ok(ApprovalStatus::Approved),
            "rejected" => Ok(ApprovalStatus::Rejected),
            _ => Err(format!("Invalid approval status: {}", s)),
        }
    }
}

/// An approver's verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    /// The terminal approval status this decision produces
    pub fn status(&self) -> ApprovalStatus {
        match self {
            Decision::Approved => ApprovalStatus::Approved,
            Decision::Rejected => ApprovalStatus::Rejected,
        }
    }
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" | "approve" => Ok(Decision::Approved),
            "rejected" | "reject" => Ok(Decision::Rejected),
            _ => Err(format!("Invalid decision: {}", s)),
        }
    }
}

/// A request for one approver to sign off a content item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub id: Uuid,
    pub content_item_id: Uuid,
    pub organization_id: Uuid,
    pub requester_id: Uuid,
    pub approver_id: Uuid,
    pub status: ApprovalStatus,
    pub comments: String,
    /// 1-based position in the approval chain
    pub step: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
}

impl Approval {
    /// Open the first approval of a cycle
    pub fn new(item: &ContentItem, requester_id: Uuid, approver_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            content_item_id: item.id,
            organization_id: item.organization_id,
            requester_id,
            approver_id,
            status: ApprovalStatus::Pending,
            comments: String::new(),
            step: 1,
            created_at: now,
            updated_at: now,
            decided_at: None,
        }
    }

    /// Open the approval that follows this one in a chain
    pub fn follow_on(&self, approver_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            content_item_id: self.content_item_id,
            organization_id: self.organization_id,
            requester_id: self.requester_id,
            approver_id,
            status: ApprovalStatus::Pending,
            comments: String::new(),
            step: self.step + 1,
            created_at: now,
            updated_at: now,
            decided_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Record the approver's decision. Only a pending approval can be decided.
    pub fn record(
        &mut self,
        decision: Decision,
        comments: impl Into<String>,
    ) -> WorkflowResult<()> {
        if self.status.is_terminal() {
            return Err(WorkflowError::InvalidApprovalState {
                approval_id: self.id,
                status: self.status,
            });
        }
        let now = Utc::now();
        self.status = decision.status();
        self.comments = comments.into();
        self.updated_at = now;
        self.decided_at = Some(now);
        Ok(())
    }
}
