//! Content items subject to approval
//!
//! Any business entity an organization wants signed off (audit issues, risks,
//! contracts, legal cases, documents) is represented as a content item with a
//! lifecycle state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{WorkflowError, WorkflowResult};

/// Kind of business entity behind a content item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    AuditIssue,
    Risk,
    Contract,
    LegalCase,
    Document,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::AuditIssue => "audit_issue",
            ContentKind::Risk => "risk",
            ContentKind::Contract => "contract",
            ContentKind::LegalCase => "legal_case",
            ContentKind::Document => "document",
        }
    }
}

impl std::str::FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audit_issue" => Ok(ContentKind::AuditIssue),
            "risk" => Ok(ContentKind::Risk),
            "contract" => Ok(ContentKind::Contract),
            "legal_case" => Ok(ContentKind::LegalCase),
            "document" => Ok(ContentKind::Document),
            _ => Err(format!("Invalid content kind: {}", s)),
        }
    }
}

/// Lifecycle state of a content item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentState {
    /// Being edited; may be submitted for approval
    Draft,
    /// Waiting on an approver
    PendingApproval,
    /// Signed off
    Approved,
    /// Turned down; may be reopened as a draft
    Rejected,
}

impl ContentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentState::Draft => "draft",
            ContentState::PendingApproval => "pending_approval",
            ContentState::Approved => "approved",
            ContentState::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for ContentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ContentState::Draft),
            "pending_approval" => Ok(ContentState::PendingApproval),
            "approved" => Ok(ContentState::Approved),
            "rejected" => Ok(ContentState::Rejected),
            _ => Err(format!("Invalid content state: {}", s)),
        }
    }
}

/// Contract for entities that can be driven through an approval cycle.
///
/// Transition methods validate the source state and fail with
/// [`WorkflowError::InvalidState`] otherwise; they never touch storage.
pub trait Approvable {
    fn id(&self) -> Uuid;

    fn organization_id(&self) -> Uuid;

    fn state(&self) -> ContentState;

    /// The approval currently open against this item, if any
    fn current_approval_id(&self) -> Option<Uuid>;

    /// DRAFT -> PENDING_APPROVAL, opening `approval_id`
    fn submit_for_approval(&mut self, approval_id: Uuid) -> WorkflowResult<()>;

    /// Hand a pending item over to the next approval in a chain
    fn assign_next_approval(&mut self, approval_id: Uuid) -> WorkflowResult<()>;

    /// PENDING_APPROVAL -> APPROVED
    fn approve(&mut self) -> WorkflowResult<()>;

    /// PENDING_APPROVAL -> REJECTED
    fn reject(&mut self) -> WorkflowResult<()>;

    /// REJECTED -> DRAFT
    fn reopen(&mut self) -> WorkflowResult<()>;
}

/// A business entity owned by one organization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub kind: ContentKind,
    pub title: String,
    pub state: ContentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_approval_id: Option<Uuid>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentItem {
    /// Create a new draft item
    pub fn new(
        organization_id: Uuid,
        kind: ContentKind,
        title: impl Into<String>,
        created_by: Uuid,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            kind,
            title: title.into(),
            state: ContentState::Draft,
            current_approval_id: None,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, from: ContentState, to: ContentState) -> WorkflowResult<()> {
        if self.state != from {
            return Err(WorkflowError::InvalidState {
                item_id: self.id,
                state: self.state,
            });
        }
        self.state = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

impl Approvable for ContentItem {
    fn id(&self) -> Uuid {
        self.id
    }

    fn organization_id(&self) -> Uuid {
        self.organization_id
    }

    fn state(&self) -> ContentState {
        self.state
    }

    fn current_approval_id(&self) -> Option<Uuid> {
        self.current_approval_id
    }

    fn submit_for_approval(&mut self, approval_id: Uuid) -> WorkflowResult<()> {
        self.transition(ContentState::Draft, ContentState::PendingApproval)?;
        self.current_approval_id = Some(approval_id);
        Ok(())
    }

    fn assign_next_approval(&mut self, approval_id: Uuid) -> WorkflowResult<()> {
        self.transition(ContentState::PendingApproval, ContentState::PendingApproval)?;
        self.current_approval_id = Some(approval_id);
        Ok(())
    }

    fn approve(&mut self) -> WorkflowResult<()> {
        self.transition(ContentState::PendingApproval, ContentState::Approved)?;
        self.current_approval_id = None;
        Ok(())
    }

    fn reject(&mut self) -> WorkflowResult<()> {
        self.transition(ContentState::PendingApproval, ContentState::Rejected)?;
        self.current_approval_id = None;
        Ok(())
    }

    fn reopen(&mut self) -> WorkflowResult<()> {
        self.transition(ContentState::Rejected, ContentState::Draft)
    }
}
