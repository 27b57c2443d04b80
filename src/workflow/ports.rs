//! Collaborator contracts consumed by the workflow engine
//!
//! The engine never reaches for ambient state: storage, approver lookup,
//! notification and audit logging are handed to it as trait objects.

use async_trait::async_trait;
use uuid::Uuid;

use super::approval::Approval;
use super::content_item::{ContentItem, ContentState};
use super::notify::NotifyError;
use crate::error::WorkflowResult;
use crate::models::Approver;

/// Everything the store must apply atomically when a decision is recorded
#[derive(Debug, Clone)]
pub struct DecisionCommit {
    /// The approval with its terminal status already set
    pub approval: Approval,
    /// The content item after its transition
    pub item: ContentItem,
    /// State the stored item must still be in for the commit to apply
    pub item_from: ContentState,
    /// Next approval in the chain, if the chain continues
    pub follow_on: Option<Approval>,
}

/// Persistence for content items and approvals.
///
/// Every lookup is scoped to an organization; records owned by another
/// organization are reported as missing.
#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn content_item(&self, organization_id: Uuid, item_id: Uuid)
        -> WorkflowResult<ContentItem>;

    async fn approval(&self, organization_id: Uuid, approval_id: Uuid) -> WorkflowResult<Approval>;

    /// All approvals for an item, oldest first
    async fn approvals_for_item(
        &self,
        organization_id: Uuid,
        item_id: Uuid,
    ) -> WorkflowResult<Vec<Approval>>;

    /// Pending approvals assigned to a user, oldest first
    async fn pending_for_approver(
        &self,
        organization_id: Uuid,
        approver_id: Uuid,
    ) -> WorkflowResult<Vec<Approval>>;

    /// Store the submitted item and its new approval in one transaction.
    ///
    /// Fails with `InvalidState` if the stored item is no longer in `from`.
    async fn open_approval(
        &self,
        item: &ContentItem,
        from: ContentState,
        approval: &Approval,
    ) -> WorkflowResult<()>;

    /// Apply a decision in one transaction.
    ///
    /// Fails with `InvalidApprovalState` if the stored approval is no longer
    /// pending, in which case nothing is written.
    async fn record_decision(&self, commit: &DecisionCommit) -> WorkflowResult<()>;

    /// Store an item transition that involves no approval, guarded by `from`
    async fn update_item_state(&self, item: &ContentItem, from: ContentState)
        -> WorkflowResult<()>;
}

/// Resolves who may approve a content item
#[async_trait]
pub trait ApproverDirectory: Send + Sync {
    /// Eligible approvers in rank order, ties broken by user id. May be empty.
    async fn approvers_for(
        &self,
        organization_id: Uuid,
        item: &ContentItem,
    ) -> WorkflowResult<Vec<Approver>>;
}

/// Best-effort participant notification
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_approver(&self, approval: &Approval) -> Result<(), NotifyError>;

    async fn notify_requester(&self, approval: &Approval) -> Result<(), NotifyError>;
}

/// Append-only audit trail
#[async_trait]
pub trait AuditLogger: Send + Sync {
    async fn log_approval_initiation(&self, approval: &Approval) -> WorkflowResult<()>;

    async fn log_approval_decision(&self, approval: &Approval) -> WorkflowResult<()>;
}
