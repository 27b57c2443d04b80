//! In-memory implementation of the workflow collaborators
//!
//! All state sits behind one lock so that check-and-set operations on items
//! and approvals are atomic, matching what the SQLite store gets from
//! transactions.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::approval::Approval;
use super::content_item::{ContentItem, ContentState};
use super::ports::{ApprovalRepository, ApproverDirectory, AuditLogger, DecisionCommit};
use crate::error::{WorkflowError, WorkflowResult};
use crate::models::{Approver, AuditAction, AuditEntry};

#[derive(Default)]
struct MemoryState {
    items: HashMap<Uuid, ContentItem>,
    approvals: HashMap<Uuid, Approval>,
    approvers: Vec<Approver>,
    audit: Vec<AuditEntry>,
}

impl MemoryState {
    fn item(&self, organization_id: Uuid, item_id: Uuid) -> WorkflowResult<&ContentItem> {
        self.items
            .get(&item_id)
            .filter(|i| i.organization_id == organization_id)
            .ok_or_else(|| WorkflowError::NotFound(format!("Content item {}", item_id)))
    }

    fn check_item_state(&self, item: &ContentItem, from: ContentState) -> WorkflowResult<()> {
        let stored = self.item(item.organization_id, item.id)?;
        if stored.state != from {
            return Err(WorkflowError::InvalidState {
                item_id: item.id,
                state: stored.state,
            });
        }
        Ok(())
    }
}

/// Lock-protected store for tests and embedded use
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_item(&self, item: ContentItem) {
        let mut state = self.state.write().await;
        state.items.insert(item.id, item);
    }

    /// Add or re-rank an approver
    pub async fn add_approver(&self, approver: Approver) {
        let mut state = self.state.write().await;
        state.approvers.retain(|a| {
            !(a.organization_id == approver.organization_id
                && a.kind == approver.kind
                && a.user_id == approver.user_id)
        });
        state.approvers.push(approver);
    }

    pub async fn audit_entries(&self, organization_id: Uuid) -> Vec<AuditEntry> {
        let state = self.state.read().await;
        state
            .audit
            .iter()
            .filter(|e| e.organization_id == organization_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ApprovalRepository for MemoryStore {
    async fn content_item(
        &self,
        organization_id: Uuid,
        item_id: Uuid,
    ) -> WorkflowResult<ContentItem> {
        let state = self.state.read().await;
        state.item(organization_id, item_id).cloned()
    }

    async fn approval(&self, organization_id: Uuid, approval_id: Uuid) -> WorkflowResult<Approval> {
        let state = self.state.read().await;
        state
            .approvals
            .get(&approval_id)
            .filter(|a| a.organization_id == organization_id)
            .cloned()
            .ok_or_else(|| WorkflowError::NotFound(format!("Approval {}", approval_id)))
    }

    async fn approvals_for_item(
        &self,
        organization_id: Uuid,
        item_id: Uuid,
    ) -> WorkflowResult<Vec<Approval>> {
        let state = self.state.read().await;
        state.item(organization_id, item_id)?;
        let mut approvals: Vec<Approval> = state
            .approvals
            .values()
            .filter(|a| a.content_item_id == item_id)
            .cloned()
            .collect();
        approvals.sort_by_key(|a| (a.created_at, a.step));
        Ok(approvals)
    }

    async fn pending_for_approver(
        &self,
        organization_id: Uuid,
        approver_id: Uuid,
    ) -> WorkflowResult<Vec<Approval>> {
        let state = self.state.read().await;
        let mut approvals: Vec<Approval> = state
            .approvals
            .values()
            .filter(|a| {
                a.organization_id == organization_id
                    && a.approver_id == approver_id
                    && a.is_pending()
            })
            .cloned()
            .collect();
        approvals.sort_by_key(|a| a.created_at);
        Ok(approvals)
    }

    async fn open_approval(
        &self,
        item: &ContentItem,
        from: ContentState,
        approval: &Approval,
    ) -> WorkflowResult<()> {
        let mut state = self.state.write().await;
        state.check_item_state(item, from)?;
        state.items.insert(item.id, item.clone());
        state.approvals.insert(approval.id, approval.clone());
        Ok(())
    }

    async fn record_decision(&self, commit: &DecisionCommit) -> WorkflowResult<()> {
        let mut state = self.state.write().await;
        let approval = &commit.approval;
        let stored = state
            .approvals
            .get(&approval.id)
            .filter(|a| a.organization_id == approval.organization_id)
            .ok_or_else(|| WorkflowError::NotFound(format!("Approval {}", approval.id)))?;
        if stored.status.is_terminal() {
            return Err(WorkflowError::InvalidApprovalState {
                approval_id: approval.id,
                status: stored.status,
            });
        }
        state.check_item_state(&commit.item, commit.item_from)?;

        state.approvals.insert(approval.id, approval.clone());
        state.items.insert(commit.item.id, commit.item.clone());
        if let Some(next) = &commit.follow_on {
            state.approvals.insert(next.id, next.clone());
        }
        Ok(())
    }

    async fn update_item_state(
        &self,
        item: &ContentItem,
        from: ContentState,
    ) -> WorkflowResult<()> {
        let mut state = self.state.write().await;
        state.check_item_state(item, from)?;
        state.items.insert(item.id, item.clone());
        Ok(())
    }
}

#[async_trait]
impl ApproverDirectory for MemoryStore {
    async fn approvers_for(
        &self,
        organization_id: Uuid,
        item: &ContentItem,
    ) -> WorkflowResult<Vec<Approver>> {
        let state = self.state.read().await;
        let mut approvers: Vec<Approver> = state
            .approvers
            .iter()
            .filter(|a| a.organization_id == organization_id && a.kind == item.kind)
            .cloned()
            .collect();
        approvers.sort_by_key(Approver::sort_key);
        Ok(approvers)
    }
}

#[async_trait]
impl AuditLogger for MemoryStore {
    async fn log_approval_initiation(&self, approval: &Approval) -> WorkflowResult<()> {
        let mut state = self.state.write().await;
        state
            .audit
            .push(AuditEntry::for_approval(approval, AuditAction::ApprovalInitiated));
        Ok(())
    }

    async fn log_approval_decision(&self, approval: &Approval) -> WorkflowResult<()> {
        let mut state = self.state.write().await;
        state
            .audit
            .push(AuditEntry::for_approval(approval, AuditAction::ApprovalDecided));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::content_item::{Approvable, ContentKind};
    use crate::workflow::{ApprovalStatus, Decision};

    fn approver(org: Uuid, kind: ContentKind, user_id: Uuid, rank: i32) -> Approver {
        Approver {
            organization_id: org,
            kind,
            user_id,
            rank,
        }
    }

    #[tokio::test]
    async fn test_approvers_ordered_by_rank_then_id() {
        let store = MemoryStore::new();
        let org = Uuid::new_v4();
        let a = Uuid::from_u128(0xa);
        let b = Uuid::from_u128(0xb);
        let c = Uuid::from_u128(0xc);
        store.add_approver(approver(org, ContentKind::Risk, c, 0)).await;
        store.add_approver(approver(org, ContentKind::Risk, b, 1)).await;
        store.add_approver(approver(org, ContentKind::Risk, a, 1)).await;
        store.add_approver(approver(org, ContentKind::Contract, a, -5)).await;

        let item = ContentItem::new(org, ContentKind::Risk, "Fraud", Uuid::new_v4());
        let found = store.approvers_for(org, &item).await.unwrap();
        let ids: Vec<Uuid> = found.iter().map(|a| a.user_id).collect();
        assert_eq!(ids, vec![c, a, b]);
    }

    #[tokio::test]
    async fn test_add_approver_replaces_rank() {
        let store = MemoryStore::new();
        let org = Uuid::new_v4();
        let user = Uuid::new_v4();
        store.add_approver(approver(org, ContentKind::Risk, user, 3)).await;
        store.add_approver(approver(org, ContentKind::Risk, user, 1)).await;

        let item = ContentItem::new(org, ContentKind::Risk, "Fraud", Uuid::new_v4());
        let found = store.approvers_for(org, &item).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].rank, 1);
    }

    #[tokio::test]
    async fn test_items_are_scoped_to_organization() {
        let store = MemoryStore::new();
        let item = ContentItem::new(Uuid::new_v4(), ContentKind::Risk, "Fraud", Uuid::new_v4());
        store.insert_item(item.clone()).await;

        assert!(store.content_item(item.organization_id, item.id).await.is_ok());
        let err = store
            .content_item(Uuid::new_v4(), item.id)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_open_approval_refuses_stale_state() {
        let store = MemoryStore::new();
        let mut item = ContentItem::new(Uuid::new_v4(), ContentKind::Risk, "Fraud", Uuid::new_v4());
        store.insert_item(item.clone()).await;

        let approval = Approval::new(&item, Uuid::new_v4(), Uuid::new_v4());
        item.submit_for_approval(approval.id).unwrap();
        store
            .open_approval(&item, ContentState::Draft, &approval)
            .await
            .unwrap();

        let second = Approval::new(&item, Uuid::new_v4(), Uuid::new_v4());
        let err = store
            .open_approval(&item, ContentState::Draft, &second)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InvalidState {
                state: ContentState::PendingApproval,
                ..
            }
        ));
        let history = store
            .approvals_for_item(item.organization_id, item.id)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_record_decision_is_compare_and_swap() {
        let store = MemoryStore::new();
        let mut item = ContentItem::new(Uuid::new_v4(), ContentKind::Risk, "Fraud", Uuid::new_v4());
        store.insert_item(item.clone()).await;
        let approval = Approval::new(&item, Uuid::new_v4(), Uuid::new_v4());
        item.submit_for_approval(approval.id).unwrap();
        store
            .open_approval(&item, ContentState::Draft, &approval)
            .await
            .unwrap();

        let mut decided = approval.clone();
        decided.record(Decision::Approved, "").unwrap();
        let mut approved_item = item.clone();
        approved_item.approve().unwrap();
        let commit = DecisionCommit {
            approval: decided,
            item: approved_item,
            item_from: ContentState::PendingApproval,
            follow_on: None,
        };

        store.record_decision(&commit).await.unwrap();
        let err = store.record_decision(&commit).await.unwrap_err();
        assert_eq!(
            err,
            WorkflowError::InvalidApprovalState {
                approval_id: approval.id,
                status: ApprovalStatus::Approved,
            }
        );
    }
}
