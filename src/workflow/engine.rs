//! Approval workflow engine
//!
//! Drives a content item through DRAFT -> PENDING_APPROVAL -> APPROVED or
//! REJECTED. State changes are committed through the repository; the
//! notifier and audit logger run afterwards and are best-effort.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::approval::{Approval, ApprovalStatus, Decision};
use super::chain::{ApprovalChain, ChainContext, ChainStep, NextStep, SingleStepChain};
use super::content_item::{Approvable, ContentItem, ContentState};
use super::ports::{ApprovalRepository, ApproverDirectory, AuditLogger, DecisionCommit, Notifier};
use crate::error::{WorkflowError, WorkflowResult};

/// Events emitted by the workflow engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// An approval was opened
    ApprovalRequested {
        organization_id: Uuid,
        approval_id: Uuid,
        content_item_id: Uuid,
        requester_id: Uuid,
        approver_id: Uuid,
        step: u32,
    },
    /// A decision was recorded
    ApprovalDecided {
        organization_id: Uuid,
        approval_id: Uuid,
        content_item_id: Uuid,
        approver_id: Uuid,
        status: ApprovalStatus,
        item_state: ContentState,
    },
    /// A rejected item went back to draft
    ItemReopened {
        organization_id: Uuid,
        content_item_id: Uuid,
        actor_id: Uuid,
    },
}

impl WorkflowEvent {
    pub fn organization_id(&self) -> Uuid {
        match self {
            WorkflowEvent::ApprovalRequested {
                organization_id, ..
            }
            | WorkflowEvent::ApprovalDecided {
                organization_id, ..
            }
            | WorkflowEvent::ItemReopened {
                organization_id, ..
            } => *organization_id,
        }
    }

    fn requested(approval: &Approval) -> Self {
        WorkflowEvent::ApprovalRequested {
            organization_id: approval.organization_id,
            approval_id: approval.id,
            content_item_id: approval.content_item_id,
            requester_id: approval.requester_id,
            approver_id: approval.approver_id,
            step: approval.step,
        }
    }
}

/// The approval workflow engine
pub struct ApprovalWorkflow {
    repository: Arc<dyn ApprovalRepository>,
    approvers: Arc<dyn ApproverDirectory>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditLogger>,
    chain: Arc<dyn ApprovalChain>,
    event_tx: broadcast::Sender<WorkflowEvent>,
}

impl ApprovalWorkflow {
    /// Create an engine using the single-step chain
    pub fn new(
        repository: Arc<dyn ApprovalRepository>,
        approvers: Arc<dyn ApproverDirectory>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditLogger>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            repository,
            approvers,
            notifier,
            audit,
            chain: Arc::new(SingleStepChain),
            event_tx,
        }
    }

    /// Replace the approval chain
    pub fn with_chain(mut self, chain: Arc<dyn ApprovalChain>) -> Self {
        self.chain = chain;
        self
    }

    /// Subscribe to workflow events
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.event_tx.subscribe()
    }

    /// Submit a draft item for approval by its first approver.
    #[tracing::instrument(skip(self))]
    pub async fn initiate_approval(
        &self,
        organization_id: Uuid,
        item_id: Uuid,
        requester_id: Uuid,
    ) -> WorkflowResult<Approval> {
        let mut item = self.repository.content_item(organization_id, item_id).await?;
        let from = item.state();
        if from != ContentState::Draft {
            return Err(WorkflowError::InvalidState {
                item_id,
                state: from,
            });
        }

        let approvers = self.approvers.approvers_for(organization_id, &item).await?;
        let first = approvers
            .first()
            .ok_or(WorkflowError::NoApprovers { item_id })?;

        let approval = Approval::new(&item, requester_id, first.user_id);
        item.submit_for_approval(approval.id)?;
        self.repository.open_approval(&item, from, &approval).await?;

        tracing::info!(
            approval = %approval.id,
            approver = %approval.approver_id,
            "Approval initiated"
        );

        self.announce_opened(&approval).await;
        Ok(approval)
    }

    /// Record an approver's decision and compute the next step.
    #[tracing::instrument(skip(self, comments))]
    pub async fn process_approval(
        &self,
        organization_id: Uuid,
        approval_id: Uuid,
        approver_id: Uuid,
        decision: Decision,
        comments: impl Into<String>,
    ) -> WorkflowResult<NextStep> {
        let mut approval = self.repository.approval(organization_id, approval_id).await?;
        if !approval.is_pending() {
            return Err(WorkflowError::InvalidApprovalState {
                approval_id,
                status: approval.status,
            });
        }
        if approval.approver_id != approver_id {
            return Err(WorkflowError::NotAssignedApprover {
                approval_id,
                user_id: approver_id,
            });
        }

        let mut item = self
            .repository
            .content_item(organization_id, approval.content_item_id)
            .await?;
        let item_from = item.state();
        if item.current_approval_id() != Some(approval.id) {
            // A concurrent decision committed between the two reads
            let latest = self.repository.approval(organization_id, approval_id).await?;
            if !latest.is_pending() {
                return Err(WorkflowError::InvalidApprovalState {
                    approval_id,
                    status: latest.status,
                });
            }
            return Err(WorkflowError::InvalidState {
                item_id: item.id,
                state: item_from,
            });
        }
        let approvers = self.approvers.approvers_for(organization_id, &item).await?;
        let approved = if approval.step > 1 {
            let history = self
                .repository
                .approvals_for_item(organization_id, item.id)
                .await?;
            approved_in_cycle(&history, &approval)
        } else {
            Vec::new()
        };

        let step = {
            let ctx = ChainContext {
                item: &item,
                approval: &approval,
                approvers: &approvers,
                approved: &approved,
            };
            match decision {
                Decision::Approved => self.chain.on_approved(&ctx),
                Decision::Rejected => self.chain.on_rejected(&ctx),
            }
        };

        approval.record(decision, comments)?;

        let (follow_on, next) = match step {
            ChainStep::Complete => {
                match decision {
                    Decision::Approved => item.approve()?,
                    Decision::Rejected => item.reject()?,
                }
                let next = NextStep::Completed {
                    content_item_id: item.id,
                    state: item.state(),
                };
                (None, next)
            }
            ChainStep::Escalate { approver_id: next_approver } => {
                let next = approval.follow_on(next_approver);
                item.assign_next_approval(next.id)?;
                (Some(next.clone()), NextStep::NextApprover { approval: next })
            }
        };

        self.repository
            .record_decision(&DecisionCommit {
                approval: approval.clone(),
                item: item.clone(),
                item_from,
                follow_on: follow_on.clone(),
            })
            .await?;

        tracing::info!(
            approval = %approval.id,
            status = approval.status.as_str(),
            item_state = item.state().as_str(),
            "Approval decided"
        );

        if let Err(e) = self.notifier.notify_requester(&approval).await {
            tracing::warn!(approval = %approval.id, "Failed to notify requester: {}", e);
        }
        if let Err(e) = self.audit.log_approval_decision(&approval).await {
            tracing::error!(approval = %approval.id, "Failed to audit approval decision: {}", e);
        }
        let _ = self.event_tx.send(WorkflowEvent::ApprovalDecided {
            organization_id,
            approval_id: approval.id,
            content_item_id: item.id,
            approver_id,
            status: approval.status,
            item_state: item.state(),
        });

        if let Some(next) = &follow_on {
            self.announce_opened(next).await;
        }

        Ok(next)
    }

    /// Return a rejected item to draft so a new cycle can start.
    #[tracing::instrument(skip(self))]
    pub async fn reopen(
        &self,
        organization_id: Uuid,
        item_id: Uuid,
        actor_id: Uuid,
    ) -> WorkflowResult<ContentItem> {
        let mut item = self.repository.content_item(organization_id, item_id).await?;
        let from = item.state();
        item.reopen()?;
        self.repository.update_item_state(&item, from).await?;

        tracing::info!(item = %item.id, "Content item reopened");
        let _ = self.event_tx.send(WorkflowEvent::ItemReopened {
            organization_id,
            content_item_id: item.id,
            actor_id,
        });

        Ok(item)
    }

    pub async fn content_item(
        &self,
        organization_id: Uuid,
        item_id: Uuid,
    ) -> WorkflowResult<ContentItem> {
        self.repository.content_item(organization_id, item_id).await
    }

    pub async fn approval(
        &self,
        organization_id: Uuid,
        approval_id: Uuid,
    ) -> WorkflowResult<Approval> {
        self.repository.approval(organization_id, approval_id).await
    }

    /// Approval history for an item, oldest first
    pub async fn approvals_for_item(
        &self,
        organization_id: Uuid,
        item_id: Uuid,
    ) -> WorkflowResult<Vec<Approval>> {
        self.repository
            .approvals_for_item(organization_id, item_id)
            .await
    }

    /// Approvals waiting on a user
    pub async fn pending_for_approver(
        &self,
        organization_id: Uuid,
        approver_id: Uuid,
    ) -> WorkflowResult<Vec<Approval>> {
        self.repository
            .pending_for_approver(organization_id, approver_id)
            .await
    }

    async fn announce_opened(&self, approval: &Approval) {
        if let Err(e) = self.notifier.notify_approver(approval).await {
            tracing::warn!(approval = %approval.id, "Failed to notify approver: {}", e);
        }
        if let Err(e) = self.audit.log_approval_initiation(approval).await {
            tracing::error!(approval = %approval.id, "Failed to audit approval initiation: {}", e);
        }
        let _ = self.event_tx.send(WorkflowEvent::requested(approval));
    }
}

/// Users who approved the steps before `approval` in its cycle.
///
/// `history` is oldest first; a cycle starts at the latest step-one approval
/// preceding `approval`.
fn approved_in_cycle(history: &[Approval], approval: &Approval) -> Vec<Uuid> {
    let end = history
        .iter()
        .position(|a| a.id == approval.id)
        .unwrap_or(history.len());
    if approval.step <= 1 {
        return Vec::new();
    }
    let start = history[..end]
        .iter()
        .rposition(|a| a.step == 1)
        .unwrap_or(0);
    history[start..end]
        .iter()
        .filter(|a| a.status == ApprovalStatus::Approved)
        .map(|a| a.approver_id)
        .collect()
}
