//! Approval chains
//!
//! A chain decides what happens after an approver records a decision: either
//! the cycle ends, or the item is handed to another approver.

use serde::Serialize;
use uuid::Uuid;

use super::approval::Approval;
use super::content_item::{ContentItem, ContentState};
use crate::models::Approver;

/// Inputs available to a chain when computing the next step
#[derive(Debug, Clone, Copy)]
pub struct ChainContext<'a> {
    pub item: &'a ContentItem,
    /// The approval being decided, still pending
    pub approval: &'a Approval,
    /// Eligible approvers in rank order
    pub approvers: &'a [Approver],
    /// Users who approved earlier steps of this cycle
    pub approved: &'a [Uuid],
}

/// What a chain wants done after a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStep {
    /// End the cycle and apply the decision to the item
    Complete,
    /// Keep the item pending and open an approval for this user
    Escalate { approver_id: Uuid },
}

/// Result of processing an approval, returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NextStep {
    /// The cycle ended with the item in `state`
    Completed {
        content_item_id: Uuid,
        state: ContentState,
    },
    /// The item awaits another approver
    NextApprover { approval: Approval },
}

impl NextStep {
    pub fn is_complete(&self) -> bool {
        matches!(self, NextStep::Completed { .. })
    }
}

/// Computes next steps after approvals and rejections
pub trait ApprovalChain: Send + Sync {
    fn on_approved(&self, ctx: &ChainContext<'_>) -> ChainStep;

    fn on_rejected(&self, ctx: &ChainContext<'_>) -> ChainStep;
}

/// One approver decides; the cycle always ends with their decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleStepChain;

impl ApprovalChain for SingleStepChain {
    fn on_approved(&self, _ctx: &ChainContext<'_>) -> ChainStep {
        ChainStep::Complete
    }

    fn on_rejected(&self, _ctx: &ChainContext<'_>) -> ChainStep {
        ChainStep::Complete
    }
}

/// Every approver must approve once per cycle, in rank order. Any rejection
/// ends the cycle.
///
/// The next approver is the highest-ranked one who has not yet approved in
/// this cycle, so re-ranking mid-cycle never asks someone twice.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialChain;

impl ApprovalChain for SequentialChain {
    fn on_approved(&self, ctx: &ChainContext<'_>) -> ChainStep {
        let next = ctx.approvers.iter().find(|a| {
            a.user_id != ctx.approval.approver_id && !ctx.approved.contains(&a.user_id)
        });

        match next {
            Some(next) => ChainStep::Escalate {
                approver_id: next.user_id,
            },
            None => ChainStep::Complete,
        }
    }

    fn on_rejected(&self, _ctx: &ChainContext<'_>) -> ChainStep {
        ChainStep::Complete
    }
}
