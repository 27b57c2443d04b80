//! Approval workflow
//!
//! Content items move through DRAFT -> PENDING_APPROVAL -> APPROVED / REJECTED
//! under the control of [`ApprovalWorkflow`]. Storage, approver lookup,
//! notification and auditing are injected through the traits in [`ports`].

pub mod approval;
pub mod chain;
pub mod content_item;
pub mod engine;
pub mod memory;
pub mod notify;
pub mod ports;

pub use approval::{Approval, ApprovalStatus, Decision};
pub use chain::{ApprovalChain, ChainContext, ChainStep, NextStep, SequentialChain, SingleStepChain};
pub use content_item::{Approvable, ContentItem, ContentKind, ContentState};
pub use engine::{ApprovalWorkflow, WorkflowEvent};
pub use memory::MemoryStore;
pub use notify::{
    NotificationMessage, NotificationQueue, NotificationSink, NotifyError, RetryPolicy,
    WorkerReport,
};
pub use ports::{ApprovalRepository, ApproverDirectory, AuditLogger, DecisionCommit, Notifier};
