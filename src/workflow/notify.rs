//! Queued notification dispatch
//!
//! The engine hands notifications to a [`NotificationQueue`], which returns
//! immediately. A background worker delivers each message to a
//! [`NotificationSink`], retrying with exponential backoff. Delivery problems
//! are logged and never reach the engine's caller.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::approval::Approval;
use super::ports::Notifier;
use crate::models::NotificationKind;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("Notification queue is full")]
    QueueFull,

    #[error("Notification queue is closed")]
    QueueClosed,

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// A notification waiting to be delivered
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationMessage {
    pub organization_id: Uuid,
    pub recipient_id: Uuid,
    pub approval_id: Uuid,
    pub kind: NotificationKind,
    pub message: String,
}

impl NotificationMessage {
    /// Message telling an approver that an approval awaits them
    pub fn approval_requested(approval: &Approval) -> Self {
        Self {
            organization_id: approval.organization_id,
            recipient_id: approval.approver_id,
            approval_id: approval.id,
            kind: NotificationKind::ApprovalRequested,
            message: format!(
                "Approval {} (step {}) is waiting for your decision",
                approval.id, approval.step
            ),
        }
    }

    /// Message telling a requester how their approval was decided
    pub fn approval_decided(approval: &Approval) -> Self {
        let mut message = format!("Approval {} was {}", approval.id, approval.status.as_str());
        if !approval.comments.is_empty() {
            message.push_str(": ");
            message.push_str(&approval.comments);
        }
        Self {
            organization_id: approval.organization_id,
            recipient_id: approval.requester_id,
            approval_id: approval.id,
            kind: NotificationKind::ApprovalDecided,
            message,
        }
    }
}

/// Final destination for notifications
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, message: &NotificationMessage) -> Result<(), NotifyError>;
}

/// Retry behavior for failed deliveries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before the given retry (1-based), doubling each time
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(retry.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

/// [`Notifier`] that enqueues messages for a background worker
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<NotificationMessage>,
}

impl NotificationQueue {
    /// Start a worker delivering to `sink` and return the queue feeding it.
    ///
    /// The worker exits once every queue handle has been dropped and the
    /// backlog is drained.
    pub fn spawn(
        sink: Arc<dyn NotificationSink>,
        policy: RetryPolicy,
        capacity: usize,
    ) -> (Self, JoinHandle<WorkerReport>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_worker(rx, sink, policy));
        (Self { tx }, handle)
    }

    pub fn enqueue(&self, message: NotificationMessage) -> Result<(), NotifyError> {
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NotifyError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => NotifyError::QueueClosed,
        })
    }
}

#[async_trait]
impl Notifier for NotificationQueue {
    async fn notify_approver(&self, approval: &Approval) -> Result<(), NotifyError> {
        self.enqueue(NotificationMessage::approval_requested(approval))
    }

    async fn notify_requester(&self, approval: &Approval) -> Result<(), NotifyError> {
        self.enqueue(NotificationMessage::approval_decided(approval))
    }
}

/// Counts kept by the worker over its lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub delivered: u64,
    pub dropped: u64,
}

async fn run_worker(
    mut rx: mpsc::Receiver<NotificationMessage>,
    sink: Arc<dyn NotificationSink>,
    policy: RetryPolicy,
) -> WorkerReport {
    let mut report = WorkerReport::default();
    while let Some(message) = rx.recv().await {
        if deliver_with_retry(sink.as_ref(), &message, policy).await {
            report.delivered += 1;
        } else {
            report.dropped += 1;
        }
    }
    tracing::info!(
        delivered = report.delivered,
        dropped = report.dropped,
        "Notification worker stopped"
    );
    report
}

/// Wait for the worker to drain its backlog after every queue handle is gone.
///
/// Returns `None` if the backlog was not drained within `grace`; whatever is
/// still queued at that point is lost.
pub async fn drain(worker: JoinHandle<WorkerReport>, grace: Duration) -> Option<WorkerReport> {
    match tokio::time::timeout(grace, worker).await {
        Ok(Ok(report)) => Some(report),
        Ok(Err(e)) => {
            tracing::error!("Notification worker failed: {}", e);
            None
        }
        Err(_) => {
            tracing::warn!(
                "Notification backlog not drained after {:?}, queued messages are lost",
                grace
            );
            None
        }
    }
}

/// Deliver one message, retrying per `policy`. Returns whether it was delivered.
pub async fn deliver_with_retry(
    sink: &dyn NotificationSink,
    message: &NotificationMessage,
    policy: RetryPolicy,
) -> bool {
    let max_attempts = policy.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match sink.deliver(message).await {
            Ok(()) => return true,
            Err(e) if attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    approval = %message.approval_id,
                    attempt,
                    "Notification delivery failed, retrying in {:?}: {}",
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                tracing::error!(
                    approval = %message.approval_id,
                    recipient = %message.recipient_id,
                    "Dropping notification after {} attempts: {}",
                    max_attempts,
                    e
                );
            }
        }
    }
    false
}
