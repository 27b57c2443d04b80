//! GRC approval workflow service
//!
//! Organizations submit content items (audit issues, risks, contracts, legal
//! cases, documents) for sign-off; the [`workflow::ApprovalWorkflow`] engine
//! tracks each approval cycle.

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod store;
pub mod websocket;
pub mod workflow;

use sqlx::SqlitePool;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use crate::config::AppOptions;
use crate::store::Store;
use crate::workflow::{ApprovalWorkflow, NotificationQueue, WorkerReport};

/// Application state shared across handlers
pub struct AppState {
    pub store: Store,
    pub workflow: ApprovalWorkflow,
    notification_worker: Mutex<Option<JoinHandle<WorkerReport>>>,
}

impl AppState {
    pub fn new(pool: SqlitePool) -> Arc<Self> {
        Self::with_options(pool, AppOptions::default())
    }

    /// Build the state and start the notification worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_options(pool: SqlitePool, options: AppOptions) -> Arc<Self> {
        let store = Arc::new(Store::new(pool));
        let (notifier, worker) =
            NotificationQueue::spawn(store.clone(), options.retry, options.notify_queue);

        let workflow = ApprovalWorkflow::new(
            store.clone(),
            store.clone(),
            Arc::new(notifier),
            store.clone(),
        )
        .with_chain(options.chain.build());

        Arc::new(Self {
            store: store.as_ref().clone(),
            workflow,
            notification_worker: Mutex::new(Some(worker)),
        })
    }

    /// Hand over the notification worker so the caller can wait for it to
    /// drain once the server stops. Returns `None` after the first call.
    pub fn take_notification_worker(&self) -> Option<JoinHandle<WorkerReport>> {
        self.notification_worker
            .lock()
            .ok()
            .and_then(|mut worker| worker.take())
    }
}
