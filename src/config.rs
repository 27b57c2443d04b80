//! Server configuration from command-line flags and environment

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::workflow::{ApprovalChain, RetryPolicy, SequentialChain, SingleStepChain};

/// Which approval chain the engine runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ChainKind {
    /// First approver decides alone
    Single,
    /// Every approver must approve in rank order
    Sequential,
}

impl ChainKind {
    pub fn build(self) -> Arc<dyn ApprovalChain> {
        match self {
            ChainKind::Single => Arc::new(SingleStepChain),
            ChainKind::Sequential => Arc::new(SequentialChain),
        }
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "grc-workflow")]
#[command(about = "Multi-tenant GRC approval workflow service")]
#[command(version)]
pub struct Config {
    /// SQLite database URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:grc.db")]
    pub database_url: String,

    /// Address to listen on
    #[arg(long, env = "GRC_BIND", default_value = "0.0.0.0:3000")]
    pub bind: SocketAddr,

    /// Maximum pooled database connections
    #[arg(long, env = "GRC_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,

    #[arg(long, env = "GRC_APPROVAL_CHAIN", value_enum, default_value_t = ChainKind::Single)]
    pub approval_chain: ChainKind,

    /// Notifications buffered before new ones are dropped
    #[arg(long, env = "GRC_NOTIFY_QUEUE", default_value_t = 256)]
    pub notify_queue: usize,

    /// Delivery attempts per notification
    #[arg(long, env = "GRC_NOTIFY_MAX_ATTEMPTS", default_value_t = 3)]
    pub notify_max_attempts: u32,

    /// Seconds to wait for queued notifications on shutdown
    #[arg(long, env = "GRC_SHUTDOWN_GRACE", default_value_t = 10)]
    pub shutdown_grace: u64,
}

impl Config {
    pub fn app_options(&self) -> AppOptions {
        AppOptions {
            chain: self.approval_chain,
            notify_queue: self.notify_queue,
            retry: RetryPolicy {
                max_attempts: self.notify_max_attempts,
                ..RetryPolicy::default()
            },
        }
    }
}

/// Runtime options for building the application state
#[derive(Debug, Clone, Copy)]
pub struct AppOptions {
    pub chain: ChainKind,
    pub notify_queue: usize,
    pub retry: RetryPolicy,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            chain: ChainKind::Single,
            notify_queue: 256,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(100),
            },
        }
    }
}
