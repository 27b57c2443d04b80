//! GRC CLI client - drive approval workflows from the terminal

mod client;
mod messages;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::client::GrcClient;
use crate::messages::{NextStep, ServerMessage};

#[derive(Parser)]
#[command(name = "grc")]
#[command(about = "CLI client for the GRC approval workflow service")]
#[command(version)]
struct Cli {
    /// Server URL
    #[arg(short, long, env = "GRC_SERVER", default_value = "http://localhost:3000")]
    server: String,

    /// Your user id
    #[arg(short, long, env = "GRC_USER")]
    user: Uuid,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an organization
    CreateOrg {
        name: String,
    },

    /// Allow a user to approve one kind of content
    AddApprover {
        #[arg(short, long)]
        org: Uuid,

        /// audit_issue, risk, contract, legal_case or document
        #[arg(short, long)]
        kind: String,

        #[arg(long)]
        approver: Uuid,

        /// Lower ranks are asked first
        #[arg(short, long, default_value_t = 0)]
        rank: i32,
    },

    /// Create a draft content item
    CreateItem {
        #[arg(short, long)]
        org: Uuid,

        #[arg(short, long)]
        kind: String,

        #[arg(short, long)]
        title: String,
    },

    /// Submit a draft item for approval
    Submit {
        #[arg(short, long)]
        org: Uuid,

        #[arg(short, long)]
        item: Uuid,
    },

    /// Approve or reject an approval assigned to you
    Decide {
        #[arg(short, long)]
        org: Uuid,

        #[arg(short, long)]
        approval: Uuid,

        /// approve or reject
        #[arg(short, long)]
        decision: String,

        #[arg(short, long, default_value = "")]
        comments: String,
    },

    /// Return a rejected item to draft
    Reopen {
        #[arg(short, long)]
        org: Uuid,

        #[arg(short, long)]
        item: Uuid,
    },

    /// Show a content item
    Show {
        #[arg(short, long)]
        org: Uuid,

        #[arg(short, long)]
        item: Uuid,
    },

    /// List every approval recorded for an item
    History {
        #[arg(short, long)]
        org: Uuid,

        #[arg(short, long)]
        item: Uuid,
    },

    /// List approvals waiting on you, and your notifications
    Inbox {
        #[arg(short, long)]
        org: Uuid,
    },

    /// Print workflow events as they happen
    Watch {
        #[arg(short, long)]
        org: Uuid,

        /// Exit after the first decision
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "grc_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let client = GrcClient::new(&cli.server, cli.user)?;

    match cli.command {
        Commands::CreateOrg { name } => {
            let org = client.create_organization(&name).await?;
            println!("Created organization {} ({})", org.id, org.name);
        }
        Commands::AddApprover {
            org,
            kind,
            approver,
            rank,
        } => {
            let approver = client.add_approver(org, &kind, approver, rank).await?;
            println!(
                "{} approves {} at rank {}",
                approver.user_id, approver.kind, approver.rank
            );
        }
        Commands::CreateItem { org, kind, title } => {
            let item = client.create_item(org, &kind, &title).await?;
            println!("Created {} {} ({})", item.kind, item.id, item.state);
        }
        Commands::Submit { org, item } => {
            let approval = client.submit(org, item).await?;
            println!(
                "Approval {} opened, waiting on {}",
                approval.id, approval.approver_id
            );
        }
        Commands::Decide {
            org,
            approval,
            decision,
            comments,
        } => run_decide(&client, org, approval, &decision, &comments).await?,
        Commands::Reopen { org, item } => {
            let item = client.reopen(org, item).await?;
            println!("Item {} is {}", item.id, item.state);
        }
        Commands::Show { org, item } => {
            let item = client.item(org, item).await?;
            println!("{} [{}] {}", item.id, item.kind, item.title);
            println!("  state:   {}", item.state);
            if let Some(approval) = item.current_approval_id {
                println!("  pending: {}", approval);
            }
            println!("  updated: {}", item.updated_at.format("%Y-%m-%d %H:%M"));
        }
        Commands::History { org, item } => {
            let approvals = client.history(org, item).await?;
            if approvals.is_empty() {
                println!("No approvals recorded.");
            }
            for approval in approvals {
                println!(
                    "  step {} {} by {} ({}){}",
                    approval.step,
                    approval.status,
                    approval.approver_id,
                    approval.created_at.format("%Y-%m-%d %H:%M"),
                    if approval.comments.is_empty() {
                        String::new()
                    } else {
                        format!(": {}", approval.comments)
                    }
                );
            }
        }
        Commands::Inbox { org } => run_inbox(&client, org).await?,
        Commands::Watch { org, once } => run_watch(&client, org, once).await?,
    }

    Ok(())
}

async fn run_decide(
    client: &GrcClient,
    org: Uuid,
    approval: Uuid,
    decision: &str,
    comments: &str,
) -> Result<()> {
    let decision = match decision {
        "approve" | "approved" => "approved",
        "reject" | "rejected" => "rejected",
        other => anyhow::bail!("Unknown decision '{}', use approve or reject", other),
    };

    match client.decide(org, approval, decision, comments).await? {
        NextStep::Completed {
            content_item_id,
            state,
        } => println!("Item {} is now {}", content_item_id, state),
        NextStep::NextApprover { approval } => println!(
            "Step {} opened as {}, waiting on {}",
            approval.step, approval.id, approval.approver_id
        ),
    }
    Ok(())
}

async fn run_inbox(client: &GrcClient, org: Uuid) -> Result<()> {
    let pending = client.inbox(org).await?;
    if pending.is_empty() {
        println!("Nothing waiting on you.");
    } else {
        println!("Waiting on you:");
        println!("{:─<60}", "");
        for approval in pending {
            println!(
                "  {} - item {} (step {}, since {})",
                approval.id,
                approval.content_item_id,
                approval.step,
                approval.created_at.format("%Y-%m-%d %H:%M")
            );
        }
    }

    let notifications = client.notifications(org).await?;
    if !notifications.is_empty() {
        println!();
        println!("Notifications:");
        println!("{:─<60}", "");
        for notification in notifications {
            println!(
                "  [{}] {}",
                notification.created_at.format("%Y-%m-%d %H:%M"),
                notification.message
            );
        }
    }

    Ok(())
}

async fn run_watch(client: &GrcClient, org: Uuid, once: bool) -> Result<()> {
    client
        .watch(org, |event| {
            match event {
                ServerMessage::Subscribed { organization_id } => {
                    println!("Watching organization {}", organization_id);
                }
                ServerMessage::Lagged { skipped } => {
                    println!("(missed {} events)", skipped);
                }
                ServerMessage::ApprovalRequested {
                    approval_id,
                    content_item_id,
                    approver_id,
                    step,
                    ..
                } => {
                    println!(
                        "[requested] item {} step {} -> {} (approval {})",
                        content_item_id, step, approver_id, approval_id
                    );
                }
                ServerMessage::ApprovalDecided {
                    content_item_id,
                    approver_id,
                    status,
                    item_state,
                    ..
                } => {
                    println!(
                        "[decided] item {} {} by {}, item is {}",
                        content_item_id, status, approver_id, item_state
                    );
                    if once {
                        return false; // Stop listening
                    }
                }
                ServerMessage::ItemReopened {
                    content_item_id,
                    actor_id,
                    ..
                } => {
                    println!("[reopened] item {} by {}", content_item_id, actor_id);
                }
            }
            true // Continue listening
        })
        .await
}
