//! SQLite store for organizations, content items, approvals and their trail

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::error::{AppError, Result, WorkflowError, WorkflowResult};
use crate::models::{Approver, AuditAction, AuditEntry, Notification, Organization};
use crate::workflow::{
    Approval, ApprovalRepository, ApproverDirectory, AuditLogger, ContentItem, ContentKind,
    ContentState, DecisionCommit, NotificationMessage, NotificationSink, NotifyError,
};

const ITEM_COLUMNS: &str = "id, organization_id, kind, title, state, current_approval_id, created_by, created_at, updated_at";
const APPROVAL_COLUMNS: &str = "id, organization_id, content_item_id, requester_id, approver_id, status, comments, step, created_at, updated_at, decided_at";

/// Database store
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("Migration failed: {}", e)))
    }

    // Organization operations

    pub async fn create_organization(&self, name: &str) -> Result<Organization> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO organizations (id, name, created_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(name)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Organization {
            id,
            name: name.to_string(),
            created_at: now,
        })
    }

    pub async fn get_organization(&self, id: Uuid) -> Result<Organization> {
        let row = sqlx::query_as::<_, OrganizationRow>(
            r#"
            SELECT id, name, created_at
            FROM organizations
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Organization {} not found", id)))?;

        row.try_into()
    }

    // Approver operations

    /// Assign an approver, updating the rank if the user is already assigned
    pub async fn add_approver(
        &self,
        organization_id: Uuid,
        kind: ContentKind,
        user_id: Uuid,
        rank: i32,
    ) -> Result<Approver> {
        self.get_organization(organization_id).await?;

        sqlx::query(
            r#"
            INSERT INTO approvers (organization_id, kind, user_id, rank)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (organization_id, kind, user_id) DO UPDATE SET rank = excluded.rank
            "#,
        )
        .bind(organization_id.to_string())
        .bind(kind.as_str())
        .bind(user_id.to_string())
        .bind(rank)
        .execute(&self.pool)
        .await?;

        Ok(Approver {
            organization_id,
            kind,
            user_id,
            rank,
        })
    }

    // Content item operations

    /// Create a draft content item
    pub async fn create_item(
        &self,
        organization_id: Uuid,
        kind: ContentKind,
        title: &str,
        created_by: Uuid,
    ) -> Result<ContentItem> {
        self.get_organization(organization_id).await?;
        let item = ContentItem::new(organization_id, kind, title, created_by);

        sqlx::query(
            r#"
            INSERT INTO content_items (id, organization_id, kind, title, state, current_approval_id, created_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, NULL, ?, ?, ?)
            "#,
        )
        .bind(item.id.to_string())
        .bind(organization_id.to_string())
        .bind(kind.as_str())
        .bind(&item.title)
        .bind(item.state.as_str())
        .bind(created_by.to_string())
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(item)
    }

    // Trail operations

    pub async fn list_notifications(
        &self,
        organization_id: Uuid,
        recipient_id: Uuid,
    ) -> Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, organization_id, recipient_id, approval_id, kind, message, created_at
            FROM notifications
            WHERE organization_id = ? AND recipient_id = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(organization_id.to_string())
        .bind(recipient_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    pub async fn list_audit(&self, organization_id: Uuid) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT id, organization_id, approval_id, content_item_id, actor_id, action, detail, created_at
            FROM audit_log
            WHERE organization_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(organization_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Error for a guarded item update that matched no row
    async fn stale_item(&self, item: &ContentItem) -> WorkflowError {
        match ApprovalRepository::content_item(self, item.organization_id, item.id).await {
            Ok(current) => WorkflowError::InvalidState {
                item_id: item.id,
                state: current.state,
            },
            Err(e) => e,
        }
    }

    /// Error for a guarded approval update that matched no row
    async fn stale_approval(&self, approval: &Approval) -> WorkflowError {
        match ApprovalRepository::approval(self, approval.organization_id, approval.id).await {
            Ok(current) => WorkflowError::InvalidApprovalState {
                approval_id: approval.id,
                status: current.status,
            },
            Err(e) => e,
        }
    }
}

/// Move an item out of `from`. Returns false if the stored item is elsewhere.
async fn update_item_guarded(
    conn: &mut SqliteConnection,
    item: &ContentItem,
    from: ContentState,
) -> WorkflowResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE content_items
        SET state = ?, current_approval_id = ?, updated_at = ?
        WHERE id = ? AND organization_id = ? AND state = ?
        "#,
    )
    .bind(item.state.as_str())
    .bind(item.current_approval_id.map(|u| u.to_string()))
    .bind(item.updated_at)
    .bind(item.id.to_string())
    .bind(item.organization_id.to_string())
    .bind(from.as_str())
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Append an audit entry unless one already exists for this approval and action.
async fn insert_audit(
    conn: &mut SqliteConnection,
    approval: &Approval,
    action: AuditAction,
) -> WorkflowResult<()> {
    let entry = AuditEntry::for_approval(approval, action);

    sqlx::query(
        r#"
        INSERT INTO audit_log (id, organization_id, approval_id, content_item_id, actor_id, action, detail, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (approval_id, action) DO NOTHING
        "#,
    )
    .bind(entry.id.to_string())
    .bind(entry.organization_id.to_string())
    .bind(entry.approval_id.to_string())
    .bind(entry.content_item_id.to_string())
    .bind(entry.actor_id.to_string())
    .bind(entry.action.as_str())
    .bind(entry.detail.to_string())
    .bind(entry.created_at)
    .execute(conn)
    .await?;

    Ok(())
}

async fn insert_approval(conn: &mut SqliteConnection, approval: &Approval) -> WorkflowResult<()> {
    sqlx::query(
        r#"
        INSERT INTO approvals (id, organization_id, content_item_id, requester_id, approver_id, status, comments, step, created_at, updated_at, decided_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(approval.id.to_string())
    .bind(approval.organization_id.to_string())
    .bind(approval.content_item_id.to_string())
    .bind(approval.requester_id.to_string())
    .bind(approval.approver_id.to_string())
    .bind(approval.status.as_str())
    .bind(&approval.comments)
    .bind(i64::from(approval.step))
    .bind(approval.created_at)
    .bind(approval.updated_at)
    .bind(approval.decided_at)
    .execute(conn)
    .await?;

    Ok(())
}

#[async_trait]
impl ApprovalRepository for Store {
    async fn content_item(
        &self,
        organization_id: Uuid,
        item_id: Uuid,
    ) -> WorkflowResult<ContentItem> {
        let row = sqlx::query_as::<_, ContentItemRow>(&format!(
            "SELECT {} FROM content_items WHERE id = ? AND organization_id = ?",
            ITEM_COLUMNS
        ))
        .bind(item_id.to_string())
        .bind(organization_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| WorkflowError::NotFound(format!("Content item {}", item_id)))?;

        row.try_into()
    }

    async fn approval(&self, organization_id: Uuid, approval_id: Uuid) -> WorkflowResult<Approval> {
        let row = sqlx::query_as::<_, ApprovalRow>(&format!(
            "SELECT {} FROM approvals WHERE id = ? AND organization_id = ?",
            APPROVAL_COLUMNS
        ))
        .bind(approval_id.to_string())
        .bind(organization_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| WorkflowError::NotFound(format!("Approval {}", approval_id)))?;

        row.try_into()
    }

    async fn approvals_for_item(
        &self,
        organization_id: Uuid,
        item_id: Uuid,
    ) -> WorkflowResult<Vec<Approval>> {
        ApprovalRepository::content_item(self, organization_id, item_id).await?;

        let rows = sqlx::query_as::<_, ApprovalRow>(&format!(
            "SELECT {} FROM approvals WHERE content_item_id = ? AND organization_id = ? ORDER BY created_at ASC, step ASC",
            APPROVAL_COLUMNS
        ))
        .bind(item_id.to_string())
        .bind(organization_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    async fn pending_for_approver(
        &self,
        organization_id: Uuid,
        approver_id: Uuid,
    ) -> WorkflowResult<Vec<Approval>> {
        let rows = sqlx::query_as::<_, ApprovalRow>(&format!(
            "SELECT {} FROM approvals WHERE organization_id = ? AND approver_id = ? AND status = 'pending' ORDER BY created_at ASC",
            APPROVAL_COLUMNS
        ))
        .bind(organization_id.to_string())
        .bind(approver_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    async fn open_approval(
        &self,
        item: &ContentItem,
        from: ContentState,
        approval: &Approval,
    ) -> WorkflowResult<()> {
        let mut tx = self.pool.begin().await?;

        if !update_item_guarded(&mut *tx, item, from).await? {
            tx.rollback().await?;
            return Err(self.stale_item(item).await);
        }
        insert_approval(&mut *tx, approval).await?;
        insert_audit(&mut *tx, approval, AuditAction::ApprovalInitiated).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn record_decision(&self, commit: &DecisionCommit) -> WorkflowResult<()> {
        let approval = &commit.approval;
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE approvals
            SET status = ?, comments = ?, updated_at = ?, decided_at = ?
            WHERE id = ? AND organization_id = ? AND status = 'pending'
            "#,
        )
        .bind(approval.status.as_str())
        .bind(&approval.comments)
        .bind(approval.updated_at)
        .bind(approval.decided_at)
        .bind(approval.id.to_string())
        .bind(approval.organization_id.to_string())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(self.stale_approval(approval).await);
        }

        if !update_item_guarded(&mut *tx, &commit.item, commit.item_from).await? {
            tx.rollback().await?;
            return Err(self.stale_item(&commit.item).await);
        }

        insert_audit(&mut *tx, approval, AuditAction::ApprovalDecided).await?;

        if let Some(next) = &commit.follow_on {
            insert_approval(&mut *tx, next).await?;
            insert_audit(&mut *tx, next, AuditAction::ApprovalInitiated).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_item_state(
        &self,
        item: &ContentItem,
        from: ContentState,
    ) -> WorkflowResult<()> {
        let mut conn = self.pool.acquire().await?;
        if !update_item_guarded(&mut *conn, item, from).await? {
            drop(conn);
            return Err(self.stale_item(item).await);
        }
        Ok(())
    }
}

#[async_trait]
impl ApproverDirectory for Store {
    async fn approvers_for(
        &self,
        organization_id: Uuid,
        item: &ContentItem,
    ) -> WorkflowResult<Vec<Approver>> {
        let rows = sqlx::query_as::<_, ApproverRow>(
            r#"
            SELECT organization_id, kind, user_id, rank
            FROM approvers
            WHERE organization_id = ? AND kind = ?
            ORDER BY rank ASC, user_id ASC
            "#,
        )
        .bind(organization_id.to_string())
        .bind(item.kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }
}

#[async_trait]
impl AuditLogger for Store {
    // Entries are normally written with the transition itself; these calls
    // only fill in what is missing.
    async fn log_approval_initiation(&self, approval: &Approval) -> WorkflowResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_audit(&mut *conn, approval, AuditAction::ApprovalInitiated).await
    }

    async fn log_approval_decision(&self, approval: &Approval) -> WorkflowResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_audit(&mut *conn, approval, AuditAction::ApprovalDecided).await
    }
}

/// Persists notifications so recipients can read them back
#[async_trait]
impl NotificationSink for Store {
    async fn deliver(&self, message: &NotificationMessage) -> std::result::Result<(), NotifyError> {
        let notification = Notification::delivered(message);

        sqlx::query(
            r#"
            INSERT INTO notifications (id, organization_id, recipient_id, approval_id, kind, message, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(notification.id.to_string())
        .bind(notification.organization_id.to_string())
        .bind(notification.recipient_id.to_string())
        .bind(notification.approval_id.to_string())
        .bind(notification.kind.as_str())
        .bind(&notification.message)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        Ok(())
    }
}

// Internal row types for sqlx

fn parse_uuid(value: &str) -> WorkflowResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| WorkflowError::Storage(format!("Invalid UUID: {}", e)))
}

#[derive(sqlx::FromRow)]
struct OrganizationRow {
    id: String,
    name: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<OrganizationRow> for Organization {
    type Error = AppError;

    fn try_from(row: OrganizationRow) -> Result<Self> {
        Ok(Organization {
            id: parse_uuid(&row.id)?,
            name: row.name,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ContentItemRow {
    id: String,
    organization_id: String,
    kind: String,
    title: String,
    state: String,
    current_approval_id: Option<String>,
    created_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ContentItemRow> for ContentItem {
    type Error = WorkflowError;

    fn try_from(row: ContentItemRow) -> WorkflowResult<Self> {
        let current_approval_id = row
            .current_approval_id
            .as_deref()
            .map(parse_uuid)
            .transpose()?;

        Ok(ContentItem {
            id: parse_uuid(&row.id)?,
            organization_id: parse_uuid(&row.organization_id)?,
            kind: row
                .kind
                .parse()
                .map_err(|e| WorkflowError::Storage(format!("Invalid kind: {}", e)))?,
            title: row.title,
            state: row
                .state
                .parse()
                .map_err(|e| WorkflowError::Storage(format!("Invalid state: {}", e)))?,
            current_approval_id,
            created_by: parse_uuid(&row.created_by)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ApprovalRow {
    id: String,
    organization_id: String,
    content_item_id: String,
    requester_id: String,
    approver_id: String,
    status: String,
    comments: String,
    step: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    decided_at: Option<DateTime<Utc>>,
}

impl TryFrom<ApprovalRow> for Approval {
    type Error = WorkflowError;

    fn try_from(row: ApprovalRow) -> WorkflowResult<Self> {
        Ok(Approval {
            id: parse_uuid(&row.id)?,
            content_item_id: parse_uuid(&row.content_item_id)?,
            organization_id: parse_uuid(&row.organization_id)?,
            requester_id: parse_uuid(&row.requester_id)?,
            approver_id: parse_uuid(&row.approver_id)?,
            status: row
                .status
                .parse()
                .map_err(|e| WorkflowError::Storage(format!("Invalid status: {}", e)))?,
            comments: row.comments,
            step: u32::try_from(row.step)
                .map_err(|e| WorkflowError::Storage(format!("Invalid step: {}", e)))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            decided_at: row.decided_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ApproverRow {
    organization_id: String,
    kind: String,
    user_id: String,
    rank: i32,
}

impl TryFrom<ApproverRow> for Approver {
    type Error = WorkflowError;

    fn try_from(row: ApproverRow) -> WorkflowResult<Self> {
        Ok(Approver {
            organization_id: parse_uuid(&row.organization_id)?,
            kind: row
                .kind
                .parse()
                .map_err(|e| WorkflowError::Storage(format!("Invalid kind: {}", e)))?,
            user_id: parse_uuid(&row.user_id)?,
            rank: row.rank,
        })
    }
}

#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: String,
    organization_id: String,
    recipient_id: String,
    approval_id: String,
    kind: String,
    message: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = AppError;

    fn try_from(row: NotificationRow) -> Result<Self> {
        Ok(Notification {
            id: parse_uuid(&row.id)?,
            organization_id: parse_uuid(&row.organization_id)?,
            recipient_id: parse_uuid(&row.recipient_id)?,
            approval_id: parse_uuid(&row.approval_id)?,
            kind: row
                .kind
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid notification kind: {}", e)))?,
            message: row.message,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: String,
    organization_id: String,
    approval_id: String,
    content_item_id: String,
    actor_id: String,
    action: String,
    detail: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = AppError;

    fn try_from(row: AuditRow) -> Result<Self> {
        Ok(AuditEntry {
            id: parse_uuid(&row.id)?,
            organization_id: parse_uuid(&row.organization_id)?,
            approval_id: parse_uuid(&row.approval_id)?,
            content_item_id: parse_uuid(&row.content_item_id)?,
            actor_id: parse_uuid(&row.actor_id)?,
            action: row
                .action
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid audit action: {}", e)))?,
            detail: serde_json::from_str(&row.detail)
                .map_err(|e| AppError::Internal(format!("Invalid audit detail: {}", e)))?,
            created_at: row.created_at,
        })
    }
}
