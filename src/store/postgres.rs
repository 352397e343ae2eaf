// =============================================================================
// store/postgres.rs — THE REAL FILING CABINET
// =============================================================================
//
// Runtime-checked sqlx queries against the schema in `migrations/`. Rows come
// back as flat `*Row` structs and are converted into domain types at the
// edge; a row that violates a domain bound (an unknown category, a status of
// 7) is reported as `StoreError::Corrupt` instead of being papered over.
//
// Lock tokens are transaction-scoped advisory locks keyed by
// `hashtext(key)`. Postgres releases them on commit or rollback, so there is
// nothing to clean up and nothing to leak.
// =============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{normalize_district, AuthorityLookup, NotificationPage, NotificationQuery, Store, StoreTx};
use crate::error::StoreError;
use crate::models::{Audience, Authority, Category, Issue, IssueStatus, Notification, Priority, Radius, Vote};

const ISSUE_COLUMNS: &str = "i.id, i.user_id, i.authority_id, i.title, i.description, i.category, \
     i.priority, i.status, i.location, i.radius, i.created_at, i.updated_at";

#[derive(Debug, FromRow)]
struct IssueRow {
    id: Uuid,
    user_id: Uuid,
    authority_id: Uuid,
    title: String,
    description: String,
    category: String,
    priority: i32,
    status: i16,
    location: String,
    radius: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<IssueRow> for Issue {
    type Error = StoreError;

    fn try_from(row: IssueRow) -> Result<Self, Self::Error> {
        let corrupt = |detail: String| StoreError::Corrupt { table: "issues", detail };
        Ok(Issue {
            category: row
                .category
                .parse()
                .map_err(|e: crate::models::UnknownCategory| corrupt(e.to_string()))?,
            priority: Priority::new(row.priority).ok_or_else(|| corrupt(format!("priority {}", row.priority)))?,
            status: IssueStatus::from_code(row.status).ok_or_else(|| corrupt(format!("status {}", row.status)))?,
            radius: Radius::checked(row.radius).ok_or_else(|| corrupt(format!("radius {}", row.radius)))?,
            id: row.id,
            user_id: row.user_id,
            authority_id: row.authority_id,
            title: row.title,
            description: row.description,
            location: row.location,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AuthorityRow {
    id: Uuid,
    name: String,
    district: String,
    contact_email: String,
    contact_phone: Option<String>,
    category: String,
    user_id: Uuid,
}

impl TryFrom<AuthorityRow> for Authority {
    type Error = StoreError;

    fn try_from(row: AuthorityRow) -> Result<Self, Self::Error> {
        let category: Category = row.category.parse().map_err(|e: crate::models::UnknownCategory| {
            StoreError::Corrupt {
                table: "authorities",
                detail: e.to_string(),
            }
        })?;
        Ok(Authority {
            id: row.id,
            name: row.name,
            district: row.district,
            contact_email: row.contact_email,
            contact_phone: row.contact_phone,
            category,
            user_id: row.user_id,
        })
    }
}

#[derive(Debug, FromRow)]
struct VoteRow {
    id: Uuid,
    user_id: Uuid,
    issue_id: Uuid,
    created_at: DateTime<Utc>,
}

impl From<VoteRow> for Vote {
    fn from(row: VoteRow) -> Self {
        Vote {
            id: row.id,
            user_id: row.user_id,
            issue_id: row.issue_id,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct NotificationRow {
    id: Uuid,
    issue_id: Uuid,
    user_id: Uuid,
    message: String,
    is_read: bool,
    is_citizen: bool,
    created_at: DateTime<Utc>,
}

impl From<NotificationRow> for Notification {
    fn from(row: NotificationRow) -> Self {
        Notification {
            id: row.id,
            issue_id: row.issue_id,
            user_id: row.user_id,
            message: row.message,
            is_read: row.is_read,
            audience: Audience::from_is_citizen(row.is_citizen),
            created_at: row.created_at,
        }
    }
}

fn issues_from_rows(rows: Vec<IssueRow>) -> Result<Vec<Issue>, StoreError> {
    rows.into_iter().map(Issue::try_from).collect()
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and bring the schema up to date.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(max_connections, "Postgres pool ready, migrations applied");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn find_authority(&self, category: Category, district: &str) -> AuthorityLookup {
        let rows = sqlx::query_as::<_, AuthorityRow>(
            r#"
            SELECT id, name, district, contact_email, contact_phone, category, user_id
            FROM authorities
            WHERE category = $1 AND lower(btrim(district)) = $2
            ORDER BY name, id
            "#,
        )
        .bind(category.label())
        .bind(normalize_district(district))
        .fetch_all(&self.pool)
        .await;

        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => return AuthorityLookup::BackendError(e.into()),
        };

        if rows.len() > 1 {
            warn!(
                category = %category,
                district = %district,
                count = rows.len(),
                "Several authorities registered for one (category, district), choosing by name"
            );
        }

        match rows.into_iter().next() {
            Some(row) => match Authority::try_from(row) {
                Ok(authority) => AuthorityLookup::Found(authority),
                Err(e) => AuthorityLookup::BackendError(e),
            },
            None => AuthorityLookup::NotFound,
        }
    }

    async fn insert_authority(&self, authority: &Authority) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO authorities (id, name, district, contact_email, contact_phone, category, user_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(authority.id)
        .bind(&authority.name)
        .bind(&authority.district)
        .bind(&authority.contact_email)
        .bind(&authority.contact_phone)
        .bind(authority.category.label())
        .bind(authority.user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_authority(&self, id: Uuid) -> Result<Option<Authority>, StoreError> {
        sqlx::query_as::<_, AuthorityRow>(
            "SELECT id, name, district, contact_email, contact_phone, category, user_id FROM authorities WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Authority::try_from)
        .transpose()
    }

    async fn get_issue(&self, id: Uuid) -> Result<Option<Issue>, StoreError> {
        sqlx::query_as::<_, IssueRow>(&format!("SELECT {ISSUE_COLUMNS} FROM issues i WHERE i.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Issue::try_from)
            .transpose()
    }

    async fn list_issues(&self) -> Result<Vec<Issue>, StoreError> {
        let rows = sqlx::query_as::<_, IssueRow>(&format!(
            "SELECT {ISSUE_COLUMNS} FROM issues i ORDER BY i.created_at, i.id"
        ))
        .fetch_all(&self.pool)
        .await?;
        issues_from_rows(rows)
    }

    async fn vote_count(&self, issue_id: Uuid) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM votes WHERE issue_id = $1")
            .bind(issue_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn user_vote(&self, issue_id: Uuid, user_id: Uuid) -> Result<Option<Vote>, StoreError> {
        let row = sqlx::query_as::<_, VoteRow>(
            "SELECT id, user_id, issue_id, created_at FROM votes WHERE issue_id = $1 AND user_id = $2",
        )
        .bind(issue_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Vote::from))
    }

    async fn list_notifications(
        &self,
        user_id: Uuid,
        query: NotificationQuery,
    ) -> Result<NotificationPage, StoreError> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, issue_id, user_id, message, is_read, is_citizen, created_at
            FROM notifications
            WHERE user_id = $1 AND (NOT $2 OR NOT is_read)
            ORDER BY created_at DESC, id
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(user_id)
        .bind(query.unread_only)
        .bind(query.limit)
        .bind(query.skip)
        .fetch_all(&self.pool)
        .await?;

        let (total_count, unread_count): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                count(*) FILTER (WHERE NOT $2 OR NOT is_read),
                count(*) FILTER (WHERE NOT is_read)
            FROM notifications
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(query.unread_only)
        .fetch_one(&self.pool)
        .await?;

        Ok(NotificationPage {
            notifications: rows.into_iter().map(Notification::from).collect(),
            total_count,
            unread_count,
        })
    }

    async fn mark_read(&self, user_id: Uuid, ids: &[Uuid]) -> Result<Option<u64>, StoreError> {
        let mut wanted = ids.to_vec();
        wanted.sort();
        wanted.dedup();

        let mut tx = self.pool.begin().await?;
        let owned: i64 = sqlx::query_scalar("SELECT count(*) FROM notifications WHERE user_id = $1 AND id = ANY($2)")
            .bind(user_id)
            .bind(&wanted)
            .fetch_one(&mut *tx)
            .await?;

        if owned as usize != wanted.len() {
            return Ok(None);
        }

        let updated = sqlx::query("UPDATE notifications SET is_read = TRUE WHERE user_id = $1 AND id = ANY($2)")
            .bind(user_id)
            .bind(&wanted)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        Ok(Some(updated))
    }

    async fn mark_all_read(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE notifications SET is_read = TRUE WHERE user_id = $1 AND NOT is_read")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_notification(&self, user_id: Uuid, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn lock_keys(&mut self, keys: &[String]) -> Result<(), StoreError> {
        for key in keys {
            sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
                .bind(key)
                .execute(&mut *self.tx)
                .await?;
            debug!(key = %key, "Advisory lock acquired");
        }
        Ok(())
    }

    async fn active_issues(&mut self, category: Category, district: &str) -> Result<Vec<Issue>, StoreError> {
        let rows = sqlx::query_as::<_, IssueRow>(&format!(
            r#"
            SELECT {ISSUE_COLUMNS}
            FROM issues i
            JOIN authorities a ON a.id = i.authority_id
            WHERE i.category = $1
              AND lower(btrim(a.district)) = $2
              AND i.status IN (0, 1)
            "#
        ))
        .bind(category.label())
        .bind(normalize_district(district))
        .fetch_all(&mut *self.tx)
        .await?;
        issues_from_rows(rows)
    }

    async fn issue_by_id(&mut self, id: Uuid) -> Result<Option<Issue>, StoreError> {
        sqlx::query_as::<_, IssueRow>(&format!("SELECT {ISSUE_COLUMNS} FROM issues i WHERE i.id = $1 FOR UPDATE"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(Issue::try_from)
            .transpose()
    }

    async fn authority_by_id(&mut self, id: Uuid) -> Result<Option<Authority>, StoreError> {
        sqlx::query_as::<_, AuthorityRow>(
            "SELECT id, name, district, contact_email, contact_phone, category, user_id FROM authorities WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .map(Authority::try_from)
        .transpose()
    }

    async fn find_vote(&mut self, issue_id: Uuid, user_id: Uuid) -> Result<Option<Vote>, StoreError> {
        let row = sqlx::query_as::<_, VoteRow>(
            "SELECT id, user_id, issue_id, created_at FROM votes WHERE issue_id = $1 AND user_id = $2",
        )
        .bind(issue_id)
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(Vote::from))
    }

    async fn insert_vote(&mut self, vote: &Vote) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO votes (id, user_id, issue_id, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, issue_id) DO NOTHING
            "#,
        )
        .bind(vote.id)
        .bind(vote.user_id)
        .bind(vote.issue_id)
        .bind(vote.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_vote(&mut self, issue_id: Uuid, user_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM votes WHERE issue_id = $1 AND user_id = $2")
            .bind(issue_id)
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn count_votes(&mut self, issue_id: Uuid) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM votes WHERE issue_id = $1")
            .bind(issue_id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count)
    }

    async fn insert_issue(&mut self, issue: &Issue) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO issues
                (id, user_id, authority_id, title, description, category,
                 priority, status, location, radius, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(issue.id)
        .bind(issue.user_id)
        .bind(issue.authority_id)
        .bind(&issue.title)
        .bind(&issue.description)
        .bind(issue.category.label())
        .bind(issue.priority.level())
        .bind(issue.status.code())
        .bind(&issue.location)
        .bind(i64::from(issue.radius))
        .bind(issue.created_at)
        .bind(issue.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn set_status(&mut self, id: Uuid, status: IssueStatus, updated_at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE issues SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(status.code())
            .bind(updated_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_notification(&mut self, notification: &Notification) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, issue_id, user_id, message, is_read, is_citizen, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(notification.id)
        .bind(notification.issue_id)
        .bind(notification.user_id)
        .bind(&notification.message)
        .bind(notification.is_read)
        .bind(notification.audience.is_citizen())
        .bind(notification.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
