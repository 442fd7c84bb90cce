//! Repository layer for database operations
//!
//! The reminders table is the single source of truth for which reminders
//! still exist. Every write is a single statement, so SQLite serializes
//! an insert or delete racing another on the same row.

use super::models::*;
use crate::error::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

/// Repository for database operations
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Persist a new reminder and return it with its assigned id.
    ///
    /// The row is committed before this returns.
    pub async fn insert_reminder(&self, req: CreateReminderRequest) -> Result<Reminder> {
        let now = Utc::now();

        // RETURNING hands back the AUTOINCREMENT id without a second query
        let reminder = sqlx::query_as::<_, Reminder>(
            r#"
            INSERT INTO reminders (owner_id, fire_at, body, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING id, owner_id, fire_at, body, created_at
            "#,
        )
        .bind(req.owner_id)
        .bind(req.fire_at)
        .bind(&req.body)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(
            "Inserted reminder {} for owner {} due at {}",
            reminder.id,
            reminder.owner_id,
            reminder.fire_at
        );
        Ok(reminder)
    }

    /// Get a reminder by ID, if it still exists
    pub async fn get_reminder(&self, id: ReminderId) -> Result<Option<Reminder>> {
        let reminder = sqlx::query_as::<_, Reminder>(
            r#"
            SELECT id, owner_id, fire_at, body, created_at FROM reminders WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(reminder)
    }

    /// List an owner's reminders, soonest first
    pub async fn list_reminders_by_owner(&self, owner_id: OwnerId) -> Result<Vec<Reminder>> {
        // Same-instant reminders fall back to creation order
        let reminders = sqlx::query_as::<_, Reminder>(
            r#"
            SELECT id, owner_id, fire_at, body, created_at FROM reminders
            WHERE owner_id = ?
            ORDER BY fire_at ASC, id ASC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(reminders)
    }

    /// List every pending reminder, soonest first. Used for startup recovery.
    pub async fn list_all_pending(&self) -> Result<Vec<Reminder>> {
        let reminders = sqlx::query_as::<_, Reminder>(
            r#"
            SELECT id, owner_id, fire_at, body, created_at FROM reminders
            ORDER BY fire_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(reminders)
    }

    /// Delete a reminder owned by `owner_id`.
    ///
    /// Returns false both when the row is missing and when another owner
    /// holds it.
    pub async fn delete_reminder(&self, id: ReminderId, owner_id: OwnerId) -> Result<bool> {
        // Owner check lives in the WHERE clause so there is no read-then-delete window
        let rows = sqlx::query("DELETE FROM reminders WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows > 0 {
            tracing::debug!("Deleted reminder {} for owner {}", id, owner_id);
        }
        Ok(rows > 0)
    }

    /// Number of pending reminders due at or before `now`
    pub async fn count_due(&self, now: DateTime<Utc>) -> Result<i64> {
        // Both sides are sqlx's UTC RFC 3339 text, so string order is time order
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reminders WHERE fire_at <= ?")
            .bind(now)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
