//! Database models
//!
//! Rust structs representing persisted entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Store-assigned reminder identity; never reused
pub type ReminderId = i64;

/// Chat the reminder belongs to and is delivered to
pub type OwnerId = i64;

/// A pending reminder. Rows are only ever inserted and deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Reminder {
    pub id: ReminderId,
    pub owner_id: OwnerId,
    /// Absolute instant the reminder is due
    pub fire_at: DateTime<Utc>,
    /// Delivered verbatim, never empty
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Create reminder request
#[derive(Debug, Clone, Deserialize)]
pub struct CreateReminderRequest {
    pub owner_id: OwnerId,
    pub fire_at: DateTime<Utc>,
    pub body: String,
}
