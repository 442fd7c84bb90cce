//! Error types for TimeGenie
//!
//! All errors use thiserror for structured error handling.
//! Intake validation problems are not errors at this level: they are
//! typed rejections recovered by the intake state machine.

use crate::database::ReminderId;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Reminder {0} is already armed")]
    AlreadyArmed(ReminderId),

    #[error("Reminder time {0} is not in the future")]
    PastInstant(DateTime<Utc>),

    #[error("Reminder not found")]
    NotFoundOrNotOwned,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Generic(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
