//! Reminders service
//!
//! Coordinates the store and the scheduler so the live timer set always
//! mirrors the pending rows: a reminder is created by inserting then
//! arming, and deleted by removing the row then disarming.

use crate::database::{CreateReminderRequest, OwnerId, Reminder, ReminderId, Repository};
use crate::error::{AppError, Result};
use crate::services::SchedulerService;
use chrono::{DateTime, Utc};

#[derive(Clone)]
pub struct ReminderService {
    repo: Repository,
    scheduler: SchedulerService,
}

impl ReminderService {
    pub fn new(repo: Repository, scheduler: SchedulerService) -> Self {
        Self { repo, scheduler }
    }

    /// Persist and arm a new reminder.
    ///
    /// A `fire_at` that is no longer in the future is refused with
    /// `PastInstant`. If arming fails the row is deleted again, so no
    /// pending row is ever left without a timer.
    pub async fn create_reminder(
        &self,
        owner_id: OwnerId,
        fire_at: DateTime<Utc>,
        body: String,
    ) -> Result<Reminder> {
        // The time may have been chosen a while ago, e.g. at an earlier intake turn
        if fire_at <= Utc::now() {
            tracing::debug!("Refusing reminder for owner {}: {} has passed", owner_id, fire_at);
            return Err(AppError::PastInstant(fire_at));
        }

        tracing::info!("Creating reminder for owner {} at {}", owner_id, fire_at);

        let reminder = self
            .repo
            .insert_reminder(CreateReminderRequest {
                owner_id,
                fire_at,
                body,
            })
            .await?;

        if let Err(e) = self.scheduler.arm(reminder.clone()).await {
            tracing::error!(
                "Failed to arm reminder {}, rolling back insert: {}",
                reminder.id,
                e
            );
            self.repo.delete_reminder(reminder.id, owner_id).await?;
            return Err(e);
        }

        tracing::info!("Reminder {} created successfully", reminder.id);
        Ok(reminder)
    }

    /// List an owner's pending reminders, soonest first
    pub async fn list_reminders(&self, owner_id: OwnerId) -> Result<Vec<Reminder>> {
        self.repo.list_reminders_by_owner(owner_id).await
    }

    /// Delete an owner's reminder and disarm its timer.
    ///
    /// Missing and foreign reminders both yield `NotFoundOrNotOwned`.
    pub async fn delete_reminder(&self, id: ReminderId, owner_id: OwnerId) -> Result<()> {
        if !self.repo.delete_reminder(id, owner_id).await? {
            tracing::debug!("Delete of reminder {} by owner {} matched nothing", id, owner_id);
            return Err(AppError::NotFoundOrNotOwned);
        }

        // A timer that already fired finds the row gone at delivery time
        let disarmed = self.scheduler.cancel(id).await;
        tracing::info!(
            "Deleted reminder {} for owner {} (timer disarmed: {})",
            id,
            owner_id,
            disarmed
        );
        Ok(())
    }

    pub fn scheduler(&self) -> &SchedulerService {
        &self.scheduler
    }
}
