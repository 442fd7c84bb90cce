//! Scheduler Service
//!
//! Keeps one armed one-shot timer per pending reminder. A timer either
//! fires or is canceled, never both: the fire path and `cancel` race to
//! remove the reminder's entry from the live set under one lock, and only
//! the winner acts. Fired reminders are posted to the delivery dispatcher
//! over a channel instead of being delivered from the timer task.

use crate::database::{Reminder, ReminderId, Repository};
use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::AbortHandle;

/// Receiving end handed to the delivery dispatcher
pub type FiredReceiver = mpsc::UnboundedReceiver<Reminder>;

struct ArmedTimer {
    fire_at: DateTime<Utc>,
    handle: AbortHandle,
}

/// Process-local set of armed reminder timers
#[derive(Clone)]
pub struct SchedulerService {
    timers: Arc<Mutex<HashMap<ReminderId, ArmedTimer>>>,
    fired_tx: mpsc::UnboundedSender<Reminder>,
}

impl SchedulerService {
    /// Create the scheduler and the channel its timers fire into
    pub fn new() -> (Self, FiredReceiver) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();

        let scheduler = Self {
            timers: Arc::new(Mutex::new(HashMap::new())),
            fired_tx,
        };

        (scheduler, fired_rx)
    }

    /// Arm a one-shot timer for `reminder.fire_at`.
    ///
    /// A reminder that is already due fires immediately.
    pub async fn arm(&self, reminder: Reminder) -> Result<()> {
        let mut timers = self.timers.lock().await;

        if timers.contains_key(&reminder.id) {
            tracing::error!("Refusing to arm reminder {}: already armed", reminder.id);
            return Err(AppError::AlreadyArmed(reminder.id));
        }

        let id = reminder.id;
        let fire_at = reminder.fire_at;
        let delay = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        let live = Arc::clone(&self.timers);
        let fired_tx = self.fired_tx.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            if live.lock().await.remove(&id).is_none() {
                return;
            }

            tracing::info!("Reminder {} fired (due {})", id, fire_at);

            if fired_tx.send(reminder).is_err() {
                tracing::warn!(
                    "Dispatcher stopped; reminder {} stays pending until next recovery",
                    id
                );
            }
        });

        timers.insert(
            id,
            ArmedTimer {
                fire_at,
                handle: task.abort_handle(),
            },
        );

        tracing::debug!("Armed reminder {} for {} (in {:?})", id, fire_at, delay);
        Ok(())
    }

    /// Disarm the timer for `id`. Returns whether a live timer was found.
    ///
    /// A timer that has already begun firing is no longer live, so its
    /// delivery is not suppressed here.
    pub async fn cancel(&self, id: ReminderId) -> bool {
        let removed = self.timers.lock().await.remove(&id);

        match removed {
            Some(timer) => {
                timer.handle.abort();
                tracing::info!("Canceled reminder {} (was due {})", id, timer.fire_at);
                true
            }
            None => {
                tracing::debug!("No live timer for reminder {}", id);
                false
            }
        }
    }

    /// Rebuild the live timer set from the store.
    ///
    /// Must complete before new reminders are accepted. Returns the number
    /// of reminders armed.
    pub async fn recover(&self, repo: &Repository) -> Result<usize> {
        let overdue = repo.count_due(Utc::now()).await?;
        let pending = repo.list_all_pending().await?;

        let mut armed = 0;
        for reminder in pending {
            let id = reminder.id;
            match self.arm(reminder).await {
                Ok(()) => armed += 1,
                Err(AppError::AlreadyArmed(_)) => {
                    tracing::warn!("Reminder {} was already armed before recovery", id);
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            "Recovered {} pending reminders ({} overdue, firing now)",
            armed,
            overdue
        );
        Ok(armed)
    }

    pub async fn is_armed(&self, id: ReminderId) -> bool {
        self.timers.lock().await.contains_key(&id)
    }

    pub async fn armed_count(&self) -> usize {
        self.timers.lock().await.len()
    }

    /// Abort every live timer. Reminders stay in the store and are
    /// re-armed by the next `recover`.
    pub async fn shutdown(&self) {
        let mut timers = self.timers.lock().await;
        let count = timers.len();

        for (_, timer) in timers.drain() {
            timer.handle.abort();
        }

        tracing::info!("Reminder scheduler shutdown ({} timers disarmed)", count);
    }
}
