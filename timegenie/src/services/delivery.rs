//! Delivery dispatcher
//!
//! Consumes reminders fired by the scheduler, sends them through the
//! `Messenger`, and retires them from the store. Once an attempt has been
//! made and is not worth retrying, the row is deleted whatever the outcome,
//! so the store only ever holds pending reminders.

use crate::config::RetryPolicy;
use crate::database::{Reminder, Repository};
use crate::error::Result;
use crate::messenger::{Messenger, SendError};
use crate::services::scheduler::FiredReceiver;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};

/// What happened to a fired reminder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    /// The row was deleted before delivery started
    Skipped,
    /// Retired after a permanent failure or exhausted retries
    Failed { attempts: u32, error: SendError },
}

/// Text sent to the owner when a reminder fires
pub fn format_reminder(body: &str) -> String {
    format!("⏰ Reminder: {}", body)
}

#[derive(Clone)]
pub struct DeliveryDispatcher {
    repo: Repository,
    messenger: Arc<dyn Messenger>,
    policy: RetryPolicy,
}

impl DeliveryDispatcher {
    pub fn new(repo: Repository, messenger: Arc<dyn Messenger>, policy: RetryPolicy) -> Self {
        Self {
            repo,
            messenger,
            policy,
        }
    }

    /// Run the dispatch loop until the scheduler side of the channel is
    /// dropped or the returned handle is shut down. Each reminder is
    /// delivered on its own task, tracked so none outlives the loop.
    pub fn spawn(self, mut fired: FiredReceiver) -> DispatcherHandle {
        let stop = Arc::new(Notify::new());
        let stop_signal = Arc::clone(&stop);

        let task = tokio::spawn(async move {
            tracing::info!("Delivery dispatcher started");
            let mut deliveries = JoinSet::new();

            loop {
                tokio::select! {
                    biased;

                    _ = stop_signal.notified() => break,
                    Some(result) = deliveries.join_next(), if !deliveries.is_empty() => {
                        if let Err(e) = result {
                            tracing::error!("Delivery task failed: {}", e);
                        }
                    }
                    reminder = fired.recv() => {
                        let Some(reminder) = reminder else { break };
                        let dispatcher = self.clone();
                        deliveries.spawn(async move {
                            let id = reminder.id;
                            if let Err(e) = dispatcher.deliver(reminder).await {
                                tracing::error!("Error delivering reminder {}: {}", id, e);
                            }
                        });
                    }
                }
            }

            // Anything still in flight, e.g. sleeping in backoff, is abandoned
            // and its row stays pending for the next recovery
            if !deliveries.is_empty() {
                tracing::info!("Aborting {} in-flight deliveries", deliveries.len());
            }
            deliveries.shutdown().await;

            tracing::info!("Delivery dispatcher stopped");
        });

        DispatcherHandle { stop, task }
    }

    /// Deliver one fired reminder and retire it
    pub async fn deliver(&self, reminder: Reminder) -> Result<DeliveryOutcome> {
        // A cancel that lost the timer race has still deleted the row
        if self.repo.get_reminder(reminder.id).await?.is_none() {
            tracing::info!("Reminder {} was canceled before delivery, skipping", reminder.id);
            return Ok(DeliveryOutcome::Skipped);
        }

        let text = format_reminder(&reminder.body);
        let mut attempt = 0;

        let outcome = loop {
            attempt += 1;

            match self.messenger.send(reminder.owner_id, &text).await {
                Ok(()) => {
                    tracing::info!(
                        "Delivered reminder {} to {} (attempt {})",
                        reminder.id,
                        reminder.owner_id,
                        attempt
                    );
                    break DeliveryOutcome::Delivered { attempts: attempt };
                }
                Err(SendError::Transient(reason)) if attempt < self.policy.max_attempts => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        "Transient failure delivering reminder {} (attempt {}/{}): {}; retrying in {:?}",
                        reminder.id,
                        attempt,
                        self.policy.max_attempts,
                        reason,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error @ SendError::Transient(_)) => {
                    tracing::error!(
                        "Giving up on reminder {} after {} attempts: {}",
                        reminder.id,
                        attempt,
                        error
                    );
                    break DeliveryOutcome::Failed {
                        attempts: attempt,
                        error,
                    };
                }
                Err(error @ SendError::Permanent(_)) => {
                    tracing::warn!(
                        "Permanent failure delivering reminder {} to {}: {}",
                        reminder.id,
                        reminder.owner_id,
                        error
                    );
                    break DeliveryOutcome::Failed {
                        attempts: attempt,
                        error,
                    };
                }
            }
        };

        self.repo
            .delete_reminder(reminder.id, reminder.owner_id)
            .await?;
        tracing::debug!("Retired reminder {}", reminder.id);

        Ok(outcome)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let jitter = if self.policy.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.policy.jitter_ms)
        } else {
            0
        };
        self.policy.backoff(attempt) + Duration::from_millis(jitter)
    }
}

/// Running dispatch loop
pub struct DispatcherHandle {
    stop: Arc<Notify>,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Stop accepting fired reminders and wait until every delivery task
    /// has finished or been aborted. No send happens after this returns.
    pub async fn shutdown(self) {
        self.stop.notify_one();
        if let Err(e) = self.task.await {
            tracing::error!("Delivery dispatcher failed: {}", e);
        }
    }

    /// Wait for the loop to end on its own, once every sender is dropped
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::error!("Delivery dispatcher failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{test_repository, CreateReminderRequest};
    use crate::messenger::testing::RecordingMessenger;
    use crate::services::SchedulerService;
    use chrono::{Duration as ChronoDuration, Utc};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 10,
            jitter_ms: 0,
        }
    }

    async fn setup(max_attempts: u32) -> (DeliveryDispatcher, Repository, Arc<RecordingMessenger>) {
        let repo = test_repository().await;
        let messenger = Arc::new(RecordingMessenger::new());
        let dispatcher =
            DeliveryDispatcher::new(repo.clone(), messenger.clone(), fast_policy(max_attempts));
        (dispatcher, repo, messenger)
    }

    async fn pending(repo: &Repository, owner_id: i64, body: &str) -> Reminder {
        repo.insert_reminder(CreateReminderRequest {
            owner_id,
            fire_at: Utc::now() + ChronoDuration::hours(1),
            body: body.to_string(),
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_delivers_and_retires() {
        let (dispatcher, repo, messenger) = setup(3).await;
        let reminder = pending(&repo, 42, "pay rent").await;

        let outcome = dispatcher.deliver(reminder.clone()).await.unwrap();

        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 1 });
        assert_eq!(
            messenger.sent().await,
            vec![(42, "⏰ Reminder: pay rent".to_string())]
        );
        assert!(repo.get_reminder(reminder.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deleted_reminder_is_skipped() {
        let (dispatcher, repo, messenger) = setup(3).await;
        let reminder = pending(&repo, 1, "gone").await;
        repo.delete_reminder(reminder.id, 1).await.unwrap();

        let outcome = dispatcher.deliver(reminder).await.unwrap();

        assert_eq!(outcome, DeliveryOutcome::Skipped);
        assert_eq!(messenger.attempts().await, 0);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let (dispatcher, repo, messenger) = setup(3).await;
        let reminder = pending(&repo, 1, "retry me").await;
        messenger
            .fail_next([
                SendError::Transient("timeout".to_string()),
                SendError::Transient("timeout".to_string()),
            ])
            .await;

        let outcome = dispatcher.deliver(reminder.clone()).await.unwrap();

        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 3 });
        assert_eq!(messenger.sent().await.len(), 1);
        assert!(repo.get_reminder(reminder.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_exhausted_retries_retire_the_row() {
        let (dispatcher, repo, messenger) = setup(2).await;
        let reminder = pending(&repo, 1, "never arrives").await;
        messenger
            .fail_next(vec![SendError::Transient("down".to_string()); 5])
            .await;

        let outcome = dispatcher.deliver(reminder.clone()).await.unwrap();

        assert_eq!(
            outcome,
            DeliveryOutcome::Failed {
                attempts: 2,
                error: SendError::Transient("down".to_string()),
            }
        );
        assert_eq!(messenger.attempts().await, 2);
        assert!(repo.get_reminder(reminder.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let (dispatcher, repo, messenger) = setup(5).await;
        let reminder = pending(&repo, 1, "blocked").await;
        messenger
            .fail_next([SendError::Permanent("chat not found".to_string())])
            .await;

        let outcome = dispatcher.deliver(reminder.clone()).await.unwrap();

        assert!(matches!(outcome, DeliveryOutcome::Failed { attempts: 1, .. }));
        assert_eq!(messenger.attempts().await, 1);
        assert!(repo.list_all_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_spawned_loop_delivers_fired_reminders() {
        let (dispatcher, repo, messenger) = setup(3).await;
        let (scheduler, fired) = SchedulerService::new();
        let handle = dispatcher.spawn(fired);

        let mut reminder = pending(&repo, 9, "from the timer").await;
        reminder.fire_at = Utc::now();
        scheduler.arm(reminder).await.unwrap();

        for _ in 0..50 {
            if !messenger.sent().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(
            messenger.sent().await,
            vec![(9, "⏰ Reminder: from the timer".to_string())]
        );

        drop(scheduler);
        handle.join().await;
    }

    #[tokio::test]
    async fn test_shutdown_abandons_delivery_in_backoff() {
        let repo = test_repository().await;
        let messenger = Arc::new(RecordingMessenger::new());
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 400,
            max_delay_ms: 400,
            jitter_ms: 0,
        };
        let dispatcher = DeliveryDispatcher::new(repo.clone(), messenger.clone(), policy);
        let (scheduler, fired) = SchedulerService::new();
        let handle = dispatcher.spawn(fired);

        messenger
            .fail_next([SendError::Transient("timeout".to_string())])
            .await;
        let mut reminder = pending(&repo, 3, "interrupted").await;
        reminder.fire_at = Utc::now();
        let id = reminder.id;
        scheduler.arm(reminder).await.unwrap();

        for _ in 0..50 {
            if messenger.attempts().await > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(messenger.attempts().await, 1);

        handle.shutdown().await;
        tokio::time::sleep(Duration::from_millis(600)).await;

        // The retry never ran and the row is left for the next recovery
        assert_eq!(messenger.attempts().await, 1);
        assert!(messenger.sent().await.is_empty());
        assert!(repo.get_reminder(id).await.unwrap().is_some());
    }
}
