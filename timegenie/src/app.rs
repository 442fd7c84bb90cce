//! Application state and lifecycle
//!
//! All services are created here, wired together, and torn down again.
//! Pending reminders are re-armed from the store before `start` returns,
//! so no new reminder is accepted ahead of recovery.

use crate::commands;
use crate::config::EngineConfig;
use crate::database::{create_pool, OwnerId, Repository};
use crate::error::Result;
use crate::messenger::Messenger;
use crate::services::{
    DeliveryDispatcher, DispatcherHandle, DraftSweeper, IntakeMachine, ReminderService,
    SchedulerService,
};
use crate::time::TimeParser;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Services shared by every command
#[derive(Clone)]
pub struct AppState {
    pub repo: Repository,
    pub reminders: ReminderService,
    pub intake: IntakeMachine,
    pub parser: Arc<dyn TimeParser>,
}

/// A running engine
pub struct App {
    state: AppState,
    scheduler: SchedulerService,
    sweeper: DraftSweeper,
    dispatcher: DispatcherHandle,
}

impl App {
    /// Open the configured database and start the engine
    pub async fn start(
        config: &EngineConfig,
        messenger: Arc<dyn Messenger>,
        parser: Arc<dyn TimeParser>,
    ) -> Result<Self> {
        config.validate()?;
        let pool = create_pool(&config.database_path).await?;
        Self::start_with_pool(pool, config, messenger, parser).await
    }

    /// Start the engine on an already initialized pool
    pub async fn start_with_pool(
        pool: SqlitePool,
        config: &EngineConfig,
        messenger: Arc<dyn Messenger>,
        parser: Arc<dyn TimeParser>,
    ) -> Result<Self> {
        tracing::info!("Starting reminder engine");

        let repo = Repository::new(pool);
        let (scheduler, fired) = SchedulerService::new();

        let dispatcher =
            DeliveryDispatcher::new(repo.clone(), messenger, config.delivery.clone()).spawn(fired);

        scheduler.recover(&repo).await?;

        let reminders = ReminderService::new(repo.clone(), scheduler.clone());
        let intake = IntakeMachine::new(reminders.clone(), Arc::clone(&parser));

        let sweeper = DraftSweeper::new(intake.clone(), config.draft_ttl()).await?;
        sweeper.start().await?;

        tracing::info!("Reminder engine started");

        Ok(Self {
            state: AppState {
                repo,
                reminders,
                intake,
                parser,
            },
            scheduler,
            sweeper,
            dispatcher,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Handle one chat message and return the reply
    pub async fn handle_message(&self, owner_id: OwnerId, text: &str) -> Result<String> {
        commands::dispatch(&self.state, owner_id, text, Utc::now()).await
    }

    /// Stop timers and background jobs and close the database.
    ///
    /// Pending reminders stay in the store for the next start.
    pub async fn shutdown(self) -> Result<()> {
        tracing::info!("Shutting down reminder engine");

        self.sweeper.shutdown().await?;
        self.scheduler.shutdown().await;
        // Deliveries must be gone before the pool closes, or one could send
        // and then fail to retire its row
        self.dispatcher.shutdown().await;
        self.state.repo.pool().close().await;

        tracing::info!("Reminder engine stopped");
        Ok(())
    }
}
