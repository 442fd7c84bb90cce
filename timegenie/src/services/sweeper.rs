/// Draft Sweeper
/// Periodically discards intake drafts whose owners stopped replying,
/// using a cron job on its own job scheduler
use crate::config::DRAFT_SWEEP_CRON;
use crate::error::{AppError, Result};
use crate::services::IntakeMachine;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

pub struct DraftSweeper {
    scheduler: Arc<RwLock<JobScheduler>>,
    intake: IntakeMachine,
    ttl: chrono::Duration,
    current_job_id: Arc<RwLock<Option<Uuid>>>,
}

impl DraftSweeper {
    /// Create new sweeper for drafts idle longer than `ttl`
    pub async fn new(intake: IntakeMachine, ttl: chrono::Duration) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to create job scheduler: {}", e)))?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            intake,
            ttl,
            current_job_id: Arc::new(RwLock::new(None)),
        })
    }

    /// Register the sweep job and start the job scheduler
    pub async fn start(&self) -> Result<()> {
        self.schedule(DRAFT_SWEEP_CRON).await?;

        let scheduler = self.scheduler.read().await;
        scheduler
            .start()
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to start job scheduler: {}", e)))?;
        tracing::info!("Draft sweeper started ({})", DRAFT_SWEEP_CRON);
        Ok(())
    }

    async fn schedule(&self, cron_expr: &str) -> Result<()> {
        let mut current_job = self.current_job_id.write().await;
        if current_job.is_some() {
            return Ok(());
        }

        let intake = self.intake.clone();
        let ttl = self.ttl;

        let job = Job::new_async(cron_expr.to_string(), move |_uuid, _l| {
            let intake = intake.clone();
            Box::pin(async move {
                let expired = intake.expire_drafts(Utc::now() - ttl).await;
                tracing::debug!("Draft sweep finished, {} expired", expired);
            })
        })
        .map_err(|e| AppError::Scheduler(format!("Failed to create sweep job: {}", e)))?;

        let job_id = job.guid();

        let scheduler = self.scheduler.write().await;
        scheduler
            .add(job)
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to schedule sweep job: {}", e)))?;

        *current_job = Some(job_id);
        Ok(())
    }

    /// Run one sweep immediately
    pub async fn sweep_now(&self) -> usize {
        self.intake.expire_drafts(Utc::now() - self.ttl).await
    }

    /// Shutdown the job scheduler gracefully
    pub async fn shutdown(&self) -> Result<()> {
        let mut current_job = self.current_job_id.write().await;
        let mut scheduler = self.scheduler.write().await;

        if let Some(job_id) = current_job.take() {
            scheduler
                .remove(&job_id)
                .await
                .map_err(|e| AppError::Scheduler(format!("Failed to remove sweep job: {}", e)))?;
        }

        scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to shutdown job scheduler: {}", e)))?;
        tracing::info!("Draft sweeper shutdown");
        Ok(())
    }
}
