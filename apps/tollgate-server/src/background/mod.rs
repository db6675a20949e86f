//! Background maintenance on a cron schedule.
//!
//! Two jobs run outside the request path:
//! attempt log retention drops records no decision can read anymore, and
//! ingress cleanup forgets peers whose limiter state is back to full burst.

use std::future::Future;
use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tollgate_infra::Coordinator;

use crate::state::AppState;

/// Maintenance schedule. Expressions include a seconds field.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub retention_schedule: String,
    pub ingress_cleanup_schedule: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_schedule: "0 0 * * * *".to_string(),
            ingress_cleanup_schedule: "0 */5 * * * *".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: std::env::var("SCHEDULER_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(defaults.enabled),
            retention_schedule: std::env::var("RETENTION_PRUNE_SCHEDULE")
                .unwrap_or(defaults.retention_schedule),
            ingress_cleanup_schedule: defaults.ingress_cleanup_schedule,
        }
    }
}

/// Running maintenance jobs.
pub struct Maintenance {
    scheduler: Option<JobScheduler>,
}

fn cron_job<F, Fut>(schedule: &str, task: F) -> Result<Job, JobSchedulerError>
where
    F: Fn() -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Job::new_async(schedule, move |_uuid, _lock| {
        let task = task.clone();
        Box::pin(async move { task().await })
    })
}

async fn prune_attempts(coordinator: Arc<Coordinator>) {
    match coordinator.prune_attempts().await {
        Ok(removed) => tracing::info!(removed, "Attempt log retention pass finished"),
        Err(e) => tracing::warn!(error = %e, "Attempt log retention pass failed"),
    }
}

impl Maintenance {
    /// Register the jobs and start ticking. A disabled config starts nothing.
    pub async fn start(state: &AppState, config: &SchedulerConfig) -> Result<Self, JobSchedulerError> {
        if !config.enabled {
            tracing::info!("Scheduler disabled, attempt log retention will not run");
            return Ok(Self { scheduler: None });
        }

        let scheduler = JobScheduler::new().await?;

        let coordinator = state.coordinator.clone();
        let id = scheduler
            .add(cron_job(&config.retention_schedule, move || {
                prune_attempts(coordinator.clone())
            })?)
            .await?;
        tracing::info!(schedule = %config.retention_schedule, job_id = %id, "Retention job registered");

        #[cfg(feature = "rate-limit")]
        {
            let ingress = state.ingress.clone();
            let id = scheduler
                .add(cron_job(&config.ingress_cleanup_schedule, move || {
                    let ingress = ingress.clone();
                    async move {
                        ingress.retain_recent();
                        tracing::debug!(tracked = ingress.tracked_keys(), "Ingress limiter cleaned up");
                    }
                })?)
                .await?;
            tracing::info!(schedule = %config.ingress_cleanup_schedule, job_id = %id, "Ingress cleanup job registered");
        }

        scheduler.start().await?;
        tracing::info!("Scheduler started");
        Ok(Self {
            scheduler: Some(scheduler),
        })
    }

    pub async fn shutdown(&mut self) -> Result<(), JobSchedulerError> {
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.shutdown().await?;
            tracing::info!("Scheduler stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn test_default_schedules_parse() {
        let config = SchedulerConfig::default();
        assert!(cron_job(&config.retention_schedule, || async {}).is_ok());
        assert!(cron_job(&config.ingress_cleanup_schedule, || async {}).is_ok());
        assert!(cron_job("every hour", || async {}).is_err());
    }
}
