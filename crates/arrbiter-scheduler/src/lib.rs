// SPDX-License-Identifier: GPL-3.0-or-later
pub mod job;
pub mod jobs;
pub mod registry;

use arrbiter_application::{AppState, ArrClient, ProgressSink};
use arrbiter_domain::HuntType;
use arrbiter_infrastructure::{SearchHistoryRepository, StrikeRepository};
use registry::JobRegistry;
use std::sync::Arc;
use tracing::{info, warn};

use jobs::{HistoryPruneJob, HuntJob, QueueCleanerJob};

pub const HISTORY_PRUNE_JOB_ID: &str = "history-prune";
/// Retention used by the prune job when no instance hunts.
const DEFAULT_HISTORY_RETENTION_DAYS: u32 = 30;

pub fn hunt_job_id(instance_id: &str, hunt_type: HuntType) -> String {
    format!("hunt:{instance_id}:{hunt_type}")
}

pub fn queue_cleaner_job_id(instance_id: &str) -> String {
    format!("queue-cleaner:{instance_id}")
}

pub struct Scheduler {
    state: AppState,
    registry: Arc<JobRegistry>,
    history: Arc<dyn SearchHistoryRepository>,
    strikes: Arc<dyn StrikeRepository>,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl Scheduler {
    pub fn new(
        state: AppState,
        history: Arc<dyn SearchHistoryRepository>,
        strikes: Arc<dyn StrikeRepository>,
    ) -> Self {
        let registry = Arc::new(JobRegistry::new(state.config.scheduler.max_concurrent_jobs));
        Self {
            state,
            registry,
            history,
            strikes,
            progress: None,
        }
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn registry(&self) -> Arc<JobRegistry> {
        self.registry.clone()
    }

    /// Start every configured job and return how many tasks were started.
    pub async fn register_jobs(&self) -> usize {
        info!(target: "scheduler", "registering background jobs");
        let mut started = 0;

        for instance in &self.state.config.instances {
            if !instance.service.supports_hunting() && !instance.service.supports_queue() {
                warn!(
                    target: "scheduler",
                    instance_id = %instance.id,
                    service = %instance.service,
                    "service has nothing to automate, no jobs registered"
                );
                continue;
            }
            let client: Arc<dyn ArrClient> = Arc::new(self.state.client_for(instance));

            for hunt_type in [HuntType::Missing, HuntType::Upgrade] {
                let Some(hunt) = instance.hunt.as_ref().filter(|_| instance.hunt_enabled(hunt_type))
                else {
                    continue;
                };
                let mut job = HuntJob::new(
                    instance.clone(),
                    hunt_type,
                    client.clone(),
                    self.history.clone(),
                );
                if let Some(sink) = &self.progress {
                    job = job.with_progress(sink.clone());
                }
                self.registry
                    .start(
                        hunt_job_id(instance.id.as_str(), hunt_type),
                        Arc::new(job),
                        Schedule::every_minutes(hunt.interval_mins(hunt_type)),
                    )
                    .await;
                started += 1;
            }

            if let Some(cleaner) = instance
                .queue_cleaner
                .as_ref()
                .filter(|_| instance.queue_cleaner_enabled())
            {
                self.registry
                    .start(
                        queue_cleaner_job_id(instance.id.as_str()),
                        Arc::new(QueueCleanerJob::new(
                            instance.clone(),
                            client.clone(),
                            self.strikes.clone(),
                        )),
                        Schedule::every_minutes(cleaner.interval_mins),
                    )
                    .await;
                started += 1;
            }
        }

        let retention_days = self
            .state
            .config
            .instances
            .iter()
            .filter_map(|instance| instance.hunt.as_ref())
            .map(|hunt| hunt.research_after_days)
            .max()
            .unwrap_or(DEFAULT_HISTORY_RETENTION_DAYS);
        let prune_hours = self.state.config.scheduler.history_prune_interval_hours;
        self.registry
            .start(
                HISTORY_PRUNE_JOB_ID,
                Arc::new(HistoryPruneJob::new(self.history.clone(), retention_days)),
                Schedule::Interval(prune_hours.saturating_mul(60 * 60)),
            )
            .await;
        started += 1;

        info!(target: "scheduler", started, "all jobs registered");
        started
    }

    pub async fn shutdown(&self) {
        let stopped = self.registry.stop_all().await;
        info!(target: "scheduler", stopped, "scheduler stopped");
    }
}

// Re-export key types for convenience
pub use job::{Job, JobContext, JobResult};
pub use registry::{Schedule, TaskInfo};

#[cfg(test)]
mod tests {
    use super::*;
    use arrbiter_config::{AppConfig, InstanceConfig};
    use arrbiter_domain::{HuntConfig, InstanceId, QueueCleanerConfig, ServiceKind};
    use arrbiter_infrastructure::{InMemorySearchHistoryRepository, InMemoryStrikeRepository};

    fn instance(id: &str, service: ServiceKind) -> InstanceConfig {
        InstanceConfig {
            id: InstanceId::from(id),
            name: id.to_string(),
            service,
            // Nothing listens here; jobs fail fast if they get to run.
            base_url: "http://127.0.0.1:9".to_string(),
            api_key: "key".to_string(),
            hunt: Some(HuntConfig {
                hunt_missing_enabled: true,
                hunt_upgrades_enabled: false,
                research_after_days: 14,
                ..Default::default()
            }),
            queue_cleaner: Some(QueueCleanerConfig {
                enabled: true,
                ..Default::default()
            }),
        }
    }

    #[tokio::test]
    async fn registers_enabled_jobs_per_instance() {
        let config = AppConfig {
            instances: vec![
                instance("radarr", ServiceKind::Radarr),
                instance("prowlarr", ServiceKind::Prowlarr),
            ],
            ..Default::default()
        };
        let state = AppState::new(config, reqwest::Client::new());
        let scheduler = Scheduler::new(
            state,
            Arc::new(InMemorySearchHistoryRepository::new()),
            Arc::new(InMemoryStrikeRepository::new()),
        );

        assert_eq!(scheduler.register_jobs().await, 3);
        let ids: Vec<String> = scheduler
            .registry()
            .active()
            .await
            .into_iter()
            .map(|task| task.job_id)
            .collect();
        assert_eq!(
            ids,
            vec!["history-prune", "hunt:radarr:missing", "queue-cleaner:radarr"]
        );

        scheduler.shutdown().await;
        assert!(scheduler.registry().active().await.is_empty());
    }

    #[test]
    fn job_ids_name_instance_and_kind() {
        assert_eq!(hunt_job_id("sonarr", HuntType::Upgrade), "hunt:sonarr:upgrade");
        assert_eq!(queue_cleaner_job_id("sonarr"), "queue-cleaner:sonarr");
    }
}
