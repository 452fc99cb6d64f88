// SPDX-License-Identifier: GPL-3.0-or-later
use crate::job::{Job, JobContext, JobResult};
use anyhow::Result;
use arrbiter_application::{
    run_hunt, run_queue_cleaner, ArrClient, CleanerRequest, HuntRequest, ProgressSink, RunContext,
};
use arrbiter_config::InstanceConfig;
use arrbiter_domain::{HuntType, RunStatus};
use arrbiter_infrastructure::{SearchHistoryRepository, StrikeRepository};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

fn with_progress(ctx: RunContext, progress: &Option<Arc<dyn ProgressSink>>) -> RunContext {
    match progress {
        Some(sink) => ctx.with_progress(sink.clone()),
        None => ctx,
    }
}

/// Hunt job - one missing or upgrade hunt against a single instance
pub struct HuntJob {
    instance: InstanceConfig,
    hunt_type: HuntType,
    client: Arc<dyn ArrClient>,
    history: Arc<dyn SearchHistoryRepository>,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl HuntJob {
    pub fn new(
        instance: InstanceConfig,
        hunt_type: HuntType,
        client: Arc<dyn ArrClient>,
        history: Arc<dyn SearchHistoryRepository>,
    ) -> Self {
        Self {
            instance,
            hunt_type,
            client,
            history,
            progress: None,
        }
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }
}

#[async_trait::async_trait]
impl Job for HuntJob {
    fn job_type(&self) -> &'static str {
        "hunt"
    }

    fn name(&self) -> String {
        format!("Hunt {} ({})", self.hunt_type, self.instance.name)
    }

    async fn execute(&self, ctx: JobContext) -> Result<JobResult> {
        let Some(config) = self.instance.hunt.as_ref() else {
            debug!(target: "jobs", job_id = %ctx.job_id, "instance has no hunt settings");
            return Ok(JobResult::success("no hunt settings"));
        };

        let mut run = with_progress(RunContext::new(), &self.progress);
        let result = run_hunt(
            self.client.as_ref(),
            self.history.as_ref(),
            HuntRequest {
                instance_id: &self.instance.id,
                config,
                hunt_type: self.hunt_type,
            },
            &mut run,
        )
        .await;

        info!(
            target: "jobs",
            job_id = %ctx.job_id,
            run_id = %run.run_id,
            status = %result.status,
            searched = result.items_searched,
            grabbed = result.items_grabbed,
            api_calls = result.api_calls_made,
            message = %result.message,
            "hunt finished"
        );

        Ok(match result.status {
            RunStatus::Error => JobResult::Failure {
                error: result.message,
                retry: false,
            },
            _ => JobResult::success(result.message),
        })
    }

    /// The next tick is the retry.
    fn is_retriable(&self) -> bool {
        false
    }
}

/// Queue cleaner job - one pass over an instance's download queue
pub struct QueueCleanerJob {
    instance: InstanceConfig,
    client: Arc<dyn ArrClient>,
    strikes: Arc<dyn StrikeRepository>,
}

impl QueueCleanerJob {
    pub fn new(
        instance: InstanceConfig,
        client: Arc<dyn ArrClient>,
        strikes: Arc<dyn StrikeRepository>,
    ) -> Self {
        Self {
            instance,
            client,
            strikes,
        }
    }
}

#[async_trait::async_trait]
impl Job for QueueCleanerJob {
    fn job_type(&self) -> &'static str {
        "queue_cleaner"
    }

    fn name(&self) -> String {
        format!("Queue cleaner ({})", self.instance.name)
    }

    async fn execute(&self, ctx: JobContext) -> Result<JobResult> {
        let Some(config) = self.instance.queue_cleaner.as_ref() else {
            debug!(target: "jobs", job_id = %ctx.job_id, "instance has no queue cleaner settings");
            return Ok(JobResult::success("no queue cleaner settings"));
        };

        let mut run = RunContext::new();
        let summary = run_queue_cleaner(
            self.client.as_ref(),
            self.strikes.as_ref(),
            CleanerRequest {
                instance_id: &self.instance.id,
                config,
            },
            &mut run,
        )
        .await;

        info!(
            target: "jobs",
            job_id = %ctx.job_id,
            run_id = %run.run_id,
            status = %summary.status,
            matched = summary.matched,
            removed = summary.removed,
            imported = summary.imported,
            api_calls = summary.api_calls_made,
            "queue cleaner finished"
        );

        Ok(match summary.status {
            RunStatus::Error => JobResult::Failure {
                error: summary.message,
                retry: false,
            },
            _ => JobResult::success(summary.message),
        })
    }

    fn is_retriable(&self) -> bool {
        false
    }
}

/// Deletes search history rows that no instance's re-search window can reach.
pub struct HistoryPruneJob {
    history: Arc<dyn SearchHistoryRepository>,
    retention_days: u32,
}

impl HistoryPruneJob {
    pub fn new(history: Arc<dyn SearchHistoryRepository>, retention_days: u32) -> Self {
        Self {
            history,
            retention_days,
        }
    }
}

#[async_trait::async_trait]
impl Job for HistoryPruneJob {
    fn job_type(&self) -> &'static str {
        "history_prune"
    }

    fn name(&self) -> String {
        "Search history prune".to_string()
    }

    async fn execute(&self, ctx: JobContext) -> Result<JobResult> {
        let cutoff = Utc::now() - Duration::days(i64::from(self.retention_days));
        let pruned = self.history.prune_older_than(cutoff).await?;
        info!(
            target: "jobs",
            job_id = %ctx.job_id,
            pruned,
            retention_days = self.retention_days,
            "search history pruned"
        );
        Ok(JobResult::success(format!("pruned {pruned} rows")))
    }

    fn max_retries(&self) -> u32 {
        2
    }

    fn retry_delay_seconds(&self) -> u64 {
        300
    }
}
