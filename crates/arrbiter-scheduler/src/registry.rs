// SPDX-License-Identifier: GPL-3.0-or-later
use crate::job::{Job, JobContext, JobResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, warn};

/// Job schedule configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Run at fixed intervals (in seconds), starting immediately
    Interval(u64),
    /// Run once immediately, then never again
    Once,
}

impl Schedule {
    pub fn every_minutes(minutes: u64) -> Self {
        Self::Interval(minutes.saturating_mul(60))
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interval(seconds) => write!(f, "every {seconds}s"),
            Self::Once => f.write_str("once"),
        }
    }
}

struct ActiveTask {
    job_type: &'static str,
    name: String,
    schedule: Schedule,
    started_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

/// Snapshot of a running task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskInfo {
    pub job_id: String,
    pub job_type: &'static str,
    pub name: String,
    pub schedule: String,
    pub started_at: DateTime<Utc>,
}

/// Keyed set of running background tasks.
///
/// Each task runs its job to completion before waiting for the next tick, so a
/// job never overlaps with itself; ticks missed meanwhile are skipped. A shared
/// semaphore caps how many jobs execute at once across all tasks.
pub struct JobRegistry {
    tasks: Mutex<HashMap<String, ActiveTask>>,
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl JobRegistry {
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            tasks: Mutex::new(HashMap::new()),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Start `job` under `job_id`, replacing any task already running with that id.
    pub async fn start(&self, job_id: impl Into<String>, job: Arc<dyn Job>, schedule: Schedule) {
        let job_id = job_id.into();
        let mut tasks = self.tasks.lock().await;

        if let Some(previous) = tasks.remove(&job_id) {
            info!(target: "registry", %job_id, "replacing running task");
            previous.handle.abort();
        }

        info!(
            target: "registry",
            %job_id,
            job_type = job.job_type(),
            %schedule,
            "starting task"
        );

        let task = ActiveTask {
            job_type: job.job_type(),
            name: job.name(),
            schedule,
            started_at: Utc::now(),
            handle: tokio::spawn(Self::run_task(
                job_id.clone(),
                job,
                schedule,
                self.semaphore.clone(),
            )),
        };
        tasks.insert(job_id, task);
    }

    /// Stop a task. Returns whether one was running under that id.
    pub async fn stop(&self, job_id: &str) -> bool {
        match self.tasks.lock().await.remove(job_id) {
            Some(task) => {
                task.handle.abort();
                info!(target: "registry", %job_id, "stopped task");
                true
            }
            None => false,
        }
    }

    /// Stop every task and return how many were stopped.
    pub async fn stop_all(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        let count = tasks.len();
        for (_, task) in tasks.drain() {
            task.handle.abort();
        }
        info!(target: "registry", count, "stopped all tasks");
        count
    }

    /// Tasks that are still running, ordered by id.
    pub async fn active(&self) -> Vec<TaskInfo> {
        let tasks = self.tasks.lock().await;
        let mut active: Vec<TaskInfo> = tasks
            .iter()
            .filter(|(_, task)| !task.handle.is_finished())
            .map(|(job_id, task)| TaskInfo {
                job_id: job_id.clone(),
                job_type: task.job_type,
                name: task.name.clone(),
                schedule: task.schedule.to_string(),
                started_at: task.started_at,
            })
            .collect();
        active.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        active
    }

    async fn run_task(job_id: String, job: Arc<dyn Job>, schedule: Schedule, semaphore: Arc<Semaphore>) {
        match schedule {
            Schedule::Interval(seconds) => {
                let mut ticker = interval(Duration::from_secs(seconds.max(1)));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                        break;
                    };
                    Self::execute_job(&job_id, job.as_ref()).await;
                    drop(permit);
                }
            }
            Schedule::Once => {
                if let Ok(_permit) = semaphore.acquire_owned().await {
                    Self::execute_job(&job_id, job.as_ref()).await;
                }
            }
        }
    }

    /// Execute a single job with retry logic
    async fn execute_job(job_id: &str, job: &dyn Job) {
        let max_attempts = if job.is_retriable() {
            job.max_retries() + 1
        } else {
            1
        };
        let mut ctx = JobContext::new(job_id);

        loop {
            info!(
                target: "registry",
                %job_id,
                job_type = job.job_type(),
                attempt = ctx.attempt,
                max_attempts,
                "executing job"
            );

            let retry = match job.execute(ctx.clone()).await {
                Ok(JobResult::Success { summary }) => {
                    info!(
                        target: "registry",
                        %job_id,
                        job_type = job.job_type(),
                        attempts = ctx.attempt,
                        %summary,
                        "job completed"
                    );
                    return;
                }
                Ok(JobResult::Failure { error, retry }) => {
                    error!(
                        target: "registry",
                        %job_id,
                        job_type = job.job_type(),
                        attempts = ctx.attempt,
                        %error,
                        retry,
                        "job failed"
                    );
                    retry && job.is_retriable()
                }
                Err(err) => {
                    error!(
                        target: "registry",
                        %job_id,
                        job_type = job.job_type(),
                        attempts = ctx.attempt,
                        error = %err,
                        "job execution error"
                    );
                    job.is_retriable()
                }
            };

            if !retry || ctx.attempt >= max_attempts {
                if retry {
                    error!(target: "registry", %job_id, "job exhausted all retry attempts");
                }
                return;
            }

            let delay = Duration::from_secs(job.retry_delay_seconds());
            warn!(target: "registry", %job_id, ?delay, "retrying job after delay");
            tokio::time::sleep(delay).await;
            ctx = ctx.retry();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingJob {
        runs: AtomicU32,
        running: AtomicUsize,
        max_running: AtomicUsize,
        work_secs: u64,
        fail_first: u32,
    }

    #[async_trait::async_trait]
    impl Job for CountingJob {
        fn job_type(&self) -> &'static str {
            "counting"
        }

        fn name(&self) -> String {
            "Counting".to_string()
        }

        async fn execute(&self, _ctx: JobContext) -> Result<JobResult> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(running, Ordering::SeqCst);
            if self.work_secs > 0 {
                tokio::time::sleep(Duration::from_secs(self.work_secs)).await;
            }
            self.running.fetch_sub(1, Ordering::SeqCst);
            if run <= self.fail_first {
                return Ok(JobResult::Failure {
                    error: format!("run {run} failed"),
                    retry: true,
                });
            }
            Ok(JobResult::success(format!("run {run}")))
        }

        fn retry_delay_seconds(&self) -> u64 {
            1
        }
    }

    #[tokio::test(start_paused = true)]
    async fn interval_tasks_run_on_every_tick() {
        let registry = JobRegistry::new(2);
        let job = Arc::new(CountingJob::default());
        registry.start("count", job.clone(), Schedule::Interval(60)).await;

        tokio::time::sleep(Duration::from_secs(150)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_jobs_never_overlap_themselves() {
        let registry = JobRegistry::new(4);
        let job = Arc::new(CountingJob {
            work_secs: 100,
            ..Default::default()
        });
        registry.start("slow", job.clone(), Schedule::Interval(30)).await;

        tokio::time::sleep(Duration::from_secs(500)).await;
        assert_eq!(job.max_running.load(Ordering::SeqCst), 1);
        assert!(job.runs.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn starting_an_existing_id_replaces_the_task() {
        let registry = JobRegistry::new(2);
        let first = Arc::new(CountingJob::default());
        let second = Arc::new(CountingJob::default());
        registry.start("hunt", first.clone(), Schedule::Interval(60)).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        registry.start("hunt", second.clone(), Schedule::Interval(60)).await;

        tokio::time::sleep(Duration::from_secs(130)).await;
        assert_eq!(first.runs.load(Ordering::SeqCst), 1);
        assert_eq!(second.runs.load(Ordering::SeqCst), 3);
        assert_eq!(registry.active().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_and_stop_all_remove_tasks() {
        let registry = JobRegistry::new(2);
        registry
            .start("b", Arc::new(CountingJob::default()), Schedule::Interval(60))
            .await;
        registry
            .start("a", Arc::new(CountingJob::default()), Schedule::Interval(60))
            .await;

        let active = registry.active().await;
        assert_eq!(
            active.iter().map(|t| t.job_id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(active[0].schedule, "every 60s");

        assert!(registry.stop("a").await);
        assert!(!registry.stop("a").await);
        assert_eq!(registry.stop_all().await, 1);
        assert!(registry.active().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_retried_until_success() {
        let registry = JobRegistry::new(1);
        let job = Arc::new(CountingJob {
            fail_first: 2,
            ..Default::default()
        });
        registry.start("retry", job.clone(), Schedule::Once).await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 3);
        assert!(registry.active().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_after_max_attempts() {
        let registry = JobRegistry::new(1);
        let job = Arc::new(CountingJob {
            fail_first: 100,
            ..Default::default()
        });
        registry.start("doomed", job.clone(), Schedule::Once).await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn schedules_render_for_listing() {
        assert_eq!(Schedule::every_minutes(30), Schedule::Interval(1800));
        assert_eq!(Schedule::Once.to_string(), "once");
    }
}
