#![allow(dead_code)]

pub mod fixtures;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use uuid::Uuid;

use axscan::config::{SandboxConfig, SchedulerConfig};
use axscan::domain::job::{ScanJob, ScanMetadata, ScanOptions};
use axscan::domain::result::{ScanMetrics, ScanResult};
use axscan::infrastructure::audit::RecordingAuditLog;
use axscan::infrastructure::sandbox::SandboxManager;
use axscan::infrastructure::sandbox::runtime::InMemoryRuntime;
use axscan::infrastructure::scheduler::ScanExecutor;

/// A well-formed job targeting a stable URL.
pub fn sample_job() -> ScanJob {
    ScanJob::new(
        "https://example.com/page",
        "tester",
        ScanOptions::default(),
        ScanMetadata::default(),
    )
}

/// Scheduler config tuned for fast, deterministic tests: tight polling,
/// no retry jitter, background loops effectively parked.
pub fn test_scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        max_concurrency: 1,
        poll_interval_ms: 10,
        processing_timeout_ms: 5_000,
        retry_backoff_ms: 100,
        retry_jitter_ms: 0,
        default_max_retries: 3,
        reaper_interval_ms: 3_600_000,
        reaper_grace_ms: 1_000,
        dead_letter_warn_threshold: 50,
        in_flight_warn_threshold: 32,
        health_interval_ms: 3_600_000,
    }
}

/// Sandbox manager over the in-memory runtime plus its recording audit log.
pub fn test_sandbox_manager(
    runtime: Arc<InMemoryRuntime>,
    config: SandboxConfig,
) -> (Arc<SandboxManager>, Arc<RecordingAuditLog>) {
    let audit = Arc::new(RecordingAuditLog::default());
    let manager = Arc::new(SandboxManager::new(
        runtime,
        Arc::clone(&audit) as Arc<_>,
        config,
    ));
    (manager, audit)
}

/// Scripted attempt outcome for [`FakeExecutor`].
#[derive(Debug, Clone)]
pub enum FakeOutcome {
    Completed,
    Failed(&'static str),
    /// Never returns within any realistic deadline.
    Hang,
}

/// Executor double recording each attempt with its (tokio) timestamp.
pub struct FakeExecutor {
    script: Mutex<VecDeque<FakeOutcome>>,
    attempts: Mutex<Vec<(Uuid, Instant)>>,
}

impl FakeExecutor {
    /// Outcomes are consumed in order; once drained every further attempt
    /// completes successfully.
    pub fn scripted(outcomes: Vec<FakeOutcome>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn always_ok() -> Self {
        Self::scripted(Vec::new())
    }

    pub fn attempts(&self) -> Vec<(Uuid, Instant)> {
        self.attempts.lock().expect("attempts lock").clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().expect("attempts lock").len()
    }
}

#[async_trait]
impl ScanExecutor for FakeExecutor {
    async fn execute(&self, job: &ScanJob) -> ScanResult {
        self.attempts
            .lock()
            .expect("attempts lock")
            .push((job.id, Instant::now()));
        let outcome = self
            .script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or(FakeOutcome::Completed);
        match outcome {
            FakeOutcome::Completed => {
                ScanResult::completed(job.id, Vec::new(), ScanMetrics::default(), None)
            }
            FakeOutcome::Failed(error) => ScanResult::failed(job.id, error),
            FakeOutcome::Hang => {
                tokio::time::sleep(Duration::from_secs(86_400)).await;
                ScanResult::failed(job.id, "woke from hang")
            }
        }
    }
}

/// Poll until `check` yields true or the budget is spent.
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..2_000 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within wait budget");
}
