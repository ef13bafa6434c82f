//! Priority job scheduler.
//!
//! An in-process priority queue drained by a fixed pool of worker loops.
//! Ordering is strict priority tiers with FIFO inside each tier: the heap
//! key is the enqueue timestamp offset by a per-tier constant large enough
//! that no realistic timestamp can cross tiers. Each attempt runs under a
//! hard processing deadline; deadline overruns produce a timeout result and
//! force-release the job's sandboxes. Failed attempts retry with jittered
//! exponential backoff until the budget is spent, then dead-letter.
//!
//! Exactly-once accounting: a processing marker is inserted before an
//! attempt starts and removed by whichever path finalises it first (worker,
//! deadline, marker reaper, shutdown). Only the path that wins the removal
//! stores the terminal result.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::orchestrator::ScanOrchestrator;
use crate::config::SchedulerConfig;
use crate::domain::job::{JobPriority, JobValidationError, ScanJob};
use crate::domain::result::{ScanResult, ScanStatus};
use crate::domain::sandbox::RiskLevel;
use crate::infrastructure::audit::AuditLog;
use crate::infrastructure::sandbox::SandboxManager;
use crate::infrastructure::store::{ResultStore, StoreError};

/// Per-tier score offset (milliseconds). Large enough that a lower tier can
/// never outrank a higher one on timestamps alone.
const PRIORITY_TIER_OFFSET_MS: i64 = 1_000_000_000_000;

/// Dequeue score: enqueue timestamp within a strict priority tier. Lower
/// scores dequeue first.
pub fn priority_score(enqueue_ms: i64, priority: JobPriority) -> i64 {
    enqueue_ms + priority.rank() * PRIORITY_TIER_OFFSET_MS
}

/// Executes one job attempt to a terminal result.
#[async_trait]
pub trait ScanExecutor: Send + Sync {
    async fn execute(&self, job: &ScanJob) -> ScanResult;
}

#[async_trait]
impl ScanExecutor for ScanOrchestrator {
    async fn execute(&self, job: &ScanJob) -> ScanResult {
        self.run(job).await
    }
}

/// Enqueue-boundary rejections.
#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("Scheduler is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Invalid(#[from] JobValidationError),
}

/// Snapshot of queue health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub dead_letter: usize,
    pub completed: u64,
    pub failed: u64,
}

/// A job whose retry budget is spent, retained for inspection.
#[derive(Debug, Clone)]
pub struct DeadLetterRecord {
    pub job: ScanJob,
    pub error: String,
    /// Total attempts made, including the first.
    pub attempts: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

struct QueuedJob {
    score: i64,
    seq: u64,
    job: ScanJob,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.seq == other.seq
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.score
            .cmp(&other.score)
            .then(self.seq.cmp(&other.seq))
    }
}

/// One in-flight attempt.
#[derive(Debug, Clone)]
struct ProcessingMarker {
    job: ScanJob,
    started_at: DateTime<Utc>,
    /// Past this instant (deadline plus reaper grace) the marker counts as
    /// orphaned.
    reap_after: DateTime<Utc>,
}

/// The scheduler: queue, worker pool, retry machinery and dead letters.
pub struct ScanScheduler {
    executor: Arc<dyn ScanExecutor>,
    store: Arc<dyn ResultStore>,
    sandboxes: Arc<SandboxManager>,
    audit: Arc<dyn AuditLog>,
    config: SchedulerConfig,
    queue: Mutex<BinaryHeap<Reverse<QueuedJob>>>,
    processing: Mutex<HashMap<Uuid, ProcessingMarker>>,
    dead_letter: Mutex<Vec<DeadLetterRecord>>,
    retry_timers: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    tasks: Mutex<JoinSet<()>>,
    seq: AtomicU64,
    shutting_down: AtomicBool,
    cancel: CancellationToken,
}

impl ScanScheduler {
    pub fn new(
        executor: Arc<dyn ScanExecutor>,
        store: Arc<dyn ResultStore>,
        sandboxes: Arc<SandboxManager>,
        audit: Arc<dyn AuditLog>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            executor,
            store,
            sandboxes,
            audit,
            config,
            queue: Mutex::new(BinaryHeap::new()),
            processing: Mutex::new(HashMap::new()),
            dead_letter: Mutex::new(Vec::new()),
            retry_timers: Mutex::new(HashMap::new()),
            tasks: Mutex::new(JoinSet::new()),
            seq: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Validate and enqueue a job, returning its id.
    pub async fn enqueue(&self, mut job: ScanJob) -> Result<Uuid, EnqueueError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(EnqueueError::ShuttingDown);
        }
        if job.metadata.max_retries == 0 {
            job.metadata.max_retries = self.config.default_max_retries;
        }
        job.validate()?;

        let job_id = job.id;
        self.audit
            .log_scan_activity(
                &job.user_id,
                job_id,
                "job_enqueued",
                &format!("url={} priority={}", job.url, job.metadata.priority),
                "accepted",
            )
            .await;
        self.push(job).await;
        Ok(job_id)
    }

    async fn push(&self, job: ScanJob) {
        let score = priority_score(Utc::now().timestamp_millis(), job.metadata.priority);
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        debug!(job_id = %job.id, score, "job queued");
        self.queue.lock().await.push(Reverse(QueuedJob { score, seq, job }));
    }

    async fn pop(&self) -> Option<ScanJob> {
        self.queue.lock().await.pop().map(|Reverse(queued)| queued.job)
    }

    /// Spawn the worker pool, the marker reaper and the health monitor.
    pub async fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        for worker_id in 0..self.config.max_concurrency {
            let scheduler = Arc::clone(self);
            tasks.spawn(async move { scheduler.worker_loop(worker_id).await });
        }
        {
            let scheduler = Arc::clone(self);
            tasks.spawn(async move { scheduler.marker_reaper_loop().await });
        }
        {
            let scheduler = Arc::clone(self);
            tasks.spawn(async move { scheduler.health_monitor_loop().await });
        }
        info!(workers = self.config.max_concurrency, "scheduler started");
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        debug!(worker_id, "scan worker started");
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.pop().await {
                Some(job) => {
                    let interrupted = tokio::select! {
                        _ = self.cancel.cancelled() => true,
                        _ = self.process(job.clone()) => false,
                    };
                    if interrupted {
                        self.interrupt(job).await;
                        break;
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(poll) => {}
                    }
                }
            }
        }
        debug!(worker_id, "scan worker exiting");
    }

    async fn process(self: &Arc<Self>, job: ScanJob) {
        let deadline = Duration::from_millis(self.config.processing_timeout_ms);
        let grace = chrono::Duration::milliseconds(
            (self.config.processing_timeout_ms + self.config.reaper_grace_ms) as i64,
        );
        {
            let mut processing = self.processing.lock().await;
            processing.insert(
                job.id,
                ProcessingMarker {
                    job: job.clone(),
                    started_at: Utc::now(),
                    reap_after: Utc::now() + grace,
                },
            );
        }

        let result = match tokio::time::timeout(deadline, self.executor.execute(&job)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(job_id = %job.id, deadline_ms = deadline.as_millis() as u64, "processing timeout exceeded");
                self.sandboxes
                    .force_cleanup_for_job(job.id, "processing timeout exceeded")
                    .await;
                self.audit
                    .log_container_activity(
                        Uuid::nil(),
                        "job_deadline_exceeded",
                        &format!("job={}", job.id),
                        RiskLevel::Medium,
                    )
                    .await;
                ScanResult::timeout(job.id, deadline)
            }
        };

        self.finalize(job, result).await;
    }

    /// Terminal bookkeeping for one attempt. Whichever caller removes the
    /// processing marker owns finalisation; everyone else backs off.
    async fn finalize(self: &Arc<Self>, job: ScanJob, result: ScanResult) {
        if self.processing.lock().await.remove(&job.id).is_none() {
            debug!(job_id = %job.id, "attempt already finalised elsewhere");
            return;
        }

        match result.status {
            ScanStatus::Failed if job.retries_remaining() => {
                let error = result
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown failure".to_string());
                self.schedule_retry(job, error).await;
            }
            ScanStatus::Failed => {
                let error = result
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown failure".to_string());
                self.dead_letter_job(&job, error).await;
                self.store_terminal(result).await;
            }
            ScanStatus::Completed | ScanStatus::Timeout => {
                self.store_terminal(result).await;
            }
        }
    }

    async fn store_terminal(&self, result: ScanResult) {
        let job_id = result.job_id;
        if let Err(e) = self.store.store_result(result).await {
            error!(job_id = %job_id, error = %e, "failed to store terminal result");
        }
    }

    /// Jittered exponential backoff, then requeue. The timer is tracked so
    /// shutdown can abort pending retries.
    async fn schedule_retry(self: &Arc<Self>, job: ScanJob, error: String) {
        let retry = job.retry_copy();
        let exponent = job.metadata.retry_count.min(16);
        let backoff = self.config.retry_backoff_ms.saturating_mul(1 << exponent);
        let jitter = if self.config.retry_jitter_ms > 0 {
            rand::rng().random_range(0..=self.config.retry_jitter_ms)
        } else {
            0
        };
        let delay = Duration::from_millis(backoff + jitter);

        info!(
            job_id = %job.id,
            attempt = retry.metadata.retry_count,
            max_retries = retry.metadata.max_retries,
            delay_ms = delay.as_millis() as u64,
            error,
            "scheduling retry"
        );
        self.audit
            .log_scan_activity(
                &job.user_id,
                job.id,
                "retry_scheduled",
                &format!("attempt={} delay_ms={}", retry.metadata.retry_count, delay.as_millis()),
                "pending",
            )
            .await;

        let scheduler = Arc::clone(self);
        let job_id = job.id;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler.retry_timers.lock().await.remove(&job_id);
            if scheduler.shutting_down.load(Ordering::SeqCst) {
                return;
            }
            scheduler.push(retry).await;
        });
        self.retry_timers.lock().await.insert(job_id, handle);
    }

    /// Terminal record for an attempt cut off by shutdown. The worker holds
    /// the job itself, so this works whether or not the attempt got as far
    /// as inserting its processing marker; the store's duplicate rejection
    /// settles the race against a finalisation that already completed.
    async fn interrupt(&self, job: ScanJob) {
        self.processing.lock().await.remove(&job.id);
        self.sandboxes
            .force_cleanup_for_job(job.id, "interrupted by shutdown")
            .await;
        match self
            .store
            .store_result(ScanResult::failed(job.id, "interrupted by shutdown"))
            .await
        {
            Ok(()) => {
                warn!(job_id = %job.id, "attempt interrupted by shutdown");
                self.audit
                    .log_scan_activity(
                        &job.user_id,
                        job.id,
                        "scan_interrupted",
                        "scheduler shutdown",
                        "failure",
                    )
                    .await;
            }
            Err(StoreError::Duplicate(_)) => {
                debug!(job_id = %job.id, "attempt already finalised before shutdown");
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "failed to store interruption result");
            }
        }
    }

    async fn dead_letter_job(&self, job: &ScanJob, error: String) {
        warn!(
            job_id = %job.id,
            attempts = job.metadata.retry_count + 1,
            error,
            "retry budget exhausted, dead-lettering"
        );
        self.audit
            .log_scan_activity(
                &job.user_id,
                job.id,
                "job_dead_lettered",
                &format!("attempts={} error={}", job.metadata.retry_count + 1, error),
                "failure",
            )
            .await;
        self.dead_letter.lock().await.push(DeadLetterRecord {
            job: job.clone(),
            error,
            attempts: job.metadata.retry_count + 1,
            dead_lettered_at: Utc::now(),
        });
    }

    /// Recovers markers whose worker died without finalising: past the
    /// deadline-plus-grace point the reaper claims the marker,
    /// force-releases the job's sandboxes and re-enqueues the job as a
    /// retry attempt (dead-lettering once the budget is spent).
    async fn marker_reaper_loop(self: Arc<Self>) {
        let interval = Duration::from_millis(self.config.reaper_interval_ms);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let now = Utc::now();
            let orphaned: Vec<(Uuid, ProcessingMarker)> = {
                let mut processing = self.processing.lock().await;
                let ids: Vec<Uuid> = processing
                    .iter()
                    .filter(|(_, marker)| marker.reap_after < now)
                    .map(|(id, _)| *id)
                    .collect();
                ids.into_iter()
                    .filter_map(|id| processing.remove(&id).map(|marker| (id, marker)))
                    .collect()
            };

            for (job_id, marker) in orphaned {
                warn!(
                    job_id = %job_id,
                    started_at = %marker.started_at,
                    "reaping orphaned processing marker"
                );
                self.sandboxes
                    .force_cleanup_for_job(job_id, "orphaned attempt reaped")
                    .await;
                self.audit
                    .log_scan_activity(
                        &marker.job.user_id,
                        job_id,
                        "attempt_reaped",
                        "processing marker outlived its deadline",
                        "failure",
                    )
                    .await;
                if marker.job.retries_remaining() {
                    self.push(marker.job.retry_copy()).await;
                } else {
                    self.dead_letter_job(&marker.job, "attempt lost past deadline".to_string())
                        .await;
                    self.store_terminal(ScanResult::failed(job_id, "attempt lost past deadline"))
                        .await;
                }
            }
        }
    }

    async fn health_monitor_loop(self: Arc<Self>) {
        let interval = Duration::from_millis(self.config.health_interval_ms);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let stats = self.queue_stats().await;
            if stats.dead_letter > self.config.dead_letter_warn_threshold {
                warn!(
                    dead_letter = stats.dead_letter,
                    threshold = self.config.dead_letter_warn_threshold,
                    "dead-letter backlog above threshold"
                );
            }
            if stats.processing > self.config.in_flight_warn_threshold {
                warn!(
                    in_flight = stats.processing,
                    threshold = self.config.in_flight_warn_threshold,
                    "in-flight job count above threshold"
                );
            }
            debug!(
                pending = stats.pending,
                processing = stats.processing,
                completed = stats.completed,
                failed = stats.failed,
                "scheduler health"
            );
        }
    }

    pub async fn queue_stats(&self) -> QueueStats {
        let totals = self.store.totals().await;
        QueueStats {
            pending: self.queue.lock().await.len(),
            processing: self.processing.lock().await.len(),
            dead_letter: self.dead_letter.lock().await.len(),
            completed: totals.completed,
            failed: totals.failed,
        }
    }

    /// Dead-letter records, newest last.
    pub async fn dead_letter_records(&self) -> Vec<DeadLetterRecord> {
        self.dead_letter.lock().await.clone()
    }

    /// Stop accepting work, abort pending retries, let workers wind down
    /// (each records its in-flight attempt as interrupted on the way out)
    /// and release all sandboxes.
    pub async fn shutdown(&self) {
        info!("scheduler shutting down");
        self.shutting_down.store(true, Ordering::SeqCst);
        self.cancel.cancel();

        for (_, handle) in self.retry_timers.lock().await.drain() {
            handle.abort();
        }
        {
            let mut tasks = self.tasks.lock().await;
            while tasks.join_next().await.is_some() {}
        }

        // backstop for any marker nobody claimed
        let leftover: Vec<ProcessingMarker> = self
            .processing
            .lock()
            .await
            .drain()
            .map(|(_, marker)| marker)
            .collect();
        for marker in leftover {
            self.interrupt(marker.job).await;
        }

        self.sandboxes.shutdown().await;
        info!("scheduler stopped");
    }
}
