//! Sandbox lifecycle manager.
//!
//! Owns the registry of live [`SandboxContext`]s, drives the container
//! runtime, arms a wall-clock watchdog per sandbox and runs the orphan
//! reaper. Every state transition is appended to the sandbox's audit trail
//! and mirrored to the audit collaborator best-effort.
//!
//! Failure semantics: creation failures roll back partial state and
//! propagate; execution failures are returned to the caller without
//! destroying the sandbox; cleanup failures are logged and never returned,
//! so a stuck container cannot block scheduler progress.

pub mod runtime;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SandboxConfig;
use crate::domain::sandbox::{AuditSeverity, RiskLevel, SandboxContext, SandboxSpec};
use crate::infrastructure::audit::AuditLog;

use runtime::{CREATED_LABEL, ContainerRuntime, MANAGED_LABEL, RuntimeError, TIMEOUT_LABEL};

/// Cap on archived contexts retained after teardown for inspection.
const ARCHIVE_CAP: usize = 256;

/// Sandbox manager errors.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Sandbox not found: {0}")]
    NotFound(Uuid),

    #[error("Failed to create sandbox: {0}")]
    CreationFailed(String),

    #[error("Command failed inside sandbox (exit {exit_code}): {stderr}")]
    ExecutionFailed { exit_code: i32, stderr: String },

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

/// Build the default sandbox spec from configuration.
pub fn spec_from_config(config: &SandboxConfig) -> SandboxSpec {
    SandboxSpec {
        image: config.image.clone(),
        memory_bytes: config.memory_mb * 1024 * 1024,
        cpu_quota: config.cpu_quota,
        pids_limit: config.pids_limit,
        network: config.network,
        isolated_network: config.isolated_network.clone(),
        tmpfs_bytes: config.tmpfs_mb * 1024 * 1024,
        readonly_mounts: Vec::new(),
        env: BTreeMap::new(),
        run_as_user: config.run_as_user.clone(),
        cap_add: config.cap_add.clone(),
        timeout_ms: config.timeout_ms,
    }
}

/// Creates, monitors and destroys isolated scan environments.
pub struct SandboxManager {
    runtime: Arc<dyn ContainerRuntime>,
    audit: Arc<dyn AuditLog>,
    config: SandboxConfig,
    registry: RwLock<HashMap<Uuid, SandboxContext>>,
    watchdogs: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    archive: Mutex<VecDeque<SandboxContext>>,
}

impl SandboxManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        audit: Arc<dyn AuditLog>,
        config: SandboxConfig,
    ) -> Self {
        Self {
            runtime,
            audit,
            config,
            registry: RwLock::new(HashMap::new()),
            watchdogs: Mutex::new(HashMap::new()),
            archive: Mutex::new(VecDeque::new()),
        }
    }

    /// Default spec for this manager's configuration.
    pub fn default_spec(&self) -> SandboxSpec {
        spec_from_config(&self.config)
    }

    /// Create and start a new sandbox.
    ///
    /// The context enters the registry before the container is created, so
    /// even a failure during start leaves an auditable record (archived on
    /// rollback). An absolute wall-clock watchdog is armed at creation.
    pub async fn create_sandbox(
        self: &Arc<Self>,
        spec: SandboxSpec,
        job_id: Option<Uuid>,
    ) -> Result<Uuid, SandboxError> {
        let sandbox_id = Uuid::new_v4();
        let name = format!("axscan-{}", sandbox_id);
        let timeout = spec.timeout();

        let mut context = SandboxContext::new(sandbox_id, job_id, spec.clone());
        context.record(
            "created",
            format!("image={} memory={}b", spec.image, spec.memory_bytes),
            AuditSeverity::Info,
        );
        self.registry.write().await.insert(sandbox_id, context);

        let mut labels = BTreeMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "1".to_string());
        labels.insert(
            CREATED_LABEL.to_string(),
            Utc::now().timestamp_millis().to_string(),
        );
        labels.insert(TIMEOUT_LABEL.to_string(), spec.timeout_ms.to_string());

        let container_ref = match self.runtime.create(&name, &spec, &labels).await {
            Ok(container_ref) => container_ref,
            Err(e) => {
                self.rollback_creation(sandbox_id, &format!("container create failed: {}", e))
                    .await;
                return Err(SandboxError::CreationFailed(e.to_string()));
            }
        };

        {
            let mut registry = self.registry.write().await;
            if let Some(ctx) = registry.get_mut(&sandbox_id) {
                ctx.container_ref = Some(container_ref.clone());
            }
        }

        if let Err(e) = self.runtime.start(&container_ref).await {
            if let Err(remove_err) = self.runtime.remove(&container_ref, true).await {
                warn!(sandbox_id = %sandbox_id, error = %remove_err, "failed to remove container after start failure");
            }
            self.rollback_creation(sandbox_id, &format!("container start failed: {}", e))
                .await;
            return Err(SandboxError::CreationFailed(e.to_string()));
        }

        {
            let mut registry = self.registry.write().await;
            if let Some(ctx) = registry.get_mut(&sandbox_id) {
                ctx.started_at = Some(Utc::now());
                ctx.record("started", container_ref.clone(), AuditSeverity::Info);
            }
        }

        self.audit
            .log_container_activity(
                sandbox_id,
                "sandbox_started",
                &format!("container={}", container_ref),
                RiskLevel::Low,
            )
            .await;

        self.arm_watchdog(sandbox_id, timeout).await;

        info!(sandbox_id = %sandbox_id, container = %container_ref, "sandbox started");
        Ok(sandbox_id)
    }

    /// Defense in depth: force-kill the sandbox once its absolute lifetime
    /// elapses, regardless of caller behaviour.
    async fn arm_watchdog(self: &Arc<Self>, sandbox_id: Uuid, timeout: Duration) {
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            // Drop our own handle before teardown so teardown doesn't abort
            // the task that is executing it.
            manager.watchdogs.lock().await.remove(&sandbox_id);
            if manager.registry.read().await.contains_key(&sandbox_id) {
                warn!(sandbox_id = %sandbox_id, "sandbox exceeded wall-clock timeout, force-killing");
                manager
                    .teardown(sandbox_id, "wall-clock timeout exceeded", true)
                    .await;
            }
        });
        self.watchdogs.lock().await.insert(sandbox_id, handle);
    }

    async fn rollback_creation(&self, sandbox_id: Uuid, details: &str) {
        error!(sandbox_id = %sandbox_id, details, "sandbox creation failed");
        let context = self.registry.write().await.remove(&sandbox_id);
        if let Some(mut ctx) = context {
            ctx.record("creation_failed", details, AuditSeverity::Error);
            ctx.finished_at = Some(Utc::now());
            self.archive_context(ctx).await;
        }
        self.audit
            .log_container_activity(sandbox_id, "creation_failed", details, RiskLevel::Medium)
            .await;
    }

    /// Run a command inside the sandbox, returning combined stdout.
    ///
    /// A non-zero exit returns an error carrying captured stderr; the
    /// sandbox itself stays alive, the caller decides what to do with it.
    pub async fn execute(
        &self,
        sandbox_id: Uuid,
        command: &[String],
    ) -> Result<String, SandboxError> {
        let container_ref = {
            let registry = self.registry.read().await;
            registry
                .get(&sandbox_id)
                .and_then(|ctx| ctx.container_ref.clone())
                .ok_or(SandboxError::NotFound(sandbox_id))?
        };

        let output = self.runtime.exec(&container_ref, command).await?;

        {
            let mut registry = self.registry.write().await;
            if let Some(ctx) = registry.get_mut(&sandbox_id) {
                ctx.commands_executed += 1;
                if output.exit_code == 0 {
                    ctx.record(
                        "command_executed",
                        command.join(" "),
                        AuditSeverity::Info,
                    );
                } else {
                    // 137 = SIGKILL, typically the kernel enforcing the
                    // memory ceiling.
                    let severity = AuditSeverity::Error;
                    let action = if output.exit_code == 137 {
                        "command_killed"
                    } else {
                        "command_failed"
                    };
                    ctx.record(
                        action,
                        format!("exit={} cmd={}", output.exit_code, command.join(" ")),
                        severity,
                    );
                }
            }
        }

        if output.exit_code != 0 {
            let risk = if output.exit_code == 137 {
                RiskLevel::Medium
            } else {
                RiskLevel::Low
            };
            self.audit
                .log_container_activity(
                    sandbox_id,
                    "command_failed",
                    &format!("exit={}", output.exit_code),
                    risk,
                )
                .await;
            return Err(SandboxError::ExecutionFailed {
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }

        Ok(output.stdout)
    }

    /// Graceful stop then removal. Idempotent; errors are logged, never
    /// returned.
    pub async fn cleanup(&self, sandbox_id: Uuid, reason: &str) {
        self.teardown(sandbox_id, reason, false).await;
    }

    /// Immediate kill and removal, used by timeout and shutdown paths.
    pub async fn force_cleanup(&self, sandbox_id: Uuid, reason: &str) {
        self.teardown(sandbox_id, reason, true).await;
    }

    /// Force-clean every sandbox allocated for the given job.
    pub async fn force_cleanup_for_job(&self, job_id: Uuid, reason: &str) {
        let ids: Vec<Uuid> = {
            let registry = self.registry.read().await;
            registry
                .values()
                .filter(|ctx| ctx.job_id == Some(job_id))
                .map(|ctx| ctx.sandbox_id)
                .collect()
        };
        for sandbox_id in ids {
            self.teardown(sandbox_id, reason, true).await;
        }
    }

    async fn teardown(&self, sandbox_id: Uuid, reason: &str, forced: bool) {
        if let Some(handle) = self.watchdogs.lock().await.remove(&sandbox_id) {
            handle.abort();
        }

        // Exactly-once removal from the live set; later calls are no-ops.
        let Some(mut context) = self.registry.write().await.remove(&sandbox_id) else {
            debug!(sandbox_id = %sandbox_id, "cleanup on already-removed sandbox");
            return;
        };

        if let Some(container_ref) = context.container_ref.clone() {
            if !forced {
                // Final usage snapshot before teardown, best-effort.
                match self.runtime.usage(&container_ref).await {
                    Ok(usage) => context.final_usage = Some(usage),
                    Err(e) => debug!(sandbox_id = %sandbox_id, error = %e, "usage snapshot unavailable"),
                }
                let grace = Duration::from_secs(self.config.grace_period_secs);
                if let Err(e) = self.runtime.stop(&container_ref, grace).await {
                    warn!(sandbox_id = %sandbox_id, error = %e, "graceful stop failed, removing anyway");
                }
            }
            if let Err(e) = self.runtime.remove(&container_ref, true).await {
                match e {
                    RuntimeError::NotFound(_) => {
                        debug!(sandbox_id = %sandbox_id, "container already gone")
                    }
                    other => {
                        warn!(sandbox_id = %sandbox_id, error = %other, "container removal failed")
                    }
                }
            }
        }

        context.finished_at = Some(Utc::now());
        let timeout_kill = forced && reason.contains("timeout");
        let (action, severity, risk) = if timeout_kill {
            ("force_killed", AuditSeverity::Error, RiskLevel::Medium)
        } else if forced {
            ("force_killed", AuditSeverity::Error, RiskLevel::High)
        } else {
            ("removed", AuditSeverity::Info, RiskLevel::Low)
        };
        context.record(action, reason, severity);

        self.audit
            .log_container_activity(sandbox_id, action, reason, risk)
            .await;

        info!(sandbox_id = %sandbox_id, forced, reason, "sandbox removed");
        self.archive_context(context).await;
    }

    async fn archive_context(&self, context: SandboxContext) {
        let mut archive = self.archive.lock().await;
        if archive.len() >= ARCHIVE_CAP {
            archive.pop_front();
        }
        archive.push_back(context);
    }

    /// Background reaper recovering from crashed processes that skipped
    /// normal cleanup: force-cleans any managed container whose recorded
    /// lifetime elapsed past the grace margin, and any registry entry whose
    /// watchdog was lost.
    pub fn spawn_reaper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let interval = Duration::from_millis(manager.config.reaper_interval_ms);
        let grace = Duration::from_millis(manager.config.reaper_grace_ms);

        tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "sandbox reaper started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                // Registry entries past their lifetime (lost watchdogs).
                let expired: Vec<Uuid> = {
                    let registry = manager.registry.read().await;
                    registry
                        .values()
                        .filter(|ctx| ctx.expired(grace))
                        .map(|ctx| ctx.sandbox_id)
                        .collect()
                };
                for sandbox_id in expired {
                    warn!(sandbox_id = %sandbox_id, "reaping expired registry entry");
                    manager
                        .teardown(sandbox_id, "orphan timeout reaped", true)
                        .await;
                }

                // Engine-level orphans from previous process incarnations.
                let managed = match manager.runtime.list_managed().await {
                    Ok(managed) => managed,
                    Err(e) => {
                        warn!(error = %e, "failed to list managed containers");
                        continue;
                    }
                };
                let known: Vec<String> = {
                    let registry = manager.registry.read().await;
                    registry
                        .values()
                        .filter_map(|ctx| ctx.container_ref.clone())
                        .collect()
                };
                for container in managed {
                    if !container.expired(grace) || known.contains(&container.container_ref) {
                        continue;
                    }
                    warn!(container = %container.container_ref, "reaping orphaned container");
                    if let Err(e) = manager.runtime.remove(&container.container_ref, true).await {
                        warn!(container = %container.container_ref, error = %e, "orphan removal failed");
                        continue;
                    }
                    manager
                        .audit
                        .log_container_activity(
                            Uuid::nil(),
                            "orphan_reaped",
                            &format!("container={}", container.container_ref),
                            RiskLevel::Medium,
                        )
                        .await;
                }
            }
            info!("sandbox reaper exiting");
        })
    }

    /// Force-clean all live sandboxes. Used on shutdown.
    pub async fn shutdown(&self) {
        let ids: Vec<Uuid> = self.registry.read().await.keys().copied().collect();
        for sandbox_id in ids {
            self.teardown(sandbox_id, "manager shutdown", true).await;
        }
    }

    pub async fn live_count(&self) -> usize {
        self.registry.read().await.len()
    }

    /// Snapshot of a live sandbox's context.
    pub async fn context(&self, sandbox_id: Uuid) -> Option<SandboxContext> {
        self.registry.read().await.get(&sandbox_id).cloned()
    }

    /// Context of a sandbox that has already been torn down.
    pub async fn archived_context(&self, sandbox_id: Uuid) -> Option<SandboxContext> {
        self.archive
            .lock()
            .await
            .iter()
            .rev()
            .find(|ctx| ctx.sandbox_id == sandbox_id)
            .cloned()
    }
}
