//! Audit-log collaborator seam.
//!
//! Audit calls are best-effort: implementations must never block or fail the
//! core path. Failures are swallowed into warn-level logs inside the
//! implementation, never surfaced to callers.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::domain::sandbox::RiskLevel;

/// Structured audit collaborator.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Record a scan lifecycle event attributed to a user and job.
    async fn log_scan_activity(
        &self,
        user_id: &str,
        job_id: Uuid,
        action: &str,
        details: &str,
        outcome: &str,
    );

    /// Record a sandbox lifecycle event with a derived risk level.
    async fn log_container_activity(
        &self,
        sandbox_id: Uuid,
        action: &str,
        details: &str,
        risk: RiskLevel,
    );
}

/// Audit sink that emits structured tracing events. The default production
/// collaborator until a durable audit store is wired in.
#[derive(Debug, Default)]
pub struct TracingAuditLog;

#[async_trait]
impl AuditLog for TracingAuditLog {
    async fn log_scan_activity(
        &self,
        user_id: &str,
        job_id: Uuid,
        action: &str,
        details: &str,
        outcome: &str,
    ) {
        info!(
            target: "axscan::audit",
            user_id,
            job_id = %job_id,
            action,
            details,
            outcome,
            "scan activity"
        );
    }

    async fn log_container_activity(
        &self,
        sandbox_id: Uuid,
        action: &str,
        details: &str,
        risk: RiskLevel,
    ) {
        info!(
            target: "axscan::audit",
            sandbox_id = %sandbox_id,
            action,
            details,
            risk = %risk,
            "container activity"
        );
    }
}

/// One captured scan-activity call.
#[derive(Debug, Clone)]
pub struct ScanActivityRecord {
    pub user_id: String,
    pub job_id: Uuid,
    pub action: String,
    pub details: String,
    pub outcome: String,
}

/// One captured container-activity call.
#[derive(Debug, Clone)]
pub struct ContainerActivityRecord {
    pub sandbox_id: Uuid,
    pub action: String,
    pub details: String,
    pub risk: RiskLevel,
}

/// In-memory audit sink for tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingAuditLog {
    scan: Mutex<Vec<ScanActivityRecord>>,
    container: Mutex<Vec<ContainerActivityRecord>>,
}

impl RecordingAuditLog {
    pub fn scan_records(&self) -> Vec<ScanActivityRecord> {
        self.scan.lock().expect("audit lock poisoned").clone()
    }

    pub fn container_records(&self) -> Vec<ContainerActivityRecord> {
        self.container.lock().expect("audit lock poisoned").clone()
    }
}

#[async_trait]
impl AuditLog for RecordingAuditLog {
    async fn log_scan_activity(
        &self,
        user_id: &str,
        job_id: Uuid,
        action: &str,
        details: &str,
        outcome: &str,
    ) {
        self.scan.lock().expect("audit lock poisoned").push(ScanActivityRecord {
            user_id: user_id.to_string(),
            job_id,
            action: action.to_string(),
            details: details.to_string(),
            outcome: outcome.to_string(),
        });
    }

    async fn log_container_activity(
        &self,
        sandbox_id: Uuid,
        action: &str,
        details: &str,
        risk: RiskLevel,
    ) {
        self.container
            .lock()
            .expect("audit lock poisoned")
            .push(ContainerActivityRecord {
                sandbox_id,
                action: action.to_string(),
                details: details.to_string(),
                risk,
            });
    }
}
