//! Sandbox value objects: specs, per-sandbox mutable context and the
//! append-only audit trail.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Network posture of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkMode {
    /// No network interface at all.
    Disabled,
    /// Attached to an isolated virtual network with egress only.
    Isolated,
}

/// Severity of an audit entry, derived from the action kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Info,
    Warning,
    Error,
}

/// Risk level attached to audit-collaborator calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Append-only record of one sandbox state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub details: String,
    pub severity: AuditSeverity,
}

impl AuditEntry {
    pub fn new(action: impl Into<String>, details: impl Into<String>, severity: AuditSeverity) -> Self {
        Self {
            timestamp: Utc::now(),
            action: action.into(),
            details: details.into(),
            severity,
        }
    }
}

/// Final resource snapshot captured before teardown, when available.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub pids: u32,
}

/// Immutable description of the environment to create.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSpec {
    pub image: String,
    pub memory_bytes: u64,
    pub cpu_quota: f64,
    pub pids_limit: u32,
    pub network: NetworkMode,
    /// Virtual network to join when `network` is [`NetworkMode::Isolated`].
    pub isolated_network: String,
    pub tmpfs_bytes: u64,
    /// `host_path:container_path` read-only bind mounts.
    pub readonly_mounts: Vec<(String, String)>,
    pub env: BTreeMap<String, String>,
    pub run_as_user: String,
    pub cap_add: Vec<String>,
    /// Absolute wall-clock lifetime; the manager force-kills past this.
    pub timeout_ms: u64,
}

impl SandboxSpec {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Mutable per-sandbox state, owned exclusively by the sandbox manager for
/// the sandbox's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxContext {
    pub sandbox_id: Uuid,
    /// Job this sandbox was allocated for, when any.
    pub job_id: Option<Uuid>,
    pub spec: SandboxSpec,
    /// Runtime handle (container id) once created.
    pub container_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub commands_executed: u32,
    pub network_events: u32,
    pub audit_trail: Vec<AuditEntry>,
    pub final_usage: Option<ResourceUsage>,
}

impl SandboxContext {
    pub fn new(sandbox_id: Uuid, job_id: Option<Uuid>, spec: SandboxSpec) -> Self {
        Self {
            sandbox_id,
            job_id,
            spec,
            container_ref: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            commands_executed: 0,
            network_events: 0,
            audit_trail: Vec::new(),
            final_usage: None,
        }
    }

    /// Append an audit entry. Entries are never mutated or removed.
    pub fn record(
        &mut self,
        action: impl Into<String>,
        details: impl Into<String>,
        severity: AuditSeverity,
    ) {
        self.audit_trail.push(AuditEntry::new(action, details, severity));
    }

    /// Whether the wall-clock lifetime has elapsed.
    pub fn expired(&self, grace: Duration) -> bool {
        let deadline = self.created_at
            + chrono::Duration::from_std(self.spec.timeout() + grace)
                .unwrap_or_else(|_| chrono::Duration::seconds(i64::MAX / 1_000));
        Utc::now() > deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(timeout_ms: u64) -> SandboxSpec {
        SandboxSpec {
            image: "axscan/browser:latest".to_string(),
            memory_bytes: 256 * 1024 * 1024,
            cpu_quota: 1.0,
            pids_limit: 64,
            network: NetworkMode::Disabled,
            isolated_network: String::new(),
            tmpfs_bytes: 16 * 1024 * 1024,
            readonly_mounts: Vec::new(),
            env: BTreeMap::new(),
            run_as_user: "1000:1000".to_string(),
            cap_add: Vec::new(),
            timeout_ms,
        }
    }

    #[test]
    fn audit_trail_is_append_only_ordered() {
        let mut ctx = SandboxContext::new(Uuid::new_v4(), None, spec(60_000));
        ctx.record("created", "image pulled", AuditSeverity::Info);
        ctx.record("force_killed", "timeout", AuditSeverity::Error);
        assert_eq!(ctx.audit_trail.len(), 2);
        assert!(ctx.audit_trail[0].timestamp <= ctx.audit_trail[1].timestamp);
        assert_eq!(ctx.audit_trail[1].severity, AuditSeverity::Error);
    }

    #[test]
    fn expiry_accounts_for_grace() {
        let mut ctx = SandboxContext::new(Uuid::new_v4(), None, spec(1));
        ctx.created_at = Utc::now() - chrono::Duration::seconds(10);
        assert!(ctx.expired(Duration::from_secs(1)));

        let fresh = SandboxContext::new(Uuid::new_v4(), None, spec(60_000));
        assert!(!fresh.expired(Duration::from_secs(1)));
    }
}
