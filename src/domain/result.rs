//! Terminal scan results and metrics.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::issue::{AccessibilityIssue, IssueType, Severity};

/// Terminal status of a scan attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Completed,
    Failed,
    Timeout,
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Render/memory telemetry reported by the browser, when available.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PageTelemetry {
    pub render_time_ms: u64,
    pub memory_usage_bytes: u64,
}

/// Aggregate metrics for one scan attempt. Zeroed when telemetry or the
/// scan itself was unavailable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanMetrics {
    pub element_count: usize,
    pub issues_by_severity: BTreeMap<Severity, usize>,
    pub issues_by_type: BTreeMap<IssueType, usize>,
    pub scan_duration_ms: u64,
    pub render_time_ms: u64,
    pub memory_usage_bytes: u64,
}

impl ScanMetrics {
    pub fn compute(
        issues: &[AccessibilityIssue],
        element_count: usize,
        scan_duration: Duration,
        telemetry: Option<PageTelemetry>,
    ) -> Self {
        let mut by_severity = BTreeMap::new();
        let mut by_type = BTreeMap::new();
        for issue in issues {
            *by_severity.entry(issue.severity).or_insert(0) += 1;
            *by_type.entry(issue.issue_type).or_insert(0) += 1;
        }
        let telemetry = telemetry.unwrap_or_default();
        Self {
            element_count,
            issues_by_severity: by_severity,
            issues_by_type: by_type,
            scan_duration_ms: scan_duration.as_millis() as u64,
            render_time_ms: telemetry.render_time_ms,
            memory_usage_bytes: telemetry.memory_usage_bytes,
        }
    }
}

/// Screenshots captured best-effort after analysis. A `None` field means
/// capture was skipped or crashed; the scan itself is unaffected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Screenshots {
    /// Base64-encoded full-page capture.
    pub full_page: Option<String>,
    /// Base64-encoded viewport capture.
    pub viewport: Option<String>,
}

/// Terminal outcome of one job lifecycle. Created exactly once per attempt
/// that reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub job_id: Uuid,
    pub status: ScanStatus,
    pub issues: Vec<AccessibilityIssue>,
    pub metrics: ScanMetrics,
    pub screenshots: Option<Screenshots>,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl ScanResult {
    pub fn completed(
        job_id: Uuid,
        issues: Vec<AccessibilityIssue>,
        metrics: ScanMetrics,
        screenshots: Option<Screenshots>,
    ) -> Self {
        Self {
            job_id,
            status: ScanStatus::Completed,
            issues,
            metrics,
            screenshots,
            error: None,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(job_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            job_id,
            status: ScanStatus::Failed,
            issues: Vec::new(),
            metrics: ScanMetrics::default(),
            screenshots: None,
            error: Some(error.into()),
            completed_at: Utc::now(),
        }
    }

    pub fn timeout(job_id: Uuid, deadline: Duration) -> Self {
        Self {
            job_id,
            status: ScanStatus::Timeout,
            issues: Vec::new(),
            metrics: ScanMetrics::default(),
            screenshots: None,
            error: Some(format!(
                "processing deadline of {}ms exceeded",
                deadline.as_millis()
            )),
            completed_at: Utc::now(),
        }
    }
}
