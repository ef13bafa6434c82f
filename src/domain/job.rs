//! Scan jobs and their enqueue-time validation.
//!
//! A [`ScanJob`] is immutable once enqueued; the only sanctioned mutation is
//! [`ScanJob::retry_copy`], which produces a fresh attempt with an
//! incremented retry counter. Malformed jobs are rejected at the queue
//! boundary by [`ScanJob::validate`] rather than deep in execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Priority tier biasing dequeue order ahead of FIFO timestamp ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    High,
    Normal,
    Low,
}

impl JobPriority {
    /// Rank used for priority scoring; lower ranks dequeue sooner.
    pub fn rank(&self) -> i64 {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Normal => write!(f, "normal"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// Where the job was submitted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSource {
    Api,
    Dashboard,
    Ci,
    Scheduled,
}

/// Browser viewport for the scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
        }
    }
}

/// Per-job scan options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    pub viewport: Viewport,
    /// Navigation/scan timeout budget for the page itself (milliseconds).
    pub timeout_ms: u64,
    /// When non-empty, restricts the rule catalog to these rule ids.
    pub include_rules: Vec<String>,
    /// Rule ids removed from the active set.
    pub exclude_rules: Vec<String>,
    /// Whether rules also evaluate elements hidden via CSS.
    pub include_hidden: bool,
    /// Optional selector to await after navigation before analysis.
    pub wait_for_selector: Option<String>,
    /// Optional user-agent override.
    pub user_agent: Option<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            timeout_ms: 30_000,
            include_rules: Vec::new(),
            exclude_rules: Vec::new(),
            include_hidden: false,
            wait_for_selector: None,
            user_agent: None,
        }
    }
}

/// Queue-level metadata travelling with the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanMetadata {
    pub source: JobSource,
    pub priority: JobPriority,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl Default for ScanMetadata {
    fn default() -> Self {
        Self {
            source: JobSource::Api,
            priority: JobPriority::Normal,
            retry_count: 0,
            max_retries: 3,
        }
    }
}

/// A single accessibility scan request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: Uuid,
    pub url: String,
    pub user_id: String,
    pub options: ScanOptions,
    pub metadata: ScanMetadata,
    pub created_at: DateTime<Utc>,
}

impl ScanJob {
    pub fn new(
        url: impl Into<String>,
        user_id: impl Into<String>,
        options: ScanOptions,
        metadata: ScanMetadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            user_id: user_id.into(),
            options,
            metadata,
            created_at: Utc::now(),
        }
    }

    /// Copy of this job for the next attempt. Keeps the job identity so the
    /// eventual terminal result is attributed to the original submission.
    pub fn retry_copy(&self) -> Self {
        let mut copy = self.clone();
        copy.metadata.retry_count += 1;
        copy
    }

    /// Whether another retry attempt is allowed after a failure.
    pub fn retries_remaining(&self) -> bool {
        self.metadata.retry_count < self.metadata.max_retries
    }

    /// Validate the job at the enqueue boundary.
    pub fn validate(&self) -> Result<(), JobValidationError> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(JobValidationError::InvalidUrl(self.url.clone()));
        }
        let rest = self
            .url
            .splitn(2, "://")
            .nth(1)
            .unwrap_or_default();
        if rest.is_empty() || rest.starts_with('/') {
            return Err(JobValidationError::InvalidUrl(self.url.clone()));
        }
        if self.user_id.trim().is_empty() {
            return Err(JobValidationError::MissingUser);
        }
        let viewport = self.options.viewport;
        if !(1..=10_000).contains(&viewport.width) || !(1..=10_000).contains(&viewport.height) {
            return Err(JobValidationError::InvalidViewport {
                width: viewport.width,
                height: viewport.height,
            });
        }
        if !(1_000..=600_000).contains(&self.options.timeout_ms) {
            return Err(JobValidationError::InvalidTimeout(self.options.timeout_ms));
        }
        if self.metadata.max_retries > 10 {
            return Err(JobValidationError::RetryBudgetTooLarge(
                self.metadata.max_retries,
            ));
        }
        if self.metadata.retry_count > self.metadata.max_retries {
            return Err(JobValidationError::RetryCountExceedsBudget {
                retry_count: self.metadata.retry_count,
                max_retries: self.metadata.max_retries,
            });
        }
        Ok(())
    }
}

/// Rejection reasons at the enqueue boundary.
#[derive(Debug, thiserror::Error)]
pub enum JobValidationError {
    #[error("Invalid target URL: {0}")]
    InvalidUrl(String),

    #[error("Job has no owning user")]
    MissingUser,

    #[error("Invalid viewport {width}x{height}")]
    InvalidViewport { width: u32, height: u32 },

    #[error("Invalid scan timeout: {0}ms")]
    InvalidTimeout(u64),

    #[error("Retry budget too large: {0}")]
    RetryBudgetTooLarge(u32),

    #[error("Retry count {retry_count} exceeds budget {max_retries}")]
    RetryCountExceedsBudget { retry_count: u32, max_retries: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_for(url: &str) -> ScanJob {
        ScanJob::new(url, "user-1", ScanOptions::default(), ScanMetadata::default())
    }

    #[test]
    fn accepts_wellformed_job() {
        assert!(job_for("https://example.com/page").validate().is_ok());
    }

    #[test]
    fn rejects_non_http_url() {
        assert!(job_for("ftp://example.com").validate().is_err());
        assert!(job_for("javascript:alert(1)").validate().is_err());
        assert!(job_for("https://").validate().is_err());
    }

    #[test]
    fn rejects_missing_user() {
        let mut job = job_for("https://example.com");
        job.user_id = "  ".to_string();
        assert!(matches!(
            job.validate(),
            Err(JobValidationError::MissingUser)
        ));
    }

    #[test]
    fn rejects_degenerate_viewport() {
        let mut job = job_for("https://example.com");
        job.options.viewport = Viewport {
            width: 0,
            height: 800,
        };
        assert!(job.validate().is_err());
    }

    #[test]
    fn retry_copy_increments_counter_and_keeps_identity() {
        let job = job_for("https://example.com");
        let retry = job.retry_copy();
        assert_eq!(retry.id, job.id);
        assert_eq!(retry.metadata.retry_count, job.metadata.retry_count + 1);
    }

    #[test]
    fn priority_ranks_are_ordered() {
        assert!(JobPriority::High.rank() < JobPriority::Normal.rank());
        assert!(JobPriority::Normal.rank() < JobPriority::Low.rank());
    }
}
