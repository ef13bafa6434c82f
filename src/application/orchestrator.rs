//! Per-job scan orchestration.
//!
//! One [`ScanOrchestrator::run`] call owns the whole lifecycle of a single
//! attempt: sandbox allocation, browser launch, navigation, rule analysis,
//! best-effort artifact capture and guaranteed sandbox release. It never
//! returns an error past its boundary; every failure becomes a terminal
//! [`ScanResult`] so the scheduler's accounting stays uniform.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::application::rules::{RuleEngine, RuleOptions};
use crate::config::{BrowserConfig, SandboxConfig};
use crate::domain::job::ScanJob;
use crate::domain::result::{ScanMetrics, ScanResult, Screenshots};
use crate::domain::sandbox::SandboxSpec;
use crate::infrastructure::audit::AuditLog;
use crate::infrastructure::browser::{
    BrowserError, BrowserLaunchConfig, BrowserLauncher, BrowserSession,
};
use crate::infrastructure::sandbox::{SandboxManager, spec_from_config};

/// Margin added to the job's page budget when sizing the sandbox watchdog,
/// covering container setup and teardown around the scan itself.
const SANDBOX_TIMEOUT_MARGIN_MS: u64 = 60_000;

/// Executes one scan job end to end.
pub struct ScanOrchestrator {
    sandboxes: Arc<SandboxManager>,
    browser: Arc<dyn BrowserLauncher>,
    rules: Arc<RuleEngine>,
    audit: Arc<dyn AuditLog>,
    browser_config: BrowserConfig,
    sandbox_config: SandboxConfig,
}

impl ScanOrchestrator {
    pub fn new(
        sandboxes: Arc<SandboxManager>,
        browser: Arc<dyn BrowserLauncher>,
        rules: Arc<RuleEngine>,
        audit: Arc<dyn AuditLog>,
        browser_config: BrowserConfig,
        sandbox_config: SandboxConfig,
    ) -> Self {
        Self {
            sandboxes,
            browser,
            rules,
            audit,
            browser_config,
            sandbox_config,
        }
    }

    /// Sandbox spec for one job: the configured baseline, with the watchdog
    /// never shorter than the job's own page budget plus margin.
    fn spec_for_job(&self, job: &ScanJob) -> SandboxSpec {
        let mut spec = spec_from_config(&self.sandbox_config);
        spec.timeout_ms = spec
            .timeout_ms
            .max(job.options.timeout_ms + SANDBOX_TIMEOUT_MARGIN_MS);
        spec
    }

    /// Run one attempt to a terminal result.
    pub async fn run(&self, job: &ScanJob) -> ScanResult {
        let started = Instant::now();
        info!(job_id = %job.id, url = %job.url, attempt = job.metadata.retry_count + 1, "scan starting");
        self.audit
            .log_scan_activity(
                &job.user_id,
                job.id,
                "scan_started",
                &format!("url={}", job.url),
                "pending",
            )
            .await;

        let spec = self.spec_for_job(job);
        let sandbox_id = match self.sandboxes.create_sandbox(spec, Some(job.id)).await {
            Ok(sandbox_id) => sandbox_id,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "sandbox allocation failed");
                return self
                    .finish(job, ScanResult::failed(job.id, format!("sandbox: {}", e)))
                    .await;
            }
        };

        let outcome = self.scan_in_sandbox(job, sandbox_id, started).await;

        // The sandbox is released on every path, including panicky rules and
        // hung agents killed by the per-command plumbing above us.
        self.sandboxes.cleanup(sandbox_id, "scan finished").await;

        let result = match outcome {
            Ok(result) => result,
            Err(e) => ScanResult::failed(job.id, e.to_string()),
        };
        self.finish(job, result).await
    }

    async fn finish(&self, job: &ScanJob, result: ScanResult) -> ScanResult {
        let (action, outcome) = match result.error {
            None => ("scan_completed", "success"),
            Some(_) => ("scan_failed", "failure"),
        };
        self.audit
            .log_scan_activity(
                &job.user_id,
                job.id,
                action,
                &format!("issues={}", result.issues.len()),
                outcome,
            )
            .await;
        info!(
            job_id = %job.id,
            status = %result.status,
            issues = result.issues.len(),
            "scan finished"
        );
        result
    }

    async fn scan_in_sandbox(
        &self,
        job: &ScanJob,
        sandbox_id: uuid::Uuid,
        started: Instant,
    ) -> Result<ScanResult, BrowserError> {
        let launch = BrowserLaunchConfig::for_job(job, &self.browser_config);
        let mut session = self.browser.launch(sandbox_id, &launch).await?;
        let result = self.drive(job, &launch, session.as_mut(), started).await;
        session.close().await;
        result
    }

    async fn drive(
        &self,
        job: &ScanJob,
        launch: &BrowserLaunchConfig,
        session: &mut dyn BrowserSession,
        started: Instant,
    ) -> Result<ScanResult, BrowserError> {
        session.configure(launch).await?;

        let navigation = session
            .navigate(&job.url, Duration::from_millis(launch.navigation_timeout_ms))
            .await?;
        match navigation.status {
            None => return Err(BrowserError::MissingResponse),
            Some(status) if status >= 400 => return Err(BrowserError::HttpStatus(status)),
            Some(_) => {}
        }

        if let Some(selector) = &job.options.wait_for_selector {
            session
                .wait_for_selector(selector, Duration::from_millis(launch.selector_timeout_ms))
                .await?;
        }
        if launch.settle_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(launch.settle_delay_ms)).await;
        }

        let page = session.snapshot().await?;
        let analysis = self.rules.run_all(
            &page,
            &job.options.include_rules,
            &job.options.exclude_rules,
            &RuleOptions {
                include_hidden: job.options.include_hidden,
            },
        );
        if analysis.timings.iter().any(|t| t.failed) {
            warn!(job_id = %job.id, url = %page.url, "one or more rules failed during analysis");
        }

        let screenshots = self.capture_screenshots(job, session).await;
        let telemetry = match session.telemetry().await {
            Ok(telemetry) => telemetry,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "telemetry unavailable");
                None
            }
        };

        let metrics = ScanMetrics::compute(
            &analysis.issues,
            page.elements.len(),
            started.elapsed(),
            telemetry,
        );
        Ok(ScanResult::completed(
            job.id,
            analysis.issues,
            metrics,
            screenshots,
        ))
    }

    /// Screenshots are evidence, not findings: a capture failure downgrades
    /// the artifact, never the scan.
    async fn capture_screenshots(
        &self,
        job: &ScanJob,
        session: &mut dyn BrowserSession,
    ) -> Option<Screenshots> {
        let full_page = match session.screenshot(true).await {
            Ok(image) => Some(image),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "full-page screenshot failed");
                None
            }
        };
        let viewport = match session.screenshot(false).await {
            Ok(image) => Some(image),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "viewport screenshot failed");
                None
            }
        };
        if full_page.is_none() && viewport.is_none() {
            None
        } else {
            Some(Screenshots { full_page, viewport })
        }
    }
}
