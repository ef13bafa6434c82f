//! Browser driver seam.
//!
//! The orchestrator drives a browser through the [`BrowserLauncher`] /
//! [`BrowserSession`] traits. The production implementation talks to a scan
//! agent living inside the sandbox image: every session call becomes an
//! agent subcommand executed via the sandbox manager, with JSON over stdout
//! as the wire format. Tests substitute scripted sessions.
//!
//! Request-interception policy and the hardened launch flags live here so
//! they are unit-testable without a browser.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::BrowserConfig;
use crate::domain::job::{ScanJob, Viewport};
use crate::domain::page::PageSnapshot;
use crate::domain::result::PageTelemetry;
use crate::infrastructure::sandbox::{SandboxError, SandboxManager};

/// Browser driver errors.
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Navigation returned HTTP status {0}")]
    HttpStatus(u16),

    #[error("Navigation produced no response")]
    MissingResponse,

    #[error("Timed out waiting for selector: {0}")]
    SelectorTimeout(String),

    #[error("Snapshot failed: {0}")]
    SnapshotFailed(String),

    #[error("Screenshot failed: {0}")]
    ScreenshotFailed(String),

    #[error("Telemetry unavailable: {0}")]
    TelemetryFailed(String),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),
}

/// Resource type of an intercepted request, as reported by the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Document,
    Script,
    Stylesheet,
    Image,
    Font,
    Xhr,
    Fetch,
    WebSocket,
    EventSource,
    Media,
    Other,
}

/// Known tracking/analytics domains aborted during scans. They add noise,
/// attack surface and nondeterminism without affecting accessibility.
pub static TRACKING_BLOCKLIST: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "google-analytics.com",
        "googletagmanager.com",
        "doubleclick.net",
        "connect.facebook.net",
        "hotjar.com",
        "segment.io",
        "mixpanel.com",
        "fullstory.com",
        "amplitude.com",
        "clarity.ms",
    ]
    .into_iter()
    .collect()
});

/// Launch flags for the in-sandbox browser: no privilege re-escalation,
/// background networking and telemetry disabled, renderer memory capped.
pub const HARDENED_FLAGS: &[&str] = &[
    "--headless=new",
    "--no-sandbox",
    "--disable-background-networking",
    "--disable-component-update",
    "--disable-sync",
    "--disable-extensions",
    "--disable-default-apps",
    "--disable-translate",
    "--disable-dev-shm-usage",
    "--metrics-recording-only",
    "--mute-audio",
    "--no-first-run",
    "--js-flags=--max-old-space-size=256",
    "--renderer-process-limit=2",
];

/// Request-interception policy: abort websockets/event-streams, opaque
/// data/blob URLs and anything on the tracking blocklist.
pub fn should_block_request(
    url: &str,
    resource_type: ResourceType,
    extra_blocked_domains: &[String],
) -> bool {
    if matches!(resource_type, ResourceType::WebSocket | ResourceType::EventSource) {
        return true;
    }
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("data:")
        || lower.starts_with("blob:")
        || lower.starts_with("ws:")
        || lower.starts_with("wss:")
    {
        return true;
    }
    let host = lower
        .split("://")
        .nth(1)
        .unwrap_or(&lower)
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .split('@')
        .next_back()
        .unwrap_or_default()
        .split(':')
        .next()
        .unwrap_or_default();
    let matches_domain =
        |domain: &str| host == domain || host.ends_with(&format!(".{}", domain));
    TRACKING_BLOCKLIST.iter().any(|d| matches_domain(d))
        || extra_blocked_domains.iter().any(|d| matches_domain(d))
}

/// Per-job browser launch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserLaunchConfig {
    pub viewport: Viewport,
    pub user_agent: String,
    pub navigation_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub selector_timeout_ms: u64,
    pub blocked_domains: Vec<String>,
    pub flags: Vec<String>,
}

impl BrowserLaunchConfig {
    pub fn for_job(job: &ScanJob, config: &BrowserConfig) -> Self {
        Self {
            viewport: job.options.viewport,
            user_agent: job
                .options
                .user_agent
                .clone()
                .unwrap_or_else(|| config.user_agent.clone()),
            navigation_timeout_ms: job.options.timeout_ms.min(config.navigation_timeout_ms),
            settle_delay_ms: config.settle_delay_ms,
            selector_timeout_ms: config.selector_timeout_ms,
            blocked_domains: config.extra_blocked_domains.clone(),
            flags: HARDENED_FLAGS.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// Outcome of a navigation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationOutcome {
    /// HTTP status of the main response; `None` when no response arrived.
    pub status: Option<u16>,
    pub final_url: String,
}

/// One live browser bound to one sandbox for one job.
#[async_trait]
pub trait BrowserSession: Send {
    /// Apply viewport, user agent and the request-interception policy.
    async fn configure(&mut self, config: &BrowserLaunchConfig) -> Result<(), BrowserError>;

    async fn navigate(
        &mut self,
        url: &str,
        timeout: Duration,
    ) -> Result<NavigationOutcome, BrowserError>;

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError>;

    /// Serialise the rendered DOM for rule evaluation.
    async fn snapshot(&mut self) -> Result<PageSnapshot, BrowserError>;

    /// Base64-encoded screenshot; best-effort at the orchestrator level.
    async fn screenshot(&mut self, full_page: bool) -> Result<String, BrowserError>;

    /// Render/memory telemetry; `Ok(None)` when the page exposes none.
    async fn telemetry(&mut self) -> Result<Option<PageTelemetry>, BrowserError>;

    /// Shut the browser down. Infallible by contract; failures are logged.
    async fn close(&mut self);
}

/// Launches one browser per job inside an already-created sandbox.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(
        &self,
        sandbox_id: Uuid,
        config: &BrowserLaunchConfig,
    ) -> Result<Box<dyn BrowserSession>, BrowserError>;
}

// ── In-sandbox agent protocol ────────────────────────────────────────

#[derive(Debug, Serialize)]
struct AgentCommand<'a, T: Serialize> {
    action: &'a str,
    params: T,
}

#[derive(Debug, Deserialize)]
struct AgentResponse {
    success: bool,
    error: Option<String>,
    data: Option<serde_json::Value>,
}

/// Production launcher: drives the scan agent baked into the sandbox image.
pub struct SandboxedBrowserLauncher {
    sandboxes: Arc<SandboxManager>,
    agent_path: String,
    executable: String,
}

impl SandboxedBrowserLauncher {
    pub fn new(sandboxes: Arc<SandboxManager>, config: &BrowserConfig) -> Self {
        Self {
            sandboxes,
            agent_path: config.agent_path.clone(),
            executable: config.executable.clone(),
        }
    }
}

#[async_trait]
impl BrowserLauncher for SandboxedBrowserLauncher {
    async fn launch(
        &self,
        sandbox_id: Uuid,
        config: &BrowserLaunchConfig,
    ) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let mut session = SandboxedBrowserSession {
            sandboxes: Arc::clone(&self.sandboxes),
            sandbox_id,
            agent_path: self.agent_path.clone(),
        };
        let params = serde_json::json!({
            "executable": self.executable,
            "flags": config.flags,
        });
        session
            .call("launch", params)
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;
        Ok(Box::new(session))
    }
}

struct SandboxedBrowserSession {
    sandboxes: Arc<SandboxManager>,
    sandbox_id: Uuid,
    agent_path: String,
}

impl SandboxedBrowserSession {
    async fn call(
        &mut self,
        action: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, BrowserError> {
        let command = AgentCommand { action, params };
        let payload = serde_json::to_string(&command)
            .map_err(|e| BrowserError::NavigationFailed(format!("encode failure: {}", e)))?;
        let argv = vec![self.agent_path.clone(), payload];
        let stdout = self.sandboxes.execute(self.sandbox_id, &argv).await?;

        let response: AgentResponse = serde_json::from_str(&stdout).map_err(|e| {
            BrowserError::NavigationFailed(format!("invalid agent output: {}", e))
        })?;
        if !response.success {
            return Err(BrowserError::NavigationFailed(
                response.error.unwrap_or_else(|| "unknown agent error".to_string()),
            ));
        }
        Ok(response.data.unwrap_or(serde_json::Value::Null))
    }
}

#[async_trait]
impl BrowserSession for SandboxedBrowserSession {
    async fn configure(&mut self, config: &BrowserLaunchConfig) -> Result<(), BrowserError> {
        let params = serde_json::json!({
            "viewport": config.viewport,
            "user_agent": config.user_agent,
            "blocked_domains": config.blocked_domains,
        });
        self.call("configure", params).await?;
        Ok(())
    }

    async fn navigate(
        &mut self,
        url: &str,
        timeout: Duration,
    ) -> Result<NavigationOutcome, BrowserError> {
        let params = serde_json::json!({
            "url": url,
            "timeout_ms": timeout.as_millis() as u64,
        });
        let data = self.call("navigate", params).await?;
        serde_json::from_value(data)
            .map_err(|e| BrowserError::NavigationFailed(format!("invalid navigation data: {}", e)))
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let params = serde_json::json!({
            "selector": selector,
            "timeout_ms": timeout.as_millis() as u64,
        });
        self.call("wait_for_selector", params)
            .await
            .map_err(|_| BrowserError::SelectorTimeout(selector.to_string()))?;
        Ok(())
    }

    async fn snapshot(&mut self) -> Result<PageSnapshot, BrowserError> {
        let data = self.call("snapshot", serde_json::Value::Null).await?;
        serde_json::from_value(data)
            .map_err(|e| BrowserError::SnapshotFailed(format!("invalid snapshot: {}", e)))
    }

    async fn screenshot(&mut self, full_page: bool) -> Result<String, BrowserError> {
        let params = serde_json::json!({ "full_page": full_page });
        let data = self
            .call("screenshot", params)
            .await
            .map_err(|e| BrowserError::ScreenshotFailed(e.to_string()))?;
        data.as_str()
            .map(str::to_string)
            .ok_or_else(|| BrowserError::ScreenshotFailed("missing image data".to_string()))
    }

    async fn telemetry(&mut self) -> Result<Option<PageTelemetry>, BrowserError> {
        let data = self
            .call("telemetry", serde_json::Value::Null)
            .await
            .map_err(|e| BrowserError::TelemetryFailed(e.to_string()))?;
        if data.is_null() {
            return Ok(None);
        }
        match serde_json::from_value(data) {
            Ok(telemetry) => Ok(Some(telemetry)),
            Err(e) => {
                debug!(error = %e, "unparseable telemetry, treating as absent");
                Ok(None)
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.call("close", serde_json::Value::Null).await {
            warn!(sandbox_id = %self.sandbox_id, error = %e, "browser close failed");
        }
    }
}
