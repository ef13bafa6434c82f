//! Page fixtures and a scripted browser double.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use axscan::domain::page::{ElementSpec, PageSnapshot};
use axscan::domain::result::PageTelemetry;
use axscan::infrastructure::browser::{
    BrowserError, BrowserLaunchConfig, BrowserLauncher, BrowserSession, NavigationOutcome,
};

/// A page with no findings: main landmark, proper heading chain, labeled
/// form control, alt-texted image.
pub fn clean_page() -> PageSnapshot {
    let mut b = PageSnapshot::builder("https://example.com/page", "Clean page");
    let body = b.push(ElementSpec::new("body"));
    let main = b.push_child(body, ElementSpec::new("main"));
    b.push_child(main, ElementSpec::new("h1").text("Welcome"));
    b.push_child(main, ElementSpec::new("h2").text("Section"));
    b.push_child(
        main,
        ElementSpec::new("img").attr("src", "hero.jpg").attr("alt", "A hero image"),
    );
    b.push_child(main, ElementSpec::new("label").attr("for", "q").text("Search"));
    b.push_child(main, ElementSpec::new("input").attr("id", "q"));
    b.build()
}

/// A page with exactly three findings: an image without alt text, a heading
/// jump from h1 to h3, and an unlabeled email input.
pub fn page_with_three_issues() -> PageSnapshot {
    let mut b = PageSnapshot::builder("https://example.com/broken", "Broken page");
    let body = b.push(ElementSpec::new("body"));
    let main = b.push_child(body, ElementSpec::new("main"));
    b.push_child(main, ElementSpec::new("h1").text("Welcome"));
    b.push_child(main, ElementSpec::new("h3").text("Details"));
    b.push_child(main, ElementSpec::new("img").attr("src", "chart.png"));
    b.push_child(
        main,
        ElementSpec::new("input").attr("type", "email").attr("name", "email"),
    );
    b.build()
}

/// Scripted per-launch behaviour for [`FakeBrowserLauncher`].
#[derive(Debug, Clone)]
pub enum BrowserScript {
    /// Navigation succeeds with HTTP 200 and this page is served.
    Success(PageSnapshot),
    /// Navigation yields the given HTTP status.
    HttpStatus(u16),
    /// Navigation completes without any response.
    NoResponse,
    /// Launch itself fails.
    LaunchFailure,
    /// Navigation never returns within any realistic deadline.
    Hang,
    /// Page serves fine but every screenshot call fails.
    ScreenshotFailure(PageSnapshot),
}

/// Browser double: one scripted behaviour per launch, repeating the last
/// behaviour once the script is drained.
pub struct FakeBrowserLauncher {
    script: Mutex<VecDeque<BrowserScript>>,
    fallback: BrowserScript,
    launches: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl FakeBrowserLauncher {
    pub fn serving(page: PageSnapshot) -> Self {
        Self::scripted(Vec::new(), BrowserScript::Success(page))
    }

    pub fn scripted(script: Vec<BrowserScript>, fallback: BrowserScript) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            launches: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// How many sessions were closed; equal to successful launches when the
    /// orchestrator releases every session.
    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserLauncher for FakeBrowserLauncher {
    async fn launch(
        &self,
        _sandbox_id: Uuid,
        _config: &BrowserLaunchConfig,
    ) -> Result<Box<dyn BrowserSession>, BrowserError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let script = self
            .script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        if matches!(script, BrowserScript::LaunchFailure) {
            return Err(BrowserError::LaunchFailed("scripted launch failure".to_string()));
        }
        Ok(Box::new(FakeSession {
            script,
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct FakeSession {
    script: BrowserScript,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn configure(&mut self, _config: &BrowserLaunchConfig) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn navigate(
        &mut self,
        url: &str,
        _timeout: Duration,
    ) -> Result<NavigationOutcome, BrowserError> {
        match &self.script {
            BrowserScript::Success(_) | BrowserScript::ScreenshotFailure(_) => {
                Ok(NavigationOutcome {
                    status: Some(200),
                    final_url: url.to_string(),
                })
            }
            BrowserScript::HttpStatus(status) => Ok(NavigationOutcome {
                status: Some(*status),
                final_url: url.to_string(),
            }),
            BrowserScript::NoResponse => Ok(NavigationOutcome {
                status: None,
                final_url: url.to_string(),
            }),
            BrowserScript::Hang => {
                tokio::time::sleep(Duration::from_secs(86_400)).await;
                Err(BrowserError::NavigationFailed("woke from hang".to_string()))
            }
            BrowserScript::LaunchFailure => unreachable!("launch failures never yield a session"),
        }
    }

    async fn wait_for_selector(
        &mut self,
        _selector: &str,
        _timeout: Duration,
    ) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn snapshot(&mut self) -> Result<PageSnapshot, BrowserError> {
        match &self.script {
            BrowserScript::Success(page) | BrowserScript::ScreenshotFailure(page) => {
                Ok(page.clone())
            }
            _ => Err(BrowserError::SnapshotFailed("no page scripted".to_string())),
        }
    }

    async fn screenshot(&mut self, _full_page: bool) -> Result<String, BrowserError> {
        match &self.script {
            BrowserScript::ScreenshotFailure(_) => {
                Err(BrowserError::ScreenshotFailed("scripted capture failure".to_string()))
            }
            _ => Ok("aVZCT1J3MEtHZ28=".to_string()),
        }
    }

    async fn telemetry(&mut self) -> Result<Option<PageTelemetry>, BrowserError> {
        Ok(Some(PageTelemetry {
            render_time_ms: 120,
            memory_usage_bytes: 32 * 1024 * 1024,
        }))
    }

    async fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
