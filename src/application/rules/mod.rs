//! WCAG rule engine.
//!
//! Rules are independent, registered once at construction and stateless
//! across invocations. [`RuleEngine::run_all`] resolves the active set from
//! optional include/exclude lists, isolates per-rule panics (a bad rule
//! contributes zero issues, the scan continues), measures per-rule timing
//! and deduplicates results by `(issue_type, selector)` keeping the first
//! occurrence. Output is deterministic for a given page snapshot.

mod aria;
mod contrast;
mod focus;
mod forms;
mod headings;
mod images;
mod landmarks;

pub use aria::AriaLabelsRule;
pub use contrast::ColorContrastRule;
pub use focus::{FocusVisibilityRule, KeyboardReachabilityRule};
pub use forms::FormLabelsRule;
pub use headings::HeadingStructureRule;
pub use images::MissingAltTextRule;
pub use landmarks::LandmarksRule;

use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::domain::issue::{
    AccessibilityIssue, Fix, IssueContext, IssueType, MAX_PARENT_CHAIN, Severity,
};
use crate::domain::page::PageSnapshot;

/// Per-run options affecting rule evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleOptions {
    /// Also evaluate elements hidden via CSS.
    pub include_hidden: bool,
}

/// One accessibility rule: a named, versioned unit of page analysis.
pub trait Rule: Send + Sync {
    /// Stable rule id used in include/exclude lists.
    fn id(&self) -> &'static str;

    fn issue_type(&self) -> IssueType;

    /// Target WCAG success criterion, e.g. `1.1.1`.
    fn wcag(&self) -> &'static str;

    fn default_severity(&self) -> Severity;

    /// Evaluate the rule against a page snapshot.
    fn check(&self, page: &PageSnapshot, options: &RuleOptions) -> Vec<AccessibilityIssue>;
}

/// Diagnostics for one rule execution.
#[derive(Debug, Clone)]
pub struct RuleTiming {
    pub rule_id: &'static str,
    pub duration: Duration,
    pub issue_count: usize,
    pub failed: bool,
}

/// Result of a full engine run.
#[derive(Debug, Clone, Default)]
pub struct RuleRunOutcome {
    pub issues: Vec<AccessibilityIssue>,
    pub timings: Vec<RuleTiming>,
}

/// The rule engine with its registered catalog.
pub struct RuleEngine {
    rules: Vec<Arc<dyn Rule>>,
}

impl RuleEngine {
    pub fn new(rules: Vec<Arc<dyn Rule>>) -> Self {
        Self { rules }
    }

    /// Engine with the built-in representative catalog.
    pub fn with_default_catalog() -> Self {
        Self::new(vec![
            Arc::new(MissingAltTextRule),
            Arc::new(ColorContrastRule),
            Arc::new(HeadingStructureRule),
            Arc::new(FormLabelsRule),
            Arc::new(AriaLabelsRule),
            Arc::new(FocusVisibilityRule),
            Arc::new(KeyboardReachabilityRule),
            Arc::new(LandmarksRule),
        ])
    }

    pub fn rule_ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.id()).collect()
    }

    /// Run the active rule set against a page.
    ///
    /// A non-empty `include` restricts the catalog to those ids; `exclude`
    /// then removes ids. Both compose.
    pub fn run_all(
        &self,
        page: &PageSnapshot,
        include: &[String],
        exclude: &[String],
        options: &RuleOptions,
    ) -> RuleRunOutcome {
        let active: Vec<&Arc<dyn Rule>> = self
            .rules
            .iter()
            .filter(|rule| include.is_empty() || include.iter().any(|id| id == rule.id()))
            .filter(|rule| !exclude.iter().any(|id| id == rule.id()))
            .collect();

        let mut outcome = RuleRunOutcome::default();
        for rule in active {
            let start = Instant::now();
            let result = catch_unwind(AssertUnwindSafe(|| rule.check(page, options)));
            let duration = start.elapsed();
            match result {
                Ok(issues) => {
                    debug!(
                        rule = rule.id(),
                        issues = issues.len(),
                        duration_us = duration.as_micros() as u64,
                        "rule executed"
                    );
                    outcome.timings.push(RuleTiming {
                        rule_id: rule.id(),
                        duration,
                        issue_count: issues.len(),
                        failed: false,
                    });
                    outcome.issues.extend(issues);
                }
                Err(_) => {
                    warn!(rule = rule.id(), url = %page.url, "rule panicked, skipping");
                    outcome.timings.push(RuleTiming {
                        rule_id: rule.id(),
                        duration,
                        issue_count: 0,
                        failed: true,
                    });
                }
            }
        }

        outcome.issues = dedupe(outcome.issues);
        outcome
    }
}

/// Collapse issues sharing a `(type, selector)` pair; first occurrence wins.
pub fn dedupe(issues: Vec<AccessibilityIssue>) -> Vec<AccessibilityIssue> {
    let mut seen = HashSet::new();
    issues
        .into_iter()
        .filter(|issue| seen.insert(issue.dedup_key()))
        .collect()
}

/// Assemble an issue anchored to one element, capturing its page context.
pub(crate) fn issue_for_element(
    page: &PageSnapshot,
    index: usize,
    issue_type: IssueType,
    severity: Severity,
    wcag: &str,
    title: impl Into<String>,
    description: impl Into<String>,
    impact: impl Into<String>,
    fix: Fix,
) -> AccessibilityIssue {
    let element = &page.elements[index];
    AccessibilityIssue {
        id: AccessibilityIssue::stable_id(issue_type, &element.selector),
        issue_type,
        severity,
        wcag_criterion: wcag.to_string(),
        title: title.into(),
        description: description.into(),
        impact: impact.into(),
        selector: element.selector.clone(),
        xpath: element.xpath.clone(),
        html_snippet: page.html_snippet(index),
        fix,
        context: IssueContext {
            page_title: page.title.clone(),
            page_url: page.url.clone(),
            nearby_text: page.nearby_text(index),
            parent_chain: page.ancestor_tags(index, MAX_PARENT_CHAIN),
            image: None,
        },
    }
}

/// Assemble a page-level issue (no specific element), anchored to `body`.
pub(crate) fn issue_for_page(
    page: &PageSnapshot,
    issue_type: IssueType,
    severity: Severity,
    wcag: &str,
    title: impl Into<String>,
    description: impl Into<String>,
    impact: impl Into<String>,
    fix: Fix,
) -> AccessibilityIssue {
    let selector = "body".to_string();
    AccessibilityIssue {
        id: AccessibilityIssue::stable_id(issue_type, &selector),
        issue_type,
        severity,
        wcag_criterion: wcag.to_string(),
        title: title.into(),
        description: description.into(),
        impact: impact.into(),
        selector,
        xpath: None,
        html_snippet: String::new(),
        fix,
        context: IssueContext {
            page_title: page.title.clone(),
            page_url: page.url.clone(),
            ..IssueContext::default()
        },
    }
}
