//! Main content landmark (WCAG 1.3.6).

use crate::domain::issue::{AccessibilityIssue, Fix, FixKind, IssueType, Severity};
use crate::domain::page::PageSnapshot;

use super::{Rule, RuleOptions, issue_for_page};

/// Flags pages without a `<main>` element or `role="main"` landmark.
pub struct LandmarksRule;

impl Rule for LandmarksRule {
    fn id(&self) -> &'static str {
        "landmarks"
    }

    fn issue_type(&self) -> IssueType {
        IssueType::Landmarks
    }

    fn wcag(&self) -> &'static str {
        "1.3.6"
    }

    fn default_severity(&self) -> Severity {
        Severity::Minor
    }

    fn check(&self, page: &PageSnapshot, _options: &RuleOptions) -> Vec<AccessibilityIssue> {
        let has_main = page
            .iter()
            .any(|(_, el)| el.tag == "main" || el.role() == Some("main"));
        if has_main {
            return Vec::new();
        }
        vec![issue_for_page(
            page,
            self.issue_type(),
            self.default_severity(),
            self.wcag(),
            "Page has no main landmark",
            "No <main> element or role=\"main\" region was found.",
            "Screen reader users cannot jump directly to the primary content.",
            Fix::new(
                FixKind::AddElement,
                "Wrap the primary content in a <main> element",
                "<main>...</main>",
                "A main landmark lets assistive technology skip repeated page chrome.",
                0.8,
            ),
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::page::ElementSpec;

    fn check(page: &PageSnapshot) -> Vec<AccessibilityIssue> {
        LandmarksRule.check(page, &RuleOptions::default())
    }

    #[test]
    fn flags_page_without_main() {
        let mut b = PageSnapshot::builder("https://a.com", "t");
        b.push(ElementSpec::new("body"));
        let issues = check(&b.build());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].selector, "body");
        assert_eq!(issues[0].severity, Severity::Minor);
    }

    #[test]
    fn main_tag_passes() {
        let mut b = PageSnapshot::builder("https://a.com", "t");
        let body = b.push(ElementSpec::new("body"));
        b.push_child(body, ElementSpec::new("main"));
        assert!(check(&b.build()).is_empty());
    }

    #[test]
    fn role_main_passes() {
        let mut b = PageSnapshot::builder("https://a.com", "t");
        let body = b.push(ElementSpec::new("body"));
        b.push_child(body, ElementSpec::new("div").attr("role", "main"));
        assert!(check(&b.build()).is_empty());
    }
}
