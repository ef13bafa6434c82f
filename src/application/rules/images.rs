//! Missing alternative text for images (WCAG 1.1.1).

use crate::domain::issue::{
    AccessibilityIssue, Fix, FixKind, ImageMetadata, IssueType, Severity,
};
use crate::domain::page::PageSnapshot;

use super::{Rule, RuleOptions, issue_for_element};

/// Flags non-decorative `<img>` elements that carry neither an `alt` nor a
/// `title` attribute. An empty `alt=""` counts as an explicit decorative
/// marker and is not flagged.
pub struct MissingAltTextRule;

fn is_decorative(el: &crate::domain::page::ElementNode) -> bool {
    matches!(el.role(), Some("presentation") | Some("none"))
        || el.attr("aria-hidden") == Some("true")
}

impl Rule for MissingAltTextRule {
    fn id(&self) -> &'static str {
        "missing-alt-text"
    }

    fn issue_type(&self) -> IssueType {
        IssueType::MissingAltText
    }

    fn wcag(&self) -> &'static str {
        "1.1.1"
    }

    fn default_severity(&self) -> Severity {
        Severity::Critical
    }

    fn check(&self, page: &PageSnapshot, options: &RuleOptions) -> Vec<AccessibilityIssue> {
        let mut issues = Vec::new();
        for (index, el) in page.iter() {
            if el.tag != "img" || is_decorative(el) {
                continue;
            }
            if !el.is_visible() && !options.include_hidden {
                continue;
            }
            if el.has_attr("alt") || el.has_attr("title") {
                continue;
            }

            let src = el.attr("src").unwrap_or_default().to_string();
            let fix = Fix::new(
                FixKind::AddAttribute,
                "Add an alt attribute describing the image",
                format!("<img src=\"{}\" alt=\"[describe the image content]\">", src),
                "Screen readers announce the alt text in place of the image; \
                 without it the image is inaccessible to non-visual users.",
                0.6,
            );
            let mut issue = issue_for_element(
                page,
                index,
                self.issue_type(),
                self.default_severity(),
                self.wcag(),
                "Image is missing alternative text",
                format!("The image \"{}\" has neither an alt nor a title attribute.", src),
                "Screen reader users cannot perceive the image content.",
                fix,
            );
            issue.context.image = Some(ImageMetadata { src, alt: None });
            issues.push(issue);
        }
        issues
    }
}
