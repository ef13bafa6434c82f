//! Accessible names for interactive controls (WCAG 4.1.2).

use crate::domain::issue::{AccessibilityIssue, Fix, FixKind, IssueType, Severity};
use crate::domain::page::{ElementNode, PageSnapshot};

use super::{Rule, RuleOptions, issue_for_element};

/// Widget roles that require an accessible name.
const NAMED_ROLES: &[&str] = &["button", "link", "textbox", "combobox", "menuitem", "tab"];

/// Flags buttons and elements with interactive ARIA roles that expose no
/// accessible name: no text content, no `aria-label`, no `aria-labelledby`
/// and no `title`.
pub struct AriaLabelsRule;

fn needs_accessible_name(el: &ElementNode) -> bool {
    el.tag == "button"
        || el
            .role()
            .is_some_and(|role| NAMED_ROLES.contains(&role.to_ascii_lowercase().as_str()))
}

impl Rule for AriaLabelsRule {
    fn id(&self) -> &'static str {
        "aria-labels"
    }

    fn issue_type(&self) -> IssueType {
        IssueType::AriaLabels
    }

    fn wcag(&self) -> &'static str {
        "4.1.2"
    }

    fn default_severity(&self) -> Severity {
        Severity::Major
    }

    fn check(&self, page: &PageSnapshot, options: &RuleOptions) -> Vec<AccessibilityIssue> {
        let mut issues = Vec::new();
        for (index, el) in page.iter() {
            if !needs_accessible_name(el) {
                continue;
            }
            if !el.is_visible() && !options.include_hidden {
                continue;
            }
            if el.has_nonempty_attr("aria-label")
                || el.has_nonempty_attr("aria-labelledby")
                || el.has_nonempty_attr("title")
                || !page.text_content(index).is_empty()
            {
                continue;
            }

            let role = el.role().unwrap_or(el.tag.as_str()).to_string();
            issues.push(issue_for_element(
                page,
                index,
                self.issue_type(),
                self.default_severity(),
                self.wcag(),
                "Interactive element has no accessible name",
                format!(
                    "This {} exposes no text, aria-label or aria-labelledby.",
                    role
                ),
                "Assistive technology announces the element with no name, so users \
                 cannot tell what it does.",
                Fix::new(
                    FixKind::AddAttribute,
                    "Add an aria-label describing the action",
                    format!("<{} aria-label=\"[describe the action]\">", el.tag),
                    "Icon-only controls need an explicit accessible name.",
                    0.6,
                ),
            ));
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::page::ElementSpec;

    fn check(page: &PageSnapshot) -> Vec<AccessibilityIssue> {
        AriaLabelsRule.check(page, &RuleOptions::default())
    }

    #[test]
    fn flags_icon_only_button() {
        let mut b = PageSnapshot::builder("https://a.com", "t");
        let button = b.push(ElementSpec::new("button"));
        b.push_child(button, ElementSpec::new("svg"));
        let issues = check(&b.build());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].wcag_criterion, "4.1.2");
    }

    #[test]
    fn text_content_is_an_accessible_name() {
        let mut b = PageSnapshot::builder("https://a.com", "t");
        let button = b.push(ElementSpec::new("button"));
        b.push_child(button, ElementSpec::new("span").text("Save"));
        assert!(check(&b.build()).is_empty());
    }

    #[test]
    fn aria_label_is_an_accessible_name() {
        let mut b = PageSnapshot::builder("https://a.com", "t");
        b.push(ElementSpec::new("button").attr("aria-label", "Close dialog"));
        assert!(check(&b.build()).is_empty());
    }

    #[test]
    fn flags_div_with_interactive_role() {
        let mut b = PageSnapshot::builder("https://a.com", "t");
        b.push(ElementSpec::new("div").attr("role", "button"));
        b.push(ElementSpec::new("div").attr("role", "navigation"));
        let issues = check(&b.build());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].selector, "div");
    }

    #[test]
    fn tracks_exactly_the_widget_roles_that_need_names() {
        let mut b = PageSnapshot::builder("https://a.com", "t");
        for role in ["textbox", "combobox", "menuitem", "tab", "link"] {
            b.push(ElementSpec::new("div").attr("role", role));
        }
        // roles outside the tracked set are not flagged
        b.push(ElementSpec::new("div").attr("role", "checkbox"));
        b.push(ElementSpec::new("div").attr("role", "option"));
        assert_eq!(check(&b.build()).len(), 5);
    }

    #[test]
    fn whitespace_only_aria_label_does_not_count() {
        let mut b = PageSnapshot::builder("https://a.com", "t");
        b.push(ElementSpec::new("button").attr("aria-label", "   "));
        assert_eq!(check(&b.build()).len(), 1);
    }
}
