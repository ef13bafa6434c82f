//! Form control labeling (WCAG 3.3.2).

use crate::domain::issue::{AccessibilityIssue, Fix, FixKind, IssueType, Severity};
use crate::domain::page::{ElementNode, PageSnapshot};

use super::{Rule, RuleOptions, issue_for_element};

/// Input types that carry their own accessible name.
const EXEMPT_INPUT_TYPES: &[&str] = &["submit", "button", "reset", "hidden", "image"];

/// Flags visible form controls with no programmatically associated label:
/// no `<label for>`, no ancestor `<label>`, no `aria-label` and no
/// `aria-labelledby`.
pub struct FormLabelsRule;

fn is_form_control(el: &ElementNode) -> bool {
    match el.tag.as_str() {
        "select" | "textarea" => true,
        "input" => {
            let input_type = el.attr("type").unwrap_or("text").to_ascii_lowercase();
            !EXEMPT_INPUT_TYPES.contains(&input_type.as_str())
        }
        _ => false,
    }
}

fn has_label_for(page: &PageSnapshot, control: &ElementNode) -> bool {
    let Some(id) = control.attr("id") else {
        return false;
    };
    page.iter()
        .any(|(_, el)| el.tag == "label" && el.attr("for") == Some(id))
}

fn has_ancestor_label(page: &PageSnapshot, index: usize) -> bool {
    let mut cursor = page.elements[index].parent;
    while let Some(idx) = cursor {
        if page.elements[idx].tag == "label" {
            return true;
        }
        cursor = page.elements[idx].parent;
    }
    false
}

impl Rule for FormLabelsRule {
    fn id(&self) -> &'static str {
        "form-labels"
    }

    fn issue_type(&self) -> IssueType {
        IssueType::FormLabels
    }

    fn wcag(&self) -> &'static str {
        "3.3.2"
    }

    fn default_severity(&self) -> Severity {
        Severity::Critical
    }

    fn check(&self, page: &PageSnapshot, options: &RuleOptions) -> Vec<AccessibilityIssue> {
        let mut issues = Vec::new();
        for (index, el) in page.iter() {
            if !is_form_control(el) {
                continue;
            }
            if !el.is_visible() && !options.include_hidden {
                continue;
            }
            if el.has_nonempty_attr("aria-label")
                || el.has_nonempty_attr("aria-labelledby")
                || has_label_for(page, el)
                || has_ancestor_label(page, index)
            {
                continue;
            }

            let field = el
                .attr("name")
                .or_else(|| el.attr("id"))
                .unwrap_or(el.tag.as_str())
                .to_string();
            let suggested = match el.attr("id") {
                Some(id) => format!("<label for=\"{}\">{}</label>", id, field),
                None => format!("<label>{} <{} ...></label>", field, el.tag),
            };
            issues.push(issue_for_element(
                page,
                index,
                self.issue_type(),
                self.default_severity(),
                self.wcag(),
                "Form control has no associated label",
                format!("The {} control \"{}\" has no programmatic label.", el.tag, field),
                "Screen reader users hear only the control type, not its purpose.",
                Fix::new(
                    FixKind::AddElement,
                    "Associate a label with the control",
                    suggested,
                    "A <label> element (or aria-label) gives the control an accessible name.",
                    0.7,
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
        FormLabelsRule.check(page, &RuleOptions::default())
    }

    #[test]
    fn flags_unlabeled_text_input() {
        let mut b = PageSnapshot::builder("https://a.com", "t");
        b.push(ElementSpec::new("input").attr("type", "email").attr("name", "email"));
        let issues = check(&b.build());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Critical);
    }

    #[test]
    fn label_for_matches_by_id() {
        let mut b = PageSnapshot::builder("https://a.com", "t");
        b.push(ElementSpec::new("label").attr("for", "q").text("Search"));
        b.push(ElementSpec::new("input").attr("id", "q"));
        assert!(check(&b.build()).is_empty());
    }

    #[test]
    fn wrapping_label_counts() {
        let mut b = PageSnapshot::builder("https://a.com", "t");
        let label = b.push(ElementSpec::new("label").text("Name"));
        b.push_child(label, ElementSpec::new("input"));
        assert!(check(&b.build()).is_empty());
    }

    #[test]
    fn aria_label_counts() {
        let mut b = PageSnapshot::builder("https://a.com", "t");
        b.push(ElementSpec::new("select").attr("aria-label", "Country"));
        b.push(ElementSpec::new("textarea").attr("aria-labelledby", "bio-heading"));
        assert!(check(&b.build()).is_empty());
    }

    #[test]
    fn button_like_inputs_are_exempt() {
        let mut b = PageSnapshot::builder("https://a.com", "t");
        b.push(ElementSpec::new("input").attr("type", "submit").attr("value", "Go"));
        b.push(ElementSpec::new("input").attr("type", "hidden").attr("name", "csrf"));
        assert!(check(&b.build()).is_empty());
    }

    #[test]
    fn hidden_control_skipped_by_default() {
        let mut b = PageSnapshot::builder("https://a.com", "t");
        b.push(ElementSpec::new("input").style(|s| s.display = "none".to_string()));
        let page = b.build();
        assert!(FormLabelsRule.check(&page, &RuleOptions::default()).is_empty());
        assert_eq!(
            FormLabelsRule
                .check(&page, &RuleOptions { include_hidden: true })
                .len(),
            1
        );
    }
}
