//! Heading hierarchy structure (WCAG 1.3.1).

use crate::domain::issue::{AccessibilityIssue, Fix, FixKind, IssueType, Severity};
use crate::domain::page::PageSnapshot;

use super::{Rule, RuleOptions, issue_for_element, issue_for_page};

/// Flags pages without an `<h1>` and headings that skip more than one level
/// past the immediately preceding heading (e.g. h1 → h3).
pub struct HeadingStructureRule;

impl Rule for HeadingStructureRule {
    fn id(&self) -> &'static str {
        "heading-structure"
    }

    fn issue_type(&self) -> IssueType {
        IssueType::HeadingStructure
    }

    fn wcag(&self) -> &'static str {
        "1.3.1"
    }

    fn default_severity(&self) -> Severity {
        Severity::Major
    }

    fn check(&self, page: &PageSnapshot, options: &RuleOptions) -> Vec<AccessibilityIssue> {
        let headings: Vec<(usize, u8)> = page
            .iter()
            .filter(|(_, el)| el.is_visible() || options.include_hidden)
            .filter_map(|(index, el)| el.heading_level().map(|level| (index, level)))
            .collect();

        let mut issues = Vec::new();

        if !headings.iter().any(|(_, level)| *level == 1) {
            issues.push(issue_for_page(
                page,
                self.issue_type(),
                self.default_severity(),
                self.wcag(),
                "Page has no top-level heading",
                "No <h1> element was found; every page needs exactly one top-level heading.",
                "Screen reader users rely on the h1 to identify the page topic.",
                Fix::new(
                    FixKind::AddElement,
                    "Add an h1 describing the page",
                    format!("<h1>{}</h1>", page.title),
                    "The document title is usually a good starting point for the h1 text.",
                    0.7,
                ),
            ));
        }

        for window in headings.windows(2) {
            let (_, previous_level) = window[0];
            let (index, level) = window[1];
            if level > previous_level + 1 {
                let suggested = previous_level + 1;
                issues.push(issue_for_element(
                    page,
                    index,
                    self.issue_type(),
                    self.default_severity(),
                    self.wcag(),
                    format!("Heading level skips from h{} to h{}", previous_level, level),
                    format!(
                        "A heading jumped more than one level past the preceding h{}.",
                        previous_level
                    ),
                    "Assistive technology users navigating by heading lose the document outline.",
                    Fix::new(
                        FixKind::RestructureMarkup,
                        format!("Use h{} instead of h{}", suggested, level),
                        format!(
                            "<h{}>{}</h{}>",
                            suggested,
                            page.elements[index].text.trim(),
                            suggested
                        ),
                        "Heading levels should descend one step at a time.",
                        0.8,
                    ),
                ));
            }
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::page::ElementSpec;

    fn check(page: &PageSnapshot) -> Vec<AccessibilityIssue> {
        HeadingStructureRule.check(page, &RuleOptions::default())
    }

    #[test]
    fn flags_missing_h1() {
        let mut b = PageSnapshot::builder("https://a.com", "T");
        b.push(ElementSpec::new("h2").text("Sub"));
        let issues = check(&b.build());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].selector, "body");
    }

    #[test]
    fn flags_level_jump_with_suggested_intermediate() {
        let mut b = PageSnapshot::builder("https://a.com", "T");
        b.push(ElementSpec::new("h1").text("Title"));
        b.push(ElementSpec::new("h3").text("Sub"));
        let issues = check(&b.build());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].selector, "h3");
        assert!(issues[0].fix.suggested_code.contains("<h2>"));
    }

    #[test]
    fn descending_one_step_is_fine() {
        let mut b = PageSnapshot::builder("https://a.com", "T");
        b.push(ElementSpec::new("h1").text("Title"));
        b.push(ElementSpec::new("h2").text("Sub"));
        b.push(ElementSpec::new("h3").text("Deeper"));
        b.push(ElementSpec::new("h2").text("Back up"));
        assert!(check(&b.build()).is_empty());
    }

    #[test]
    fn jump_back_up_is_allowed() {
        // h3 -> h1 is a decrease, not a skip
        let mut b = PageSnapshot::builder("https://a.com", "T");
        b.push(ElementSpec::new("h1").text("a"));
        b.push(ElementSpec::new("h2").text("b"));
        b.push(ElementSpec::new("h3").text("c"));
        b.push(ElementSpec::new("h1").text("d"));
        assert!(check(&b.build()).is_empty());
    }
}
