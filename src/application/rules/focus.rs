//! Keyboard focus: visible indicators (WCAG 2.4.7 territory, reported under
//! 2.1.1 alongside reachability) and reachability of click targets.

use crate::domain::issue::{AccessibilityIssue, Fix, FixKind, IssueType, Severity};
use crate::domain::page::{ElementNode, PageSnapshot};

use super::{Rule, RuleOptions, issue_for_element};

fn is_focusable(el: &ElementNode) -> bool {
    el.is_natively_focusable() || el.tab_index().is_some_and(|t| t >= 0)
}

fn focus_indicator_suppressed(el: &ElementNode) -> bool {
    el.style.outline_style == "none" || el.style.outline_width_px == 0.0
}

/// Flags focusable elements whose computed style removes the focus outline.
pub struct FocusVisibilityRule;

impl Rule for FocusVisibilityRule {
    fn id(&self) -> &'static str {
        "focus-visibility"
    }

    fn issue_type(&self) -> IssueType {
        IssueType::FocusManagement
    }

    fn wcag(&self) -> &'static str {
        "2.1.1"
    }

    fn default_severity(&self) -> Severity {
        Severity::Major
    }

    fn check(&self, page: &PageSnapshot, options: &RuleOptions) -> Vec<AccessibilityIssue> {
        let mut issues = Vec::new();
        for (index, el) in page.iter() {
            if !is_focusable(el) || !focus_indicator_suppressed(el) {
                continue;
            }
            if !el.is_visible() && !options.include_hidden {
                continue;
            }
            issues.push(issue_for_element(
                page,
                index,
                self.issue_type(),
                self.default_severity(),
                self.wcag(),
                "Focusable element has no visible focus indicator",
                format!(
                    "The {} is keyboard-focusable but its focus outline is removed \
                     (outline: {} / {}px).",
                    el.tag, el.style.outline_style, el.style.outline_width_px
                ),
                "Keyboard users cannot see which element currently has focus.",
                Fix::new(
                    FixKind::ChangeStyle,
                    "Restore a visible focus outline",
                    format!("{}:focus-visible {{ outline: 2px solid #005fcc; }}", el.selector),
                    "A focus-visible outline keeps the indicator for keyboard users \
                     without affecting mouse interaction.",
                    0.7,
                ),
            ));
        }
        issues
    }
}

/// Flags elements with click handlers that keyboard users cannot reach:
/// not natively focusable and no tabindex.
pub struct KeyboardReachabilityRule;

impl Rule for KeyboardReachabilityRule {
    fn id(&self) -> &'static str {
        "keyboard-reachability"
    }

    fn issue_type(&self) -> IssueType {
        IssueType::KeyboardNavigation
    }

    fn wcag(&self) -> &'static str {
        "2.1.1"
    }

    fn default_severity(&self) -> Severity {
        Severity::Major
    }

    fn check(&self, page: &PageSnapshot, options: &RuleOptions) -> Vec<AccessibilityIssue> {
        let mut issues = Vec::new();
        for (index, el) in page.iter() {
            if !el.has_click_handler || el.is_natively_focusable() || el.tab_index().is_some() {
                continue;
            }
            if !el.is_visible() && !options.include_hidden {
                continue;
            }
            issues.push(issue_for_element(
                page,
                index,
                self.issue_type(),
                self.default_severity(),
                self.wcag(),
                "Clickable element is not keyboard reachable",
                format!(
                    "The {} has a click handler but is not in the tab order.",
                    el.tag
                ),
                "Keyboard-only users cannot activate this control at all.",
                Fix::new(
                    FixKind::AddAttribute,
                    "Add tabindex=\"0\" (or use a native button)",
                    format!("<{} tabindex=\"0\" role=\"button\">", el.tag),
                    "tabindex=\"0\" places the element in the natural tab order; a \
                     native <button> would also provide key activation for free.",
                    0.8,
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

    #[test]
    fn flags_link_with_suppressed_outline() {
        let mut b = PageSnapshot::builder("https://a.com", "t");
        b.push(
            ElementSpec::new("a")
                .attr("href", "/x")
                .text("Home")
                .style(|s| s.outline_style = "none".to_string()),
        );
        let issues = FocusVisibilityRule.check(&b.build(), &RuleOptions::default());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, IssueType::FocusManagement);
    }

    #[test]
    fn zero_width_outline_also_flagged() {
        let mut b = PageSnapshot::builder("https://a.com", "t");
        b.push(
            ElementSpec::new("button")
                .text("Go")
                .style(|s| s.outline_width_px = 0.0),
        );
        assert_eq!(
            FocusVisibilityRule
                .check(&b.build(), &RuleOptions::default())
                .len(),
            1
        );
    }

    #[test]
    fn default_outline_passes() {
        let mut b = PageSnapshot::builder("https://a.com", "t");
        b.push(ElementSpec::new("button").text("Go"));
        b.push(ElementSpec::new("div").style(|s| s.outline_style = "none".to_string()));
        assert!(FocusVisibilityRule
            .check(&b.build(), &RuleOptions::default())
            .is_empty());
    }

    #[test]
    fn flags_clickable_div_outside_tab_order() {
        let mut b = PageSnapshot::builder("https://a.com", "t");
        b.push(ElementSpec::new("div").text("Open menu").click_handler());
        let issues = KeyboardReachabilityRule.check(&b.build(), &RuleOptions::default());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, IssueType::KeyboardNavigation);
        assert!(issues[0].fix.suggested_code.contains("tabindex=\"0\""));
    }

    #[test]
    fn tabindex_or_native_focusability_passes() {
        let mut b = PageSnapshot::builder("https://a.com", "t");
        b.push(ElementSpec::new("div").attr("tabindex", "0").click_handler());
        b.push(ElementSpec::new("button").text("Go").click_handler());
        b.push(ElementSpec::new("a").attr("href", "/x").click_handler());
        assert!(KeyboardReachabilityRule
            .check(&b.build(), &RuleOptions::default())
            .is_empty());
    }

    #[test]
    fn negative_tabindex_still_counts_as_deliberate() {
        // tabindex="-1" removes the element from the tab order on purpose;
        // treat it as an explicit author decision rather than an oversight
        let mut b = PageSnapshot::builder("https://a.com", "t");
        b.push(ElementSpec::new("div").attr("tabindex", "-1").click_handler());
        assert!(KeyboardReachabilityRule
            .check(&b.build(), &RuleOptions::default())
            .is_empty());
    }
}
