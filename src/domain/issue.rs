//! Accessibility issues, fixes and their page context.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ancestor tags captured per issue.
pub const MAX_PARENT_CHAIN: usize = 5;
/// Bound on captured nearby text (characters).
pub const MAX_NEARBY_TEXT: usize = 120;
/// Bound on captured HTML snippets (characters).
pub const MAX_HTML_SNIPPET: usize = 300;

/// Closed catalog of issue categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    MissingAltText,
    ColorContrast,
    HeadingStructure,
    FormLabels,
    AriaLabels,
    FocusManagement,
    KeyboardNavigation,
    Landmarks,
}

impl std::fmt::Display for IssueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::MissingAltText => "missing_alt_text",
            Self::ColorContrast => "color_contrast",
            Self::HeadingStructure => "heading_structure",
            Self::FormLabels => "form_labels",
            Self::AriaLabels => "aria_labels",
            Self::FocusManagement => "focus_management",
            Self::KeyboardNavigation => "keyboard_navigation",
            Self::Landmarks => "landmarks",
        };
        write!(f, "{}", name)
    }
}

/// Issue severity, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Blocker,
    Critical,
    Major,
    Minor,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blocker => write!(f, "blocker"),
            Self::Critical => write!(f, "critical"),
            Self::Major => write!(f, "major"),
            Self::Minor => write!(f, "minor"),
        }
    }
}

/// Kind of suggested remediation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixKind {
    AddAttribute,
    ChangeStyle,
    RestructureMarkup,
    AddElement,
}

/// A suggested fix attached to an issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fix {
    pub kind: FixKind,
    pub description: String,
    pub suggested_code: String,
    pub explanation: String,
    /// Confidence in the suggestion, clamped to `0.0..=1.0`.
    pub confidence: f32,
}

impl Fix {
    pub fn new(
        kind: FixKind,
        description: impl Into<String>,
        suggested_code: impl Into<String>,
        explanation: impl Into<String>,
        confidence: f32,
    ) -> Self {
        Self {
            kind,
            description: description.into(),
            suggested_code: suggested_code.into(),
            explanation: explanation.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Image details captured for image-related issues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub src: String,
    pub alt: Option<String>,
}

/// Enough page context to propose a fix without re-fetching the page.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IssueContext {
    pub page_title: String,
    pub page_url: String,
    /// Truncated to [`MAX_NEARBY_TEXT`].
    pub nearby_text: String,
    /// Up to [`MAX_PARENT_CHAIN`] ancestor tag names, nearest first.
    pub parent_chain: Vec<String>,
    pub image: Option<ImageMetadata>,
}

/// One deduplicated accessibility finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessibilityIssue {
    /// Stable identity derived from `(issue_type, selector)`, so repeated
    /// scans of an unchanged page yield identical ids.
    pub id: Uuid,
    pub issue_type: IssueType,
    pub severity: Severity,
    /// WCAG success criterion, e.g. `1.1.1`.
    pub wcag_criterion: String,
    pub title: String,
    pub description: String,
    pub impact: String,
    pub selector: String,
    pub xpath: Option<String>,
    /// Truncated to [`MAX_HTML_SNIPPET`].
    pub html_snippet: String,
    pub fix: Fix,
    pub context: IssueContext,
}

impl AccessibilityIssue {
    /// Deterministic issue id for a `(type, selector)` pair.
    pub fn stable_id(issue_type: IssueType, selector: &str) -> Uuid {
        let name = format!("axscan:{}:{}", issue_type, selector);
        Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes())
    }

    /// Deduplication key: one issue per `(type, selector)` pair.
    pub fn dedup_key(&self) -> (IssueType, String) {
        (self.issue_type, self.selector.clone())
    }
}

/// Truncate a string on a char boundary, appending an ellipsis when cut.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", cut)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_id_is_deterministic() {
        let a = AccessibilityIssue::stable_id(IssueType::MissingAltText, "img:nth-of-type(1)");
        let b = AccessibilityIssue::stable_id(IssueType::MissingAltText, "img:nth-of-type(1)");
        assert_eq!(a, b);

        let c = AccessibilityIssue::stable_id(IssueType::ColorContrast, "img:nth-of-type(1)");
        assert_ne!(a, c);
    }

    #[test]
    fn severity_orders_most_severe_first() {
        assert!(Severity::Blocker < Severity::Critical);
        assert!(Severity::Critical < Severity::Major);
        assert!(Severity::Major < Severity::Minor);
    }

    #[test]
    fn confidence_is_clamped() {
        let fix = Fix::new(FixKind::AddAttribute, "d", "c", "e", 7.0);
        assert_eq!(fix.confidence, 1.0);
    }

    #[test]
    fn truncate_respects_multibyte_text() {
        let text = "héllo wörld, this is a long sentence";
        let cut = truncate(text, 10);
        assert!(cut.chars().count() <= 10);
        assert!(cut.ends_with('…'));
    }

    #[test]
    fn issue_type_serializes_snake_case() {
        let json = serde_json::to_string(&IssueType::MissingAltText).unwrap();
        assert_eq!(json, "\"missing_alt_text\"");
    }
}
