//! Rendered-page snapshot consumed by the rule engine.
//!
//! The browser session serialises the live DOM (tags, attributes, text and
//! the computed-style subset the rules need) into a [`PageSnapshot`]. Rules
//! read it without touching the browser again, which keeps rule execution
//! deterministic for a given page state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::issue::{MAX_HTML_SNIPPET, MAX_NEARBY_TEXT, truncate};

/// Subset of computed style relevant to the rule catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputedStyle {
    pub display: String,
    pub visibility: String,
    pub color: String,
    pub background_color: String,
    pub font_size_px: f32,
    pub font_weight: u16,
    pub outline_style: String,
    pub outline_width_px: f32,
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            display: "block".to_string(),
            visibility: "visible".to_string(),
            color: "rgb(0, 0, 0)".to_string(),
            background_color: "rgba(0, 0, 0, 0)".to_string(),
            font_size_px: 16.0,
            font_weight: 400,
            outline_style: "auto".to_string(),
            outline_width_px: 1.0,
        }
    }
}

/// One element in the flattened DOM arena. `parent` indexes into
/// [`PageSnapshot::elements`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementNode {
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
    /// Text owned directly by this element (not descendants).
    pub text: String,
    pub style: ComputedStyle,
    pub selector: String,
    pub xpath: Option<String>,
    pub parent: Option<usize>,
    /// Whether the element has a click listener attached.
    pub has_click_handler: bool,
}

impl ElementNode {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Attribute present with non-whitespace content.
    pub fn has_nonempty_attr(&self, name: &str) -> bool {
        self.attr(name).is_some_and(|v| !v.trim().is_empty())
    }

    pub fn role(&self) -> Option<&str> {
        self.attr("role")
    }

    pub fn tab_index(&self) -> Option<i32> {
        self.attr("tabindex").and_then(|v| v.trim().parse().ok())
    }

    /// `h1`..`h6` level, when this is a heading.
    pub fn heading_level(&self) -> Option<u8> {
        match self.tag.as_str() {
            "h1" => Some(1),
            "h2" => Some(2),
            "h3" => Some(3),
            "h4" => Some(4),
            "h5" => Some(5),
            "h6" => Some(6),
            _ => None,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.style.display != "none" && self.style.visibility != "hidden"
    }

    /// Natively keyboard-focusable elements per the HTML spec subset the
    /// rules care about.
    pub fn is_natively_focusable(&self) -> bool {
        match self.tag.as_str() {
            "a" | "area" => self.has_attr("href"),
            "button" | "input" | "select" | "textarea" => !self.has_attr("disabled"),
            _ => false,
        }
    }
}

/// Flattened snapshot of a rendered page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub elements: Vec<ElementNode>,
}

impl PageSnapshot {
    pub fn builder(url: impl Into<String>, title: impl Into<String>) -> PageBuilder {
        PageBuilder::new(url, title)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &ElementNode)> {
        self.elements.iter().enumerate()
    }

    /// Ancestor tag names of `index`, nearest first, capped at `max`.
    pub fn ancestor_tags(&self, index: usize, max: usize) -> Vec<String> {
        let mut chain = Vec::new();
        let mut cursor = self.elements.get(index).and_then(|el| el.parent);
        while let Some(parent_idx) = cursor {
            if chain.len() >= max {
                break;
            }
            let Some(parent) = self.elements.get(parent_idx) else {
                break;
            };
            chain.push(parent.tag.clone());
            cursor = parent.parent;
        }
        chain
    }

    fn is_descendant_of(&self, mut index: usize, ancestor: usize) -> bool {
        while let Some(parent) = self.elements.get(index).and_then(|el| el.parent) {
            if parent == ancestor {
                return true;
            }
            index = parent;
        }
        false
    }

    /// Own text plus descendant text, in document order.
    pub fn text_content(&self, index: usize) -> String {
        let mut parts = Vec::new();
        if let Some(el) = self.elements.get(index) {
            if !el.text.trim().is_empty() {
                parts.push(el.text.trim().to_string());
            }
        }
        for (idx, el) in self.iter() {
            if idx != index && self.is_descendant_of(idx, index) && !el.text.trim().is_empty() {
                parts.push(el.text.trim().to_string());
            }
        }
        parts.join(" ")
    }

    /// Bounded text near an element: its own subtree text, falling back to
    /// the parent's subtree text.
    pub fn nearby_text(&self, index: usize) -> String {
        let own = self.text_content(index);
        if !own.is_empty() {
            return truncate(&own, MAX_NEARBY_TEXT);
        }
        if let Some(parent) = self.elements.get(index).and_then(|el| el.parent) {
            return truncate(&self.text_content(parent), MAX_NEARBY_TEXT);
        }
        String::new()
    }

    /// Bounded reconstruction of an element's opening tag and text.
    pub fn html_snippet(&self, index: usize) -> String {
        let Some(el) = self.elements.get(index) else {
            return String::new();
        };
        let mut snippet = format!("<{}", el.tag);
        for (name, value) in &el.attributes {
            snippet.push_str(&format!(" {}=\"{}\"", name, value));
        }
        snippet.push('>');
        if !el.text.is_empty() {
            snippet.push_str(el.text.trim());
            snippet.push_str(&format!("</{}>", el.tag));
        }
        truncate(&snippet, MAX_HTML_SNIPPET)
    }
}

/// Spec for one element fed to [`PageBuilder`]. Used by tests, fixtures and
/// diagnostic tooling; production snapshots arrive as serialized JSON from
/// the in-sandbox agent.
#[derive(Debug, Clone)]
pub struct ElementSpec {
    tag: String,
    attributes: BTreeMap<String, String>,
    text: String,
    style: ComputedStyle,
    selector: Option<String>,
    has_click_handler: bool,
}

impl ElementSpec {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: BTreeMap::new(),
            text: String::new(),
            style: ComputedStyle::default(),
            selector: None,
            has_click_handler: false,
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn style(mut self, f: impl FnOnce(&mut ComputedStyle)) -> Self {
        f(&mut self.style);
        self
    }

    pub fn selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn click_handler(mut self) -> Self {
        self.has_click_handler = true;
        self
    }
}

/// Incremental snapshot builder keeping parent/child indices explicit.
#[derive(Debug)]
pub struct PageBuilder {
    url: String,
    title: String,
    elements: Vec<ElementNode>,
    tag_counts: BTreeMap<String, usize>,
}

impl PageBuilder {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            elements: Vec::new(),
            tag_counts: BTreeMap::new(),
        }
    }

    /// Append a root-level element, returning its index.
    pub fn push(&mut self, spec: ElementSpec) -> usize {
        self.push_with_parent(spec, None)
    }

    /// Append a child of `parent`, returning its index.
    pub fn push_child(&mut self, parent: usize, spec: ElementSpec) -> usize {
        self.push_with_parent(spec, Some(parent))
    }

    fn push_with_parent(&mut self, spec: ElementSpec, parent: Option<usize>) -> usize {
        let count = self.tag_counts.entry(spec.tag.clone()).or_insert(0);
        *count += 1;
        let selector = spec.selector.unwrap_or_else(|| {
            if let Some(id) = spec.attributes.get("id") {
                format!("#{}", id)
            } else if *count == 1 {
                spec.tag.clone()
            } else {
                format!("{}:nth-of-type({})", spec.tag, count)
            }
        });
        self.elements.push(ElementNode {
            tag: spec.tag,
            attributes: spec.attributes,
            text: spec.text,
            style: spec.style,
            selector,
            xpath: None,
            parent,
            has_click_handler: spec.has_click_handler,
        });
        self.elements.len() - 1
    }

    pub fn build(self) -> PageSnapshot {
        PageSnapshot {
            url: self.url,
            title: self.title,
            elements: self.elements,
        }
    }
}
