//! Text color contrast (WCAG 1.4.3, AA thresholds).

use crate::domain::issue::{AccessibilityIssue, Fix, FixKind, IssueType, Severity};
use crate::domain::page::{ElementNode, PageSnapshot};

use super::{Rule, RuleOptions, issue_for_element};

/// AA threshold for normal text.
const NORMAL_TEXT_RATIO: f64 = 4.5;
/// AA threshold for large text (>= 24px, or >= 18.66px bold).
const LARGE_TEXT_RATIO: f64 = 3.0;

/// An sRGB color with alpha.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: f64,
}

impl Rgba {
    pub const WHITE: Rgba = Rgba { r: 255, g: 255, b: 255, a: 1.0 };

    pub fn is_transparent(&self) -> bool {
        self.a == 0.0
    }

    /// WCAG relative luminance.
    pub fn luminance(&self) -> f64 {
        fn channel(value: u8) -> f64 {
            let c = value as f64 / 255.0;
            if c <= 0.03928 {
                c / 12.92
            } else {
                ((c + 0.055) / 1.055).powf(2.4)
            }
        }
        0.2126 * channel(self.r) + 0.7152 * channel(self.g) + 0.0722 * channel(self.b)
    }
}

/// Parse the CSS color forms computed styles actually produce: hex,
/// `rgb()`/`rgba()` and a handful of keywords.
pub fn parse_css_color(text: &str) -> Option<Rgba> {
    let text = text.trim().to_ascii_lowercase();

    match text.as_str() {
        "transparent" => return Some(Rgba { r: 0, g: 0, b: 0, a: 0.0 }),
        "white" => return Some(Rgba::WHITE),
        "black" => return Some(Rgba { r: 0, g: 0, b: 0, a: 1.0 }),
        "red" => return Some(Rgba { r: 255, g: 0, b: 0, a: 1.0 }),
        "green" => return Some(Rgba { r: 0, g: 128, b: 0, a: 1.0 }),
        "blue" => return Some(Rgba { r: 0, g: 0, b: 255, a: 1.0 }),
        "gray" | "grey" => return Some(Rgba { r: 128, g: 128, b: 128, a: 1.0 }),
        _ => {}
    }

    if let Some(hex) = text.strip_prefix('#') {
        return parse_hex(hex);
    }

    if let Some(body) = text
        .strip_prefix("rgba(")
        .or_else(|| text.strip_prefix("rgb("))
    {
        let body = body.strip_suffix(')')?;
        let parts: Vec<&str> = body.split(',').map(str::trim).collect();
        if parts.len() < 3 {
            return None;
        }
        let r = parts[0].parse().ok()?;
        let g = parts[1].parse().ok()?;
        let b = parts[2].parse().ok()?;
        let a = match parts.get(3) {
            Some(alpha) => alpha.parse().ok()?,
            None => 1.0,
        };
        return Some(Rgba { r, g, b, a });
    }

    None
}

fn parse_hex(hex: &str) -> Option<Rgba> {
    let expand = |c: u8| (c << 4) | c;
    match hex.len() {
        3 => {
            let value = u16::from_str_radix(hex, 16).ok()? as u32;
            Some(Rgba {
                r: expand(((value >> 8) & 0xf) as u8),
                g: expand(((value >> 4) & 0xf) as u8),
                b: expand((value & 0xf) as u8),
                a: 1.0,
            })
        }
        6 => {
            let value = u32::from_str_radix(hex, 16).ok()?;
            Some(Rgba {
                r: ((value >> 16) & 0xff) as u8,
                g: ((value >> 8) & 0xff) as u8,
                b: (value & 0xff) as u8,
                a: 1.0,
            })
        }
        8 => {
            let value = u32::from_str_radix(hex, 16).ok()?;
            Some(Rgba {
                r: ((value >> 24) & 0xff) as u8,
                g: ((value >> 16) & 0xff) as u8,
                b: ((value >> 8) & 0xff) as u8,
                a: (value & 0xff) as f64 / 255.0,
            })
        }
        _ => None,
    }
}

/// Contrast ratio between two opaque colors, always >= 1.
pub fn contrast_ratio(a: Rgba, b: Rgba) -> f64 {
    let la = a.luminance();
    let lb = b.luminance();
    let (lighter, darker) = if la >= lb { (la, lb) } else { (lb, la) };
    (lighter + 0.05) / (darker + 0.05)
}

fn is_large_text(el: &ElementNode) -> bool {
    el.style.font_size_px >= 24.0 || (el.style.font_size_px >= 18.66 && el.style.font_weight >= 700)
}

/// Effective background: nearest non-transparent ancestor background,
/// defaulting to white at the document root.
fn effective_background(page: &PageSnapshot, index: usize) -> Rgba {
    let mut cursor = Some(index);
    while let Some(idx) = cursor {
        let el = &page.elements[idx];
        if let Some(color) = parse_css_color(&el.style.background_color) {
            if !color.is_transparent() {
                return color;
            }
        }
        cursor = el.parent;
    }
    Rgba::WHITE
}

/// Flags visible text with a foreground/background contrast ratio below the
/// WCAG AA threshold for its size class.
pub struct ColorContrastRule;

impl Rule for ColorContrastRule {
    fn id(&self) -> &'static str {
        "color-contrast"
    }

    fn issue_type(&self) -> IssueType {
        IssueType::ColorContrast
    }

    fn wcag(&self) -> &'static str {
        "1.4.3"
    }

    fn default_severity(&self) -> Severity {
        Severity::Major
    }

    fn check(&self, page: &PageSnapshot, options: &RuleOptions) -> Vec<AccessibilityIssue> {
        let mut issues = Vec::new();
        for (index, el) in page.iter() {
            if el.text.trim().is_empty() {
                continue;
            }
            if !el.is_visible() && !options.include_hidden {
                continue;
            }
            let Some(foreground) = parse_css_color(&el.style.color) else {
                continue;
            };
            if foreground.is_transparent() {
                continue;
            }
            let background = effective_background(page, index);
            let ratio = contrast_ratio(foreground, background);
            let threshold = if is_large_text(el) {
                LARGE_TEXT_RATIO
            } else {
                NORMAL_TEXT_RATIO
            };
            if ratio >= threshold {
                continue;
            }

            let fix = Fix::new(
                FixKind::ChangeStyle,
                format!("Increase the contrast ratio to at least {}:1", threshold),
                format!("{} {{ color: #1a1a1a; }}", el.selector),
                format!(
                    "The measured ratio is {:.2}:1 against the WCAG AA minimum of {}:1 \
                     for this text size.",
                    ratio, threshold
                ),
                0.5,
            );
            issues.push(issue_for_element(
                page,
                index,
                self.issue_type(),
                self.default_severity(),
                self.wcag(),
                "Insufficient text color contrast",
                format!(
                    "Text color {} on background {:?} yields a {:.2}:1 contrast ratio.",
                    el.style.color, background, ratio
                ),
                "Low-vision users may be unable to read this text.",
                fix,
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
    fn luminance_extremes() {
        assert!(Rgba::WHITE.luminance() > 0.99);
        assert!(parse_css_color("black").unwrap().luminance() < 0.01);
    }

    #[test]
    fn black_on_white_is_21_to_1() {
        let ratio = contrast_ratio(parse_css_color("black").unwrap(), Rgba::WHITE);
        assert!((ratio - 21.0).abs() < 0.01);
    }

    #[test]
    fn parses_hex_and_rgb_forms() {
        assert_eq!(
            parse_css_color("#fff"),
            Some(Rgba { r: 255, g: 255, b: 255, a: 1.0 })
        );
        assert_eq!(
            parse_css_color("#336699"),
            Some(Rgba { r: 0x33, g: 0x66, b: 0x99, a: 1.0 })
        );
        assert_eq!(
            parse_css_color("rgb(1, 2, 3)"),
            Some(Rgba { r: 1, g: 2, b: 3, a: 1.0 })
        );
        let rgba = parse_css_color("rgba(0, 0, 0, 0)").unwrap();
        assert!(rgba.is_transparent());
        assert_eq!(parse_css_color("conic-gradient(red)"), None);
    }

    #[test]
    fn flags_low_contrast_normal_text() {
        let mut b = PageSnapshot::builder("https://a.com", "t");
        let body = b.push(ElementSpec::new("body").style(|s| {
            s.background_color = "rgb(255, 255, 255)".to_string();
        }));
        b.push_child(
            body,
            ElementSpec::new("p").text("hello").style(|s| {
                s.color = "rgb(200, 200, 200)".to_string();
            }),
        );
        let issues = ColorContrastRule.check(&b.build(), &RuleOptions::default());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].wcag_criterion, "1.4.3");
    }

    #[test]
    fn large_text_uses_relaxed_threshold() {
        // gray on white is ~3.95:1 — fails normal text, passes large text
        let gray = "rgb(128, 128, 128)";
        let mut b = PageSnapshot::builder("https://a.com", "t");
        let body = b.push(ElementSpec::new("body").style(|s| {
            s.background_color = "white".to_string();
        }));
        b.push_child(
            body,
            ElementSpec::new("p").text("small").style(|s| {
                s.color = gray.to_string();
                s.font_size_px = 14.0;
            }),
        );
        b.push_child(
            body,
            ElementSpec::new("h2").text("large").style(|s| {
                s.color = gray.to_string();
                s.font_size_px = 28.0;
            }),
        );
        let issues = ColorContrastRule.check(&b.build(), &RuleOptions::default());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].selector, "p");
    }

    #[test]
    fn background_resolves_through_transparent_ancestors() {
        let mut b = PageSnapshot::builder("https://a.com", "t");
        let body = b.push(ElementSpec::new("body").style(|s| {
            s.background_color = "rgb(30, 30, 30)".to_string();
        }));
        let div = b.push_child(body, ElementSpec::new("div"));
        // light gray on dark background: fine
        b.push_child(
            div,
            ElementSpec::new("p").text("ok").style(|s| {
                s.color = "rgb(230, 230, 230)".to_string();
            }),
        );
        assert!(ColorContrastRule
            .check(&b.build(), &RuleOptions::default())
            .is_empty());
    }
}
