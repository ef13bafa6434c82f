mod common;

use axscan::application::rules::{RuleEngine, RuleOptions};
use axscan::domain::issue::{IssueType, Severity};

use common::fixtures::{clean_page, page_with_three_issues};

#[test]
fn clean_page_produces_no_issues() {
    let engine = RuleEngine::with_default_catalog();
    let outcome = engine.run_all(&clean_page(), &[], &[], &RuleOptions::default());
    assert!(
        outcome.issues.is_empty(),
        "unexpected issues: {:?}",
        outcome.issues.iter().map(|i| &i.title).collect::<Vec<_>>()
    );
    assert_eq!(outcome.timings.len(), engine.rule_ids().len());
}

#[test]
fn broken_page_produces_expected_findings() {
    let engine = RuleEngine::with_default_catalog();
    let outcome = engine.run_all(&page_with_three_issues(), &[], &[], &RuleOptions::default());
    assert_eq!(outcome.issues.len(), 3);

    let alt = outcome
        .issues
        .iter()
        .find(|i| i.issue_type == IssueType::MissingAltText)
        .expect("missing-alt finding");
    assert_eq!(alt.severity, Severity::Critical);
    assert_eq!(alt.wcag_criterion, "1.1.1");
    assert_eq!(alt.selector, "img");
    assert_eq!(alt.context.image.as_ref().unwrap().src, "chart.png");
    assert!(alt.context.parent_chain.starts_with(&["main".to_string()]));

    let heading = outcome
        .issues
        .iter()
        .find(|i| i.issue_type == IssueType::HeadingStructure)
        .expect("heading finding");
    assert_eq!(heading.severity, Severity::Major);
    assert_eq!(heading.wcag_criterion, "1.3.1");
    assert_eq!(heading.selector, "h3");

    let form = outcome
        .issues
        .iter()
        .find(|i| i.issue_type == IssueType::FormLabels)
        .expect("form finding");
    assert_eq!(form.severity, Severity::Critical);
    assert_eq!(form.wcag_criterion, "3.3.2");
    assert_eq!(form.selector, "input");
}

#[test]
fn findings_are_deterministic_across_runs() {
    let engine = RuleEngine::with_default_catalog();
    let page = page_with_three_issues();
    let first = engine.run_all(&page, &[], &[], &RuleOptions::default());
    let second = engine.run_all(&page, &[], &[], &RuleOptions::default());

    let ids_first: Vec<_> = first.issues.iter().map(|i| i.id).collect();
    let ids_second: Vec<_> = second.issues.iter().map(|i| i.id).collect();
    assert_eq!(ids_first, ids_second);
}

#[test]
fn include_and_exclude_compose() {
    let engine = RuleEngine::with_default_catalog();
    let page = page_with_three_issues();

    let only_alt = engine.run_all(
        &page,
        &["missing-alt-text".to_string()],
        &[],
        &RuleOptions::default(),
    );
    assert_eq!(only_alt.issues.len(), 1);
    assert_eq!(only_alt.issues[0].issue_type, IssueType::MissingAltText);

    let included_then_excluded = engine.run_all(
        &page,
        &["missing-alt-text".to_string()],
        &["missing-alt-text".to_string()],
        &RuleOptions::default(),
    );
    assert!(included_then_excluded.issues.is_empty());
    assert!(included_then_excluded.timings.is_empty());

    let without_headings = engine.run_all(
        &page,
        &[],
        &["heading-structure".to_string()],
        &RuleOptions::default(),
    );
    assert_eq!(without_headings.issues.len(), 2);
    assert!(
        !without_headings
            .issues
            .iter()
            .any(|i| i.issue_type == IssueType::HeadingStructure)
    );
}

#[test]
fn unknown_rule_ids_are_ignored() {
    let engine = RuleEngine::with_default_catalog();
    let outcome = engine.run_all(
        &page_with_three_issues(),
        &[],
        &["no-such-rule".to_string()],
        &RuleOptions::default(),
    );
    assert_eq!(outcome.issues.len(), 3);
}
