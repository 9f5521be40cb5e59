use crate::models::NormalizedAttributes;
use crate::rules::{matches, RuleTable, TierRule};
use serde::Serialize;

/// First enabled rule whose predicate holds. Total because a validated table
/// ends with a catch-all.
pub fn classify<'a>(attrs: &NormalizedAttributes, table: &'a RuleTable) -> &'a TierRule {
    table
        .enabled()
        .find(|rule| matches(&rule.when, attrs))
        .unwrap_or_else(|| table.terminal())
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleTrace {
    pub id: String,
    pub enabled: bool,
    pub matched: bool,
    pub selected: bool,
}

/// Per-rule match trace, for diagnosing shadowed rules.
pub fn explain(attrs: &NormalizedAttributes, table: &RuleTable) -> Vec<RuleTrace> {
    let selected = classify(attrs, table).id.as_str();
    table
        .rules()
        .iter()
        .map(|rule| RuleTrace {
            id: rule.id.clone(),
            enabled: rule.enabled,
            matched: rule.enabled && matches(&rule.when, attrs),
            selected: rule.id == selected,
        })
        .collect()
}
