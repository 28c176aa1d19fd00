//! Deterministic tier decision from tool name and argument patterns.
//!
//! `classify` is a pure function of `(toolName, toolInput, rules)`: no I/O,
//! no clock, no RNG. Rule loading (which does touch disk) lives in
//! `load_rules` and is kept separate so the decision function itself stays
//! trivially unit-testable.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};

/// Which of the three tiers a tool call was classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    AutoApprove,
    Notify,
    RequireApproval,
}

impl Tier {
    fn rank(self) -> u8 {
        match self {
            Tier::AutoApprove => 0,
            Tier::Notify => 1,
            Tier::RequireApproval => 2,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::AutoApprove => write!(f, "auto-approve"),
            Tier::Notify => write!(f, "notify"),
            Tier::RequireApproval => write!(f, "require-approval"),
        }
    }
}

/// One classifier rule. Matches a tool call when `tool_name` equals the
/// call's tool name exactly and every `conditions` entry's glob matches the
/// stringified value at that field of the call's input. A field absent
/// from the input never matches (fail-safe).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub tier: Tier,
    pub tool_name: String,
    #[serde(default)]
    pub conditions: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<Rule>,
}

/// Result of classifying one proposed tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub tier: Tier,
    /// True iff an explicit rule matched; false for the fail-safe default.
    pub explicit: bool,
}

/// Classify a proposed tool call against a rule set.
///
/// Rules are scanned in tier order (auto-approve, then notify, then
/// require-approval) and, within a tier, in file order; the first match
/// wins. No match at all defaults to `require-approval`.
pub fn classify(tool_name: &str, tool_input: &Value, rules: &[Rule]) -> Classification {
    for tier in [Tier::AutoApprove, Tier::Notify, Tier::RequireApproval] {
        for rule in rules.iter().filter(|r| r.tier.rank() == tier.rank()) {
            if rule.tool_name != tool_name {
                continue;
            }
            if matches_conditions(rule.conditions.as_ref(), tool_input) {
                return Classification { tier, explicit: true };
            }
        }
    }
    Classification {
        tier: Tier::RequireApproval,
        explicit: false,
    }
}

fn matches_conditions(conditions: Option<&HashMap<String, String>>, input: &Value) -> bool {
    let Some(conditions) = conditions else {
        return true;
    };
    conditions.iter().all(|(field, pattern)| {
        match field_value(input, field) {
            Some(value) => glob_match(pattern, &value),
            None => false,
        }
    })
}

/// Pull a field's value out of the tool-call input object and stringify it.
/// Only top-level fields are addressed; the rule language has no
/// nested-path syntax.
fn field_value(input: &Value, field: &str) -> Option<String> {
    let value = input.get(field)?;
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Match `value` against `pattern`, a glob with `*` wildcards and an
/// optional leading `!(...)` negation wrapper.
///
/// `!(pattern)` means "does not match `pattern`". There is exactly one
/// level of negation; `!(...)` is not itself glob-matched recursively.
fn glob_match(pattern: &str, value: &str) -> bool {
    if let Some(inner) = pattern.strip_prefix("!(").and_then(|s| s.strip_suffix(")")) {
        return !glob_star_match(inner, value);
    }
    glob_star_match(pattern, value)
}

/// `*`-wildcard match: `*` consumes any run of characters (including none).
fn glob_star_match(pattern: &str, value: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let val: Vec<char> = value.chars().collect();
    glob_rec(&pat, &val)
}

fn glob_rec(pattern: &[char], value: &[char]) -> bool {
    match pattern.first() {
        None => value.is_empty(),
        Some('*') => {
            // Try consuming 0..=value.len() characters with the wildcard.
            for i in 0..=value.len() {
                if glob_rec(&pattern[1..], &value[i..]) {
                    return true;
                }
            }
            false
        }
        Some(c) => match value.first() {
            Some(v) if v == c => glob_rec(&pattern[1..], &value[1..]),
            _ => false,
        },
    }
}

/// Load a rule set from a TOML file of `[[rules]]` tables. Missing file is
/// not an error (empty rule set, everything falls to `require-approval`).
pub fn load_rules(path: &Path) -> Result<Vec<Rule>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path)?;
    let parsed: RuleFile = toml::from_str(&contents)
        .map_err(|e| CoreError::Config(format!("invalid classifier rules at {}: {e}", path.display())))?;
    Ok(parsed.rules)
}
