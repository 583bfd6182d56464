//! Condition evaluation for policy and playbook selection.
//!
//! Conditions are JSON objects, either flat or nested under `match`, plus an
//! optional root `priority`. Every present predicate must hold (AND). String
//! comparisons are case-insensitive. Missing inputs never satisfy a
//! predicate that needs them, and malformed predicates are logged and count
//! as a non-match.

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Predicate keys, in evaluation order.
const PREDICATES: [&str; 6] = [
    "domain",
    "exception_type",
    "severity",
    "severity_in",
    "sla_minutes_remaining_lt",
    "policy_tags",
];

/// Exception attributes the engine matches against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionAttributes {
    #[serde(default, alias = "domain_name")]
    pub domain: Option<String>,
    #[serde(default)]
    pub exception_type: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
}

impl ExceptionAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_exception_type(mut self, exception_type: impl Into<String>) -> Self {
        self.exception_type = Some(exception_type.into());
        self
    }

    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = Some(severity.into());
        self
    }
}

/// Outcome of evaluating one condition block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionMatch {
    pub matches: bool,
    pub priority: i64,
    pub reason: String,
    /// Predicates actually checked, in evaluation order.
    pub checked_conditions: Vec<String>,
}

impl ConditionMatch {
    fn no_match(priority: i64, reason: impl Into<String>, checked: Vec<String>) -> Self {
        Self {
            matches: false,
            priority,
            reason: reason.into(),
            checked_conditions: checked,
        }
    }
}

enum Check {
    Pass,
    Fail(String),
    Malformed(String),
}

/// Evaluate `conditions` against an exception.
pub fn evaluate(
    conditions: &Value,
    exception: &ExceptionAttributes,
    policy_tags: &[String],
    sla_minutes_remaining: Option<f64>,
) -> ConditionMatch {
    let root = match conditions {
        Value::Null => return ConditionMatch::no_match(0, "no conditions", Vec::new()),
        Value::Object(map) if map.is_empty() => {
            return ConditionMatch::no_match(0, "no conditions", Vec::new())
        }
        Value::Object(map) => map,
        other => {
            warn!(event = "conditions.malformed", kind = %json_kind(other), "conditions must be an object");
            return ConditionMatch::no_match(0, "malformed conditions: expected an object", Vec::new());
        }
    };

    let priority = read_priority(root);

    let predicates = match root.get("match") {
        Some(Value::Object(nested)) => nested,
        Some(other) => {
            warn!(event = "conditions.malformed", key = "match", kind = %json_kind(other));
            return ConditionMatch::no_match(
                priority,
                "malformed conditions: 'match' must be an object",
                Vec::new(),
            );
        }
        None => root,
    };

    let mut checked = Vec::new();
    for name in PREDICATES {
        let Some(expected) = predicates.get(name) else {
            continue;
        };
        checked.push(name.to_string());

        let check = match name {
            "domain" => check_exact(name, expected, exception.domain.as_deref()),
            "exception_type" => check_exception_type(expected, exception.exception_type.as_deref()),
            "severity" => check_severity(name, expected, exception.severity.as_deref(), true),
            "severity_in" => check_severity(name, expected, exception.severity.as_deref(), false),
            "sla_minutes_remaining_lt" => check_sla(expected, sla_minutes_remaining),
            _ => check_policy_tags(expected, policy_tags),
        };

        match check {
            Check::Pass => {}
            Check::Fail(reason) => return ConditionMatch::no_match(priority, reason, checked),
            Check::Malformed(reason) => {
                warn!(event = "conditions.malformed", predicate = %name, reason = %reason);
                return ConditionMatch::no_match(priority, format!("malformed {name}: {reason}"), checked);
            }
        }
    }

    let reason = if checked.is_empty() {
        "no predicates (vacuous match)".to_string()
    } else {
        format!("all {} conditions matched", checked.len())
    };
    ConditionMatch {
        matches: true,
        priority,
        reason,
        checked_conditions: checked,
    }
}

/// A matching candidate with its evaluation.
#[derive(Debug, Clone)]
pub struct RankedCandidate<'a, T> {
    pub candidate: &'a T,
    /// Declaration order of the candidate.
    pub index: usize,
    pub evaluation: ConditionMatch,
}

/// Evaluate every candidate and return the matching ones, highest priority
/// first. Ties keep declaration order.
pub fn rank_playbooks<'a, T, F>(
    candidates: &'a [T],
    conditions_of: F,
    exception: &ExceptionAttributes,
    policy_tags: &[String],
    sla_minutes_remaining: Option<f64>,
) -> Vec<RankedCandidate<'a, T>>
where
    F: Fn(&T) -> &Value,
{
    let mut ranked: Vec<RankedCandidate<'a, T>> = candidates
        .iter()
        .enumerate()
        .filter_map(|(index, candidate)| {
            let evaluation = evaluate(
                conditions_of(candidate),
                exception,
                policy_tags,
                sla_minutes_remaining,
            );
            evaluation.matches.then_some(RankedCandidate {
                candidate,
                index,
                evaluation,
            })
        })
        .collect();
    ranked.sort_by(|a, b| b.evaluation.priority.cmp(&a.evaluation.priority));
    ranked
}

fn read_priority(root: &Map<String, Value>) -> i64 {
    match root.get("priority") {
        None | Some(Value::Null) => 0,
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(other) => {
            warn!(event = "conditions.malformed", key = "priority", kind = %json_kind(other));
            0
        }
    }
}

fn check_exact(name: &str, expected: &Value, actual: Option<&str>) -> Check {
    let Some(expected) = expected.as_str() else {
        return Check::Malformed("expected a string".into());
    };
    match actual {
        None => Check::Fail(format!("{name} required '{expected}' but exception has none")),
        Some(actual) if actual.eq_ignore_ascii_case(expected) => Check::Pass,
        Some(actual) => Check::Fail(format!(
            "{name} mismatch: expected '{expected}', got '{actual}'"
        )),
    }
}

fn check_exception_type(expected: &Value, actual: Option<&str>) -> Check {
    let Some(pattern) = expected.as_str() else {
        return Check::Malformed("expected a string".into());
    };
    let Some(actual) = actual else {
        return Check::Fail(format!(
            "exception_type required '{pattern}' but exception has none"
        ));
    };
    if !pattern.contains(['*', '?']) {
        return check_exact("exception_type", expected, Some(actual));
    }
    match RegexBuilder::new(&glob_to_regex(pattern))
        .case_insensitive(true)
        .build()
    {
        Ok(re) if re.is_match(actual) => Check::Pass,
        Ok(_) => Check::Fail(format!(
            "exception_type '{actual}' does not match pattern '{pattern}'"
        )),
        Err(err) => Check::Malformed(err.to_string()),
    }
}

/// Translate a `*`/`?` glob into an anchored regex.
fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 2);
    out.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

fn check_severity(name: &str, expected: &Value, actual: Option<&str>, allow_scalar: bool) -> Check {
    let allowed: Vec<&str> = match expected {
        Value::String(s) if allow_scalar => vec![s.as_str()],
        Value::Array(items) => {
            let strings: Option<Vec<&str>> = items.iter().map(Value::as_str).collect();
            match strings {
                Some(strings) => strings,
                None => return Check::Malformed("list entries must be strings".into()),
            }
        }
        _ => return Check::Malformed("expected a string or a list of strings".into()),
    };
    let Some(actual) = actual else {
        return Check::Fail(format!("{name} required {allowed:?} but exception has none"));
    };
    if allowed.iter().any(|s| s.eq_ignore_ascii_case(actual)) {
        Check::Pass
    } else {
        Check::Fail(format!("{name} mismatch: '{actual}' not in {allowed:?}"))
    }
}

fn check_sla(expected: &Value, remaining: Option<f64>) -> Check {
    let Some(threshold) = expected.as_f64() else {
        return Check::Malformed("expected a number".into());
    };
    match remaining {
        None => Check::Fail("sla_minutes_remaining_lt requires SLA minutes remaining".into()),
        Some(remaining) if remaining < threshold => Check::Pass,
        Some(remaining) => Check::Fail(format!(
            "sla_minutes_remaining_lt: {remaining} is not below {threshold}"
        )),
    }
}

fn check_policy_tags(expected: &Value, provided: &[String]) -> Check {
    let Value::Array(required) = expected else {
        return Check::Malformed("expected a list of strings".into());
    };
    for tag in required {
        let Some(tag) = tag.as_str() else {
            return Check::Malformed("list entries must be strings".into());
        };
        if !provided.iter().any(|p| p.eq_ignore_ascii_case(tag)) {
            return Check::Fail(format!("policy_tags: missing required tag '{tag}'"));
        }
    }
    Check::Pass
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
