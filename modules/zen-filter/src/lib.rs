//! Filter Engine: compiles per-source declarative predicate sets into
//! an evaluator that, given a raw event, returns admit/deny + reason.
//!
//! Grounded on `rootsignal-scout::pipeline::geo_filter` — pure verdict
//! functions over a config struct — generalized from geography-specific
//! checks to arbitrary field-path predicates over an opaque JSON payload.

use serde_json::Value;
use thiserror::Error;
use zen_common::path::resolve_path;
use zen_common::{FilterRule, Operator, RawEvent};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterCompileError {
    #[error("rule for field {field_path:?}: invalid regex: {reason}")]
    InvalidRegex { field_path: String, reason: String },
    #[error("rule has empty field_path")]
    EmptyFieldPath,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Admit,
    Deny { reason: String },
}

impl Verdict {
    pub fn is_admit(&self) -> bool {
        matches!(self, Verdict::Admit)
    }
}

struct CompiledRule {
    field_path: String,
    operator: Operator,
    values: Vec<Value>,
    negate: bool,
    regex: Option<regex::Regex>,
}

/// A compiled, immutable rule set. Compiled once per config version; swapped
/// atomically on hot-reload. In-flight events keep evaluating against
/// whichever `CompiledFilter` they started with.
pub struct CompiledFilter {
    rules: Vec<CompiledRule>,
}

/// Compile declarative rules in declared order. Fails compilation if a
/// `matches` rule carries an invalid regex — the caller (Source
/// Configuration Store) rejects the whole config version on this error and
/// keeps the previously accepted one active.
pub fn compile(rules: &[FilterRule]) -> Result<CompiledFilter, FilterCompileError> {
    let mut compiled = Vec::with_capacity(rules.len());
    for rule in rules {
        if rule.field_path.trim().is_empty() {
            return Err(FilterCompileError::EmptyFieldPath);
        }
        let regex = if rule.operator == Operator::Matches {
            let pattern = rule
                .values
                .first()
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            Some(
                regex::Regex::new(pattern).map_err(|e| FilterCompileError::InvalidRegex {
                    field_path: rule.field_path.clone(),
                    reason: e.to_string(),
                })?,
            )
        } else {
            None
        };
        compiled.push(CompiledRule {
            field_path: rule.field_path.clone(),
            operator: rule.operator,
            values: rule.values.clone(),
            negate: rule.negate,
            regex,
        });
    }
    Ok(CompiledFilter { rules: compiled })
}

/// Evaluate `event` against `filter`. Rules run in declared order; the
/// first rule whose effective criterion fails denies the event and short-
/// circuits. An empty rule set admits everything.
pub fn evaluate(event: &RawEvent, filter: &CompiledFilter) -> Verdict {
    for rule in &filter.rules {
        let resolved = resolve_path(&event.payload, &rule.field_path);
        match eval_one(rule, resolved) {
            Ok(true) => continue,
            Ok(false) => {
                return Verdict::Deny {
                    reason: operator_reason(rule.operator),
                }
            }
            Err(reason) => return Verdict::Deny { reason },
        }
    }
    Verdict::Admit
}

fn operator_reason(op: Operator) -> String {
    format!("{op:?}").to_lowercase()
}

/// Returns `Ok(effective)` where `effective` already accounts for `negate`,
/// or `Err(reason)` for a hard deny (ambiguous type, eval error).
fn eval_one(rule: &CompiledRule, resolved: Option<&Value>) -> Result<bool, String> {
    let raw_match = match rule.operator {
        Operator::Exists => resolved.is_some(),
        Operator::NotExists => resolved.is_none(),
        Operator::Equals => match resolved {
            Some(v) => values_equal(v, rule.values.first()),
            None => false,
        },
        Operator::NotEquals => match resolved {
            Some(v) => !values_equal(v, rule.values.first()),
            None => true,
        },
        Operator::In => match resolved {
            Some(v) => rule.values.iter().any(|candidate| values_equal(v, Some(candidate))),
            None => false,
        },
        Operator::NotIn => match resolved {
            Some(v) => !rule.values.iter().any(|candidate| values_equal(v, Some(candidate))),
            None => true,
        },
        Operator::Matches => match resolved.and_then(|v| v.as_str()) {
            Some(s) => rule
                .regex
                .as_ref()
                .map(|re| re.is_match(s))
                .unwrap_or(false),
            None => false,
        },
        Operator::Contains => match resolved {
            Some(Value::String(s)) => {
                let needle = rule.values.first().and_then(|v| v.as_str()).unwrap_or_default();
                s.contains(needle)
            }
            Some(Value::Array(arr)) => {
                let needle = rule.values.first();
                arr.iter().any(|item| values_equal(item, needle))
            }
            _ => false,
        },
        Operator::GreaterThan => return numeric_compare(resolved, rule.values.first(), |a, b| a > b),
        Operator::LessThan => return numeric_compare(resolved, rule.values.first(), |a, b| a < b),
        Operator::Between => {
            let lo = rule.values.first();
            let hi = rule.values.get(1);
            let ge_lo = numeric_compare(resolved, lo, |a, b| a >= b)?;
            let le_hi = numeric_compare(resolved, hi, |a, b| a <= b)?;
            ge_lo && le_hi
        }
    };
    Ok(raw_match ^ rule.negate)
}

/// Equality with light numeric coercion: a string-encoded number compares
/// equal to the corresponding JSON number when that coercion is unambiguous.
fn values_equal(a: &Value, b: Option<&Value>) -> bool {
    let Some(b) = b else { return false };
    if a == b {
        return true;
    }
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
        _ => false,
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Numeric comparisons coerce string-encoded numbers when unambiguous;
/// ambiguous comparisons (non-numeric, non-numeric-string) deny with reason
/// `type_mismatch`.
fn numeric_compare(
    resolved: Option<&Value>,
    bound: Option<&Value>,
    cmp: impl Fn(f64, f64) -> bool,
) -> Result<bool, String> {
    let (Some(resolved), Some(bound)) = (resolved, bound) else {
        return Ok(false);
    };
    match (as_number(resolved), as_number(bound)) {
        (Some(a), Some(b)) => Ok(cmp(a, b)),
        _ => Err("type_mismatch".to_string()),
    }
}
