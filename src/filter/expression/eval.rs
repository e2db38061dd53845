//! AST evaluator with short-circuit logic.
//!
//! Field paths resolve against the observation's JSON view; a missing path
//! yields `Null`. Comparison semantics: severity names compare on the
//! CRITICAL>HIGH>MEDIUM>LOW>UNKNOWN ordinal, otherwise both sides are tried
//! as floats, otherwise the comparison is lexical (case-insensitive).
//! Errors bubble to the filter engine, which treats them as "fall through to
//! list rules", never as a reject.

use serde_json::Value;

use super::{CmpOp, Expr, ExprValue, ExpressionError, MacroName};
use crate::types::Severity;

/// Evaluate an expression against an observation's JSON view.
pub fn evaluate(expr: &Expr, root: &Value) -> Result<bool, ExpressionError> {
    Ok(truthy(&eval_value(expr, root)?))
}

fn eval_value(expr: &Expr, root: &Value) -> Result<ExprValue, ExpressionError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Field(path) => Ok(resolve_path(root, path)),
        Expr::Comparison { op, left, right } => {
            let result = eval_comparison(*op, left, right.as_deref(), root)?;
            Ok(ExprValue::Bool(result))
        }
        Expr::And(operands) => {
            for operand in operands {
                if !truthy(&eval_value(operand, root)?) {
                    return Ok(ExprValue::Bool(false));
                }
            }
            Ok(ExprValue::Bool(true))
        }
        Expr::Or(operands) => {
            for operand in operands {
                if truthy(&eval_value(operand, root)?) {
                    return Ok(ExprValue::Bool(true));
                }
            }
            Ok(ExprValue::Bool(false))
        }
        Expr::Not(inner) => Ok(ExprValue::Bool(!truthy(&eval_value(inner, root)?))),
        Expr::Macro(mac) => Ok(ExprValue::Bool(eval_macro(*mac, root))),
    }
}

fn eval_comparison(
    op: CmpOp,
    left: &Expr,
    right: Option<&Expr>,
    root: &Value,
) -> Result<bool, ExpressionError> {
    let lhs = eval_value(left, root)?;

    // EXISTS / NOT EXISTS only ask whether the path resolved.
    match op {
        CmpOp::Exists => return Ok(lhs != ExprValue::Null),
        CmpOp::NotExists => return Ok(lhs == ExprValue::Null),
        _ => {}
    }

    let rhs = match right {
        Some(r) => eval_value(r, root)?,
        None => return Err(ExpressionError::Parse(format!("operator {} needs a right operand", op))),
    };

    match op {
        CmpOp::Eq => Ok(loose_eq(&lhs, &rhs)),
        CmpOp::Ne => Ok(!loose_eq(&lhs, &rhs)),
        CmpOp::Gt | CmpOp::Ge | CmpOp::Lt | CmpOp::Le => {
            let ord = compare_ordered(op, &lhs, &rhs)?;
            Ok(ord)
        }
        CmpOp::In => membership(&lhs, &rhs, op),
        CmpOp::NotIn => membership(&lhs, &rhs, op).map(|b| !b),
        CmpOp::Contains => contains(&lhs, &rhs, op),
        CmpOp::StartsWith => {
            let (l, r) = both_strings(&lhs, &rhs, op)?;
            Ok(l.to_lowercase().starts_with(&r.to_lowercase()))
        }
        CmpOp::EndsWith => {
            let (l, r) = both_strings(&lhs, &rhs, op)?;
            Ok(l.to_lowercase().ends_with(&r.to_lowercase()))
        }
        // Unary forms are handled by the early return above.
        CmpOp::Exists | CmpOp::NotExists => {
            Err(ExpressionError::Parse(format!("operator {} takes no right operand", op)))
        }
    }
}

fn eval_macro(mac: MacroName, root: &Value) -> bool {
    let severity = root
        .get("severity")
        .and_then(Value::as_str)
        .and_then(Severity::parse)
        .unwrap_or(Severity::Unknown);
    let category = root
        .get("category")
        .and_then(Value::as_str)
        .unwrap_or_default();

    match mac {
        MacroName::IsCritical => severity == Severity::Critical,
        MacroName::IsHigh => severity >= Severity::High,
        MacroName::IsSecurity => category.eq_ignore_ascii_case("security"),
        MacroName::IsCompliance => category.eq_ignore_ascii_case("compliance"),
    }
}

// ============================================================================
// Field resolution
// ============================================================================

/// Walk a dotted path through nested objects (numeric segments index arrays).
/// Any miss yields `Null`.
fn resolve_path(root: &Value, path: &str) -> ExprValue {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => match map.get(segment) {
                Some(v) => v,
                None => return ExprValue::Null,
            },
            Value::Array(items) => match segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                Some(v) => v,
                None => return ExprValue::Null,
            },
            _ => return ExprValue::Null,
        };
    }
    from_json(current)
}

fn from_json(v: &Value) -> ExprValue {
    match v {
        Value::Null => ExprValue::Null,
        Value::Bool(b) => ExprValue::Bool(*b),
        Value::Number(n) => n.as_f64().map_or(ExprValue::Null, ExprValue::Number),
        Value::String(s) => ExprValue::Str(s.clone()),
        Value::Array(items) => ExprValue::List(items.iter().map(from_json).collect()),
        // Objects have no literal form; treat as opaque truthy markers.
        Value::Object(_) => ExprValue::Bool(true),
    }
}

// ============================================================================
// Comparison semantics
// ============================================================================

fn truthy(v: &ExprValue) -> bool {
    match v {
        ExprValue::Null => false,
        ExprValue::Bool(b) => *b,
        ExprValue::Number(n) => *n != 0.0,
        ExprValue::Str(s) => !s.is_empty(),
        ExprValue::List(items) => !items.is_empty(),
    }
}

/// Equality with coercion: numbers numerically, strings case-insensitively,
/// number-vs-string via float parse.
fn loose_eq(a: &ExprValue, b: &ExprValue) -> bool {
    match (a, b) {
        (ExprValue::Null, ExprValue::Null) => true,
        (ExprValue::Null, _) | (_, ExprValue::Null) => false,
        (ExprValue::Bool(x), ExprValue::Bool(y)) => x == y,
        (ExprValue::Number(x), ExprValue::Number(y)) => x == y,
        (ExprValue::Str(x), ExprValue::Str(y)) => x.eq_ignore_ascii_case(y),
        (ExprValue::Number(x), ExprValue::Str(y)) | (ExprValue::Str(y), ExprValue::Number(x)) => {
            y.trim().parse::<f64>().map(|p| p == *x).unwrap_or(false)
        }
        (ExprValue::List(x), ExprValue::List(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(i, j)| loose_eq(i, j))
        }
        _ => false,
    }
}

/// Ordered comparison: severity ordinal, then numeric, then lexical.
fn compare_ordered(op: CmpOp, lhs: &ExprValue, rhs: &ExprValue) -> Result<bool, ExpressionError> {
    if matches!(lhs, ExprValue::Null) || matches!(rhs, ExprValue::Null) {
        return Err(ExpressionError::NilOperand(op));
    }

    // Severity ordinal when both sides name severities.
    if let (ExprValue::Str(l), ExprValue::Str(r)) = (lhs, rhs) {
        if let (Some(ls), Some(rs)) = (Severity::parse(l), Severity::parse(r)) {
            return Ok(apply_ordering(op, ls.rank().cmp(&rs.rank())));
        }
    }

    // Numeric when both sides parse as floats.
    if let (Some(l), Some(r)) = (as_number(lhs), as_number(rhs)) {
        let ord = l
            .partial_cmp(&r)
            .ok_or(ExpressionError::Incomparable("number", op))?;
        return Ok(apply_ordering(op, ord));
    }

    // Lexical fallback.
    match (lhs, rhs) {
        (ExprValue::Str(l), ExprValue::Str(r)) => {
            Ok(apply_ordering(op, l.to_lowercase().cmp(&r.to_lowercase())))
        }
        _ => Err(ExpressionError::Incomparable("mixed", op)),
    }
}

fn apply_ordering(op: CmpOp, ord: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match op {
        CmpOp::Gt => ord == Greater,
        CmpOp::Ge => ord != Less,
        CmpOp::Lt => ord == Less,
        CmpOp::Le => ord != Greater,
        _ => false,
    }
}

fn as_number(v: &ExprValue) -> Option<f64> {
    match v {
        ExprValue::Number(n) => Some(*n),
        ExprValue::Str(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn membership(lhs: &ExprValue, rhs: &ExprValue, op: CmpOp) -> Result<bool, ExpressionError> {
    match rhs {
        ExprValue::List(items) => Ok(items.iter().any(|item| loose_eq(lhs, item))),
        _ => Err(ExpressionError::ListRequired(op)),
    }
}

fn contains(lhs: &ExprValue, rhs: &ExprValue, op: CmpOp) -> Result<bool, ExpressionError> {
    match (lhs, rhs) {
        (ExprValue::Str(l), ExprValue::Str(r)) => {
            Ok(l.to_lowercase().contains(&r.to_lowercase()))
        }
        (ExprValue::List(items), needle) => Ok(items.iter().any(|item| loose_eq(item, needle))),
        _ => Err(ExpressionError::Incomparable("contains", op)),
    }
}

fn both_strings<'a>(
    lhs: &'a ExprValue,
    rhs: &'a ExprValue,
    op: CmpOp,
) -> Result<(&'a str, &'a str), ExpressionError> {
    match (lhs, rhs) {
        (ExprValue::Str(l), ExprValue::Str(r)) => Ok((l, r)),
        (ExprValue::Null, _) | (_, ExprValue::Null) => Err(ExpressionError::NilOperand(op)),
        _ => Err(ExpressionError::Incomparable("string", op)),
    }
}

#[cfg(test)]
mod tests {
    use super::super::parse;
    use super::*;

    fn obs() -> Value {
        serde_json::json!({
            "source": "falco",
            "category": "security",
            "eventType": "shell_in_container",
            "severity": "HIGH",
            "namespace": "default",
            "resource": {"kind": "Pod", "name": "web-1"},
            "details": {"rule": "Terminal shell in container", "count": 3},
            "priority": 0.8,
            "spec": {"severity": "HIGH", "category": "security"}
        })
    }

    fn eval(src: &str) -> Result<bool, ExpressionError> {
        evaluate(&parse(src)?, &obs())
    }

    #[test]
    fn severity_ordinal_comparison() {
        assert!(eval("spec.severity >= \"HIGH\"").unwrap());
        assert!(eval("severity > \"MEDIUM\"").unwrap());
        assert!(!eval("severity >= \"CRITICAL\"").unwrap());
        assert!(eval("severity < \"CRITICAL\"").unwrap());
    }

    #[test]
    fn combined_and_expression() {
        assert!(eval("spec.severity >= \"HIGH\" AND spec.category = \"security\"").unwrap());
        assert!(!eval("spec.severity >= \"HIGH\" AND spec.category = \"compliance\"").unwrap());
    }

    #[test]
    fn numeric_comparison_with_coercion() {
        assert!(eval("details.count > 2").unwrap());
        assert!(eval("priority >= 0.5").unwrap());
        assert!(!eval("priority > \"0.9\"").unwrap());
    }

    #[test]
    fn lexical_fallback() {
        assert!(eval("namespace > \"aaa\"").unwrap());
        assert!(eval("namespace < \"zzz\"").unwrap());
    }

    #[test]
    fn membership_operators() {
        assert!(eval("namespace IN [\"default\", \"prod\"]").unwrap());
        assert!(eval("namespace NOT IN [\"kube-system\"]").unwrap());
        assert!(!eval("namespace NOT IN [\"default\"]").unwrap());
    }

    #[test]
    fn string_operators_are_case_insensitive() {
        assert!(eval("details.rule CONTAINS \"SHELL\"").unwrap());
        assert!(eval("eventType STARTS_WITH \"shell\"").unwrap());
        assert!(eval("resource.name ENDS_WITH \"-1\"").unwrap());
        assert!(eval("source = \"FALCO\"").unwrap());
    }

    #[test]
    fn exists_operators() {
        assert!(eval("details.rule EXISTS").unwrap());
        assert!(eval("details.missing NOT EXISTS").unwrap());
        assert!(!eval("details.missing EXISTS").unwrap());
    }

    #[test]
    fn missing_field_yields_nil_errors_for_ordering() {
        assert_eq!(
            eval("details.missing > 1"),
            Err(ExpressionError::NilOperand(CmpOp::Gt))
        );
    }

    #[test]
    fn missing_field_equality_is_false_not_error() {
        assert!(!eval("details.missing = \"x\"").unwrap());
        assert!(eval("details.missing != \"x\"").unwrap());
    }

    #[test]
    fn macros() {
        assert!(eval("is_high").unwrap());
        assert!(!eval("is_critical").unwrap());
        assert!(eval("is_security").unwrap());
        assert!(!eval("is_compliance").unwrap());
        assert!(eval("is_high AND is_security").unwrap());
    }

    #[test]
    fn short_circuit_skips_erroring_operand() {
        // Second operand would raise NilOperand, but OR short-circuits first.
        assert!(eval("is_high OR details.missing > 1").unwrap());
    }

    #[test]
    fn truthiness_of_bare_fields() {
        assert!(eval("details.rule").unwrap());
        assert!(!eval("details.missing").unwrap());
    }

    #[test]
    fn not_negates() {
        assert!(eval("NOT is_compliance").unwrap());
        assert!(!eval("NOT is_security").unwrap());
    }
}
