//! JavaScript-flavoured operations over `serde_json::Value`.
//!
//! Values are plain JSON. `undefined` collapses into `null`, and NaN or
//! infinities have no representation, so arithmetic that would produce them
//! fails with an [`InterpreterError`] instead.

use std::cmp::Ordering;

use serde_json::Value;

use bindgraph_core::expr::parser::number_value;
use bindgraph_core::expr::BinaryOp;
use bindgraph_core::Span;

use super::error::InterpreterError;

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Numeric coercion. `None` where JavaScript would produce NaN.
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Null => Some(0.0),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Some(0.0)
            } else {
                trimmed.parse::<f64>().ok().filter(|f| f.is_finite())
            }
        }
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// `String(value)`.
pub fn to_js_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) => format_number(f),
            None => n.to_string(),
        },
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => to_js_string(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

pub fn format_number(f: f64) -> String {
    match number_value(f) {
        Value::Number(n) if n.is_i64() => n.to_string(),
        _ => f.to_string(),
    }
}

/// Text spliced into a mixed template. Objects and arrays render as JSON.
pub fn template_text(value: &Value) -> String {
    match value {
        Value::Array(_) | Value::Object(_) => value.to_string(),
        other => to_js_string(other),
    }
}

pub fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "undefined",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) | Value::Object(_) => "object",
    }
}

/// `===`. Numbers compare by value so `2` equals `2.0`; objects and
/// arrays compare structurally.
pub fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| strict_equals(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| strict_equals(v, w)))
        }
        _ => a == b,
    }
}

/// `==`: numbers, numeric strings and booleans coerce to number.
pub fn loose_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Number(_) | Value::Bool(_), Value::String(_) | Value::Bool(_) | Value::Number(_))
        | (Value::String(_), Value::Number(_) | Value::Bool(_)) => {
            match (to_number(a), to_number(b)) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        _ => strict_equals(a, b),
    }
}

/// Relational ordering: strings lexically, everything else numerically.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => to_number(a)?.partial_cmp(&to_number(b)?),
    }
}

fn finite(f: f64, span: Span) -> Result<Value, InterpreterError> {
    if f.is_finite() {
        Ok(number_value(f))
    } else {
        Err(InterpreterError::type_mismatch(
            "result is not a finite number",
            span,
        ))
    }
}

fn operand(value: &Value, op: BinaryOp, span: Span) -> Result<f64, InterpreterError> {
    to_number(value).ok_or_else(|| {
        InterpreterError::type_mismatch(
            format!("non-numeric operand {} for {op:?}", describe(value)),
            span,
        )
    })
}

/// Short description of a value for error messages.
pub fn describe(value: &Value) -> String {
    match value {
        Value::String(s) if s.chars().count() > 24 => {
            format!("\"{}...\"", s.chars().take(24).collect::<String>())
        }
        Value::String(s) => format!("\"{s}\""),
        Value::Array(_) => "array".to_string(),
        Value::Object(_) => "object".to_string(),
        other => to_js_string(other),
    }
}

pub fn binary(op: BinaryOp, lhs: &Value, rhs: &Value, span: Span) -> Result<Value, InterpreterError> {
    match op {
        BinaryOp::Add => {
            if lhs.is_string() || rhs.is_string() {
                let mut s = to_js_string(lhs);
                s.push_str(&to_js_string(rhs));
                return Ok(Value::String(s));
            }
            finite(operand(lhs, op, span)? + operand(rhs, op, span)?, span)
        }
        BinaryOp::Sub => finite(operand(lhs, op, span)? - operand(rhs, op, span)?, span),
        BinaryOp::Mul => finite(operand(lhs, op, span)? * operand(rhs, op, span)?, span),
        BinaryOp::Div | BinaryOp::Rem => {
            let l = operand(lhs, op, span)?;
            let r = operand(rhs, op, span)?;
            if r == 0.0 {
                return Err(InterpreterError::DivideByZero { span });
            }
            finite(if op == BinaryOp::Div { l / r } else { l % r }, span)
        }
        BinaryOp::Pow => finite(operand(lhs, op, span)?.powf(operand(rhs, op, span)?), span),
        BinaryOp::StrictEq => Ok(Value::Bool(strict_equals(lhs, rhs))),
        BinaryOp::StrictNotEq => Ok(Value::Bool(!strict_equals(lhs, rhs))),
        BinaryOp::Eq => Ok(Value::Bool(loose_equals(lhs, rhs))),
        BinaryOp::NotEq => Ok(Value::Bool(!loose_equals(lhs, rhs))),
        BinaryOp::Lt => Ok(Value::Bool(compare(lhs, rhs) == Some(Ordering::Less))),
        BinaryOp::Le => Ok(Value::Bool(matches!(
            compare(lhs, rhs),
            Some(Ordering::Less | Ordering::Equal)
        ))),
        BinaryOp::Gt => Ok(Value::Bool(compare(lhs, rhs) == Some(Ordering::Greater))),
        BinaryOp::Ge => Ok(Value::Bool(matches!(
            compare(lhs, rhs),
            Some(Ordering::Greater | Ordering::Equal)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(op: BinaryOp, a: Value, b: Value) -> Result<Value, InterpreterError> {
        binary(op, &a, &b, Span::default())
    }

    #[test]
    fn add_concatenates_when_either_side_is_a_string() {
        assert_eq!(eval(BinaryOp::Add, json!("n="), json!(5)).unwrap(), json!("n=5"));
        assert_eq!(eval(BinaryOp::Add, json!(1.5), json!("x")).unwrap(), json!("1.5x"));
        assert_eq!(eval(BinaryOp::Add, json!(5), json!(1)).unwrap(), json!(6));
    }

    #[test]
    fn integral_results_stay_integers() {
        assert_eq!(eval(BinaryOp::Div, json!(10), json!(4)).unwrap(), json!(2.5));
        assert_eq!(eval(BinaryOp::Div, json!(10), json!(5)).unwrap(), json!(2));
        assert_eq!(eval(BinaryOp::Pow, json!(2), json!(10)).unwrap(), json!(1024));
    }

    #[test]
    fn arithmetic_errors() {
        assert!(matches!(
            eval(BinaryOp::Div, json!(1), json!(0)),
            Err(InterpreterError::DivideByZero { .. })
        ));
        assert!(matches!(
            eval(BinaryOp::Mul, json!({"a": 1}), json!(2)),
            Err(InterpreterError::TypeMismatch { .. })
        ));
        assert!(eval(BinaryOp::Sub, json!("abc"), json!(1)).is_err());
        assert_eq!(eval(BinaryOp::Sub, json!("7"), json!(2)).unwrap(), json!(5));
    }

    #[test]
    fn equality_rules() {
        assert!(loose_equals(&json!("5"), &json!(5)));
        assert!(!strict_equals(&json!("5"), &json!(5)));
        assert!(strict_equals(&json!(2.0), &json!(2)));
        assert!(strict_equals(&json!({"a": [1]}), &json!({"a": [1.0]})));
        assert!(loose_equals(&json!(true), &json!(1)));
        assert!(!loose_equals(&Value::Null, &json!(0)));
    }

    #[test]
    fn comparisons() {
        assert_eq!(eval(BinaryOp::Lt, json!("a"), json!("b")).unwrap(), json!(true));
        assert_eq!(eval(BinaryOp::Ge, json!(3), json!("3")).unwrap(), json!(true));
        assert_eq!(eval(BinaryOp::Lt, json!("x"), json!(1)).unwrap(), json!(false));
    }

    #[test]
    fn string_conversion() {
        assert_eq!(to_js_string(&json!([1, null, "a"])), "1,,a");
        assert_eq!(to_js_string(&json!({"a": 1})), "[object Object]");
        assert_eq!(template_text(&json!({"a": 1})), "{\"a\":1}");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(3.0), "3");
    }

    #[test]
    fn truthiness() {
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(truthy(&json!([])));
        assert!(truthy(&json!("0")));
    }
}
