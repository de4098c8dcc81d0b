//! Pure built-in functions and value methods.
//!
//! Callback-taking array methods (`map`, `filter`, ...) need the
//! interpreter to run their arrow argument and live in the parent module.
//! Everything here works on already-evaluated arguments.

use serde_json::{Map, Value};

use bindgraph_core::expr::parser::number_value;
use bindgraph_core::Span;

use super::error::InterpreterError;
use super::value::{describe, strict_equals, to_js_string, to_number, truthy};

/// Global objects whose members are callable.
pub const NAMESPACES: &[&str] = &["Math", "JSON", "Object", "Array"];

/// Global conversion functions.
pub const FUNCTIONS: &[&str] = &["String", "Number", "Boolean", "parseInt", "parseFloat"];

pub fn is_namespace(name: &str) -> bool {
    NAMESPACES.contains(&name)
}

pub fn namespace_constant(namespace: &str, name: &str) -> Option<Value> {
    match (namespace, name) {
        ("Math", "PI") => Some(number_value(std::f64::consts::PI)),
        ("Math", "E") => Some(number_value(std::f64::consts::E)),
        _ => None,
    }
}

fn arg(args: &[Value], i: usize) -> &Value {
    args.get(i).unwrap_or(&Value::Null)
}

fn numeric(function: &str, value: &Value, span: Span) -> Result<f64, InterpreterError> {
    to_number(value).ok_or_else(|| {
        InterpreterError::invalid_args(function, format!("{} is not a number", describe(value)), span)
    })
}

fn number_or_null(f: f64) -> Value {
    if f.is_finite() {
        number_value(f)
    } else {
        Value::Null
    }
}

/// `Math.*`, `JSON.*`, `Object.*` and `Array.*`.
pub fn call_namespace(
    namespace: &str,
    name: &str,
    args: &[Value],
    span: Span,
) -> Result<Value, InterpreterError> {
    let qualified = format!("{namespace}.{name}");
    match (namespace, name) {
        ("Math", "abs" | "ceil" | "floor" | "round" | "sqrt") => {
            let x = numeric(&qualified, arg(args, 0), span)?;
            let result = match name {
                "abs" => x.abs(),
                "ceil" => x.ceil(),
                "floor" => x.floor(),
                // JavaScript rounds halves towards positive infinity.
                "round" => (x + 0.5).floor(),
                _ => x.sqrt(),
            };
            Ok(number_or_null(result))
        }
        ("Math", "min" | "max") => {
            let mut values = Vec::with_capacity(args.len());
            for a in args {
                values.push(numeric(&qualified, a, span)?);
            }
            if values.is_empty() {
                return Err(InterpreterError::invalid_args(
                    &qualified,
                    "expects at least one argument",
                    span,
                ));
            }
            let folded = if name == "min" {
                values.into_iter().fold(f64::INFINITY, f64::min)
            } else {
                values.into_iter().fold(f64::NEG_INFINITY, f64::max)
            };
            Ok(number_value(folded))
        }
        ("Math", "pow") => {
            let base = numeric(&qualified, arg(args, 0), span)?;
            let exp = numeric(&qualified, arg(args, 1), span)?;
            Ok(number_or_null(base.powf(exp)))
        }
        ("JSON", "stringify") => Ok(Value::String(arg(args, 0).to_string())),
        ("JSON", "parse") => {
            let Value::String(text) = arg(args, 0) else {
                return Err(InterpreterError::invalid_args(&qualified, "expects a string", span));
            };
            serde_json::from_str(text)
                .map_err(|e| InterpreterError::invalid_args(&qualified, e.to_string(), span))
        }
        ("Object", "keys" | "values" | "entries") => match arg(args, 0) {
            Value::Object(map) => Ok(Value::Array(
                map.iter()
                    .map(|(k, v)| match name {
                        "keys" => Value::String(k.clone()),
                        "values" => v.clone(),
                        _ => Value::Array(vec![Value::String(k.clone()), v.clone()]),
                    })
                    .collect(),
            )),
            Value::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| match name {
                        "keys" => Value::String(i.to_string()),
                        "values" => v.clone(),
                        _ => Value::Array(vec![Value::String(i.to_string()), v.clone()]),
                    })
                    .collect(),
            )),
            Value::Null => Err(InterpreterError::invalid_args(
                &qualified,
                "cannot convert null to object",
                span,
            )),
            _ => Ok(Value::Array(Vec::new())),
        },
        ("Array", "isArray") => Ok(Value::Bool(arg(args, 0).is_array())),
        _ => Err(InterpreterError::NotCallable {
            name: qualified,
            span,
        }),
    }
}

/// `String()`, `Number()`, `Boolean()`, `parseInt()`, `parseFloat()`.
pub fn call_function(name: &str, args: &[Value], span: Span) -> Result<Value, InterpreterError> {
    let first = arg(args, 0);
    match name {
        "String" => Ok(Value::String(to_js_string(first))),
        "Boolean" => Ok(Value::Bool(truthy(first))),
        "Number" => Ok(to_number(first).map_or(Value::Null, number_value)),
        "parseFloat" => Ok(parse_float_prefix(&to_js_string(first)).map_or(Value::Null, number_value)),
        "parseInt" => {
            let radix = match args.get(1) {
                None | Some(Value::Null) => None,
                Some(r) => Some(numeric("parseInt", r, span)? as u32),
            };
            Ok(parse_int_prefix(&to_js_string(first), radix).map_or(Value::Null, number_value))
        }
        _ => Err(InterpreterError::NotCallable {
            name: name.to_string(),
            span,
        }),
    }
}

fn parse_int_prefix(text: &str, radix: Option<u32>) -> Option<f64> {
    let mut s = text.trim();
    let negative = s.starts_with('-');
    s = s.strip_prefix(['-', '+']).unwrap_or(s);
    let radix = match radix {
        Some(r) if (2..=36).contains(&r) => r,
        Some(0) | None => {
            if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                s = hex;
                16
            } else {
                10
            }
        }
        Some(_) => return None,
    };
    let digits: String = s.chars().take_while(|c| c.is_digit(radix)).collect();
    if digits.is_empty() {
        return None;
    }
    let magnitude = digits
        .chars()
        .filter_map(|c| c.to_digit(radix))
        .fold(0.0, |acc, d| acc * radix as f64 + d as f64);
    Some(if negative { -magnitude } else { magnitude })
}

fn parse_float_prefix(text: &str) -> Option<f64> {
    let s = text.trim_start();
    // Longest prefix that parses. Float literals are short.
    (1..=s.len().min(64))
        .rev()
        .filter(|&end| s.is_char_boundary(end))
        .find_map(|end| s[..end].parse::<f64>().ok().filter(|f| f.is_finite()))
}

/// Reads `receiver.key` for non-entity values.
pub fn property(receiver: &Value, key: &str) -> Value {
    match receiver {
        Value::Object(map) => map.get(key).cloned().unwrap_or(Value::Null),
        Value::Array(items) => match key {
            "length" => Value::from(items.len()),
            _ => key
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Value::Null),
        },
        Value::String(s) => match key {
            "length" => Value::from(s.chars().count()),
            _ => Value::Null,
        },
        _ => Value::Null,
    }
}

/// Reads `receiver[index]` for a numeric index.
pub fn element(receiver: &Value, index: usize) -> Value {
    match receiver {
        Value::Array(items) => items.get(index).cloned().unwrap_or(Value::Null),
        Value::String(s) => s
            .chars()
            .nth(index)
            .map_or(Value::Null, |c| Value::String(c.to_string())),
        Value::Object(map) => map.get(&index.to_string()).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// Resolves JavaScript-style relative slice bounds.
fn bound(value: &Value, len: usize, default: usize) -> usize {
    match to_number(value) {
        Some(n) if !value.is_null() => {
            let n = n.trunc();
            if n < 0.0 {
                len.saturating_sub((-n) as usize)
            } else {
                (n as usize).min(len)
            }
        }
        _ => default,
    }
}

/// Methods that take no callback.
pub fn call_method(
    receiver: &Value,
    name: &str,
    args: &[Value],
    span: Span,
) -> Result<Value, InterpreterError> {
    match (receiver, name) {
        (_, "toString") => Ok(Value::String(to_js_string(receiver))),
        (Value::Array(items), "includes") => Ok(Value::Bool(
            items.iter().any(|item| strict_equals(item, arg(args, 0))),
        )),
        (Value::Array(items), "indexOf") => Ok(Value::from(
            items
                .iter()
                .position(|item| strict_equals(item, arg(args, 0)))
                .map_or(-1, |i| i as i64),
        )),
        (Value::Array(items), "join") => {
            let sep = match arg(args, 0) {
                Value::Null => ",".to_string(),
                other => to_js_string(other),
            };
            Ok(Value::String(
                items
                    .iter()
                    .map(|item| match item {
                        Value::Null => String::new(),
                        other => to_js_string(other),
                    })
                    .collect::<Vec<_>>()
                    .join(&sep),
            ))
        }
        (Value::Array(items), "slice") => {
            let start = bound(arg(args, 0), items.len(), 0);
            let end = bound(arg(args, 1), items.len(), items.len());
            Ok(Value::Array(
                items.get(start..end.max(start)).unwrap_or_default().to_vec(),
            ))
        }
        (Value::Array(items), "concat") => {
            let mut out = items.clone();
            for a in args {
                match a {
                    Value::Array(more) => out.extend(more.iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            Ok(Value::Array(out))
        }
        (Value::Array(items), "reverse") => Ok(Value::Array(items.iter().rev().cloned().collect())),
        (Value::String(s), _) => string_method(s, name, args, span),
        (Value::Number(n), "toFixed") => {
            let digits = match arg(args, 0) {
                Value::Null => 0,
                other => numeric("toFixed", other, span)? as usize,
            };
            if digits > 100 {
                return Err(InterpreterError::invalid_args(
                    "toFixed",
                    "digits must be between 0 and 100",
                    span,
                ));
            }
            let f = n.as_f64().unwrap_or_default();
            Ok(Value::String(format!("{f:.digits$}")))
        }
        _ => Err(InterpreterError::NotCallable {
            name: format!("{}.{name}", describe(receiver)),
            span,
        }),
    }
}

fn string_method(s: &str, name: &str, args: &[Value], span: Span) -> Result<Value, InterpreterError> {
    let text_arg = |i: usize| match arg(args, i) {
        Value::Null => String::new(),
        other => to_js_string(other),
    };
    match name {
        "toUpperCase" => Ok(Value::String(s.to_uppercase())),
        "toLowerCase" => Ok(Value::String(s.to_lowercase())),
        "trim" => Ok(Value::String(s.trim().to_string())),
        "includes" => Ok(Value::Bool(s.contains(&text_arg(0)))),
        "startsWith" => Ok(Value::Bool(s.starts_with(&text_arg(0)))),
        "endsWith" => Ok(Value::Bool(s.ends_with(&text_arg(0)))),
        "indexOf" => {
            let needle = text_arg(0);
            Ok(Value::from(
                s.find(&needle)
                    .map_or(-1, |byte| s[..byte].chars().count() as i64),
            ))
        }
        "split" => {
            let parts: Vec<Value> = match arg(args, 0) {
                Value::Null => vec![Value::String(s.to_string())],
                sep => {
                    let sep = to_js_string(sep);
                    if sep.is_empty() {
                        s.chars().map(|c| Value::String(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str())
                            .map(|p| Value::String(p.to_string()))
                            .collect()
                    }
                }
            };
            Ok(Value::Array(parts))
        }
        "slice" => {
            let chars: Vec<char> = s.chars().collect();
            let start = bound(arg(args, 0), chars.len(), 0);
            let end = bound(arg(args, 1), chars.len(), chars.len());
            Ok(Value::String(
                chars.get(start..end.max(start)).unwrap_or_default().iter().collect(),
            ))
        }
        "concat" => {
            let mut out = s.to_string();
            for a in args {
                out.push_str(&to_js_string(a));
            }
            Ok(Value::String(out))
        }
        _ => Err(InterpreterError::NotCallable {
            name: format!("string.{name}"),
            span,
        }),
    }
}

/// Builds an object value from key/value pairs, last key wins.
pub fn object(fields: impl IntoIterator<Item = (String, Value)>) -> Value {
    Value::Object(fields.into_iter().collect::<Map<String, Value>>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn span() -> Span {
        Span::default()
    }

    #[test]
    fn math_functions() {
        assert_eq!(call_namespace("Math", "max", &[json!(1), json!(7), json!(3)], span()).unwrap(), json!(7));
        assert_eq!(call_namespace("Math", "round", &[json!(2.5)], span()).unwrap(), json!(3));
        assert_eq!(call_namespace("Math", "round", &[json!(-2.5)], span()).unwrap(), json!(-2));
        assert!(call_namespace("Math", "min", &[], span()).is_err());
        assert!(call_namespace("Math", "random", &[], span()).is_err());
    }

    #[test]
    fn json_and_object_helpers() {
        let parsed = call_namespace("JSON", "parse", &[json!("{\"a\":[1,2]}")], span()).unwrap();
        assert_eq!(parsed, json!({"a": [1, 2]}));
        assert_eq!(
            call_namespace("Object", "keys", &[json!({"b": 1, "a": 2})], span()).unwrap(),
            json!(["a", "b"])
        );
        assert!(call_namespace("JSON", "parse", &[json!("{")], span()).is_err());
    }

    #[test]
    fn conversions() {
        assert_eq!(call_function("parseInt", &[json!("42px")], span()).unwrap(), json!(42));
        assert_eq!(call_function("parseInt", &[json!("ff"), json!(16)], span()).unwrap(), json!(255));
        assert_eq!(call_function("parseFloat", &[json!("3.5kg")], span()).unwrap(), json!(3.5));
        assert_eq!(call_function("Number", &[json!("abc")], span()).unwrap(), Value::Null);
        assert_eq!(call_function("String", &[json!([1, 2])], span()).unwrap(), json!("1,2"));
    }

    #[test]
    fn array_and_string_methods() {
        let items = json!([1, 2, 3, 4]);
        assert_eq!(call_method(&items, "slice", &[json!(-2)], span()).unwrap(), json!([3, 4]));
        assert_eq!(call_method(&items, "join", &[json!("-")], span()).unwrap(), json!("1-2-3-4"));
        assert_eq!(call_method(&items, "indexOf", &[json!(3)], span()).unwrap(), json!(2));
        assert_eq!(call_method(&json!("a,b"), "split", &[json!(",")], span()).unwrap(), json!(["a", "b"]));
        assert_eq!(call_method(&json!(3.14159), "toFixed", &[json!(2)], span()).unwrap(), json!("3.14"));
        assert!(matches!(
            call_method(&json!(5), "push", &[], span()),
            Err(InterpreterError::NotCallable { .. })
        ));
    }

    #[test]
    fn property_reads() {
        assert_eq!(property(&json!([1, 2]), "length"), json!(2));
        assert_eq!(property(&json!("héllo"), "length"), json!(5));
        assert_eq!(element(&json!("abc"), 1), json!("b"));
        assert_eq!(property(&json!({"a": 1}), "missing"), Value::Null);
    }
}
