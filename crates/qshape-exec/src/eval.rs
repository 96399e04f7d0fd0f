//! Evaluation of finalized SQL expression trees against JSON documents.
//!
//! Follows document-store semantics: a missing field reads as `null`,
//! comparisons involving `null` or mismatched types are not true, and a
//! predicate keeps a row only when it evaluates to boolean `true`.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde_json::Value;

use qshape_core::error::Error;
use qshape_core::expr::{BinaryOp, InValues, SqlExpr, UnaryOp};
use qshape_core::types::{scalar_cmp, Scalar};

use crate::error::{ExecError, Result};

pub struct EvalContext<'a> {
    pub alias: &'a str,
    pub doc: &'a Value,
    /// Bound parameter values keyed by name without the `@` prefix.
    pub params: &'a BTreeMap<String, Value>,
}

pub fn truthy(v: &Value) -> bool {
    matches!(v, Value::Bool(true))
}

/// Follow `path` from `root`; missing segments read as `null`.
pub fn read_path<'v>(root: &'v Value, path: &[String]) -> &'v Value {
    let mut cur = root;
    for seg in path {
        match cur.get(seg) {
            Some(next) => cur = next,
            None => return &Value::Null,
        }
    }
    cur
}

/// Total order over JSON values for sorting.
pub fn json_cmp(a: &Value, b: &Value) -> Ordering {
    scalar_cmp(&Scalar::from_json(a), &Scalar::from_json(b))
}

fn json_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(op: BinaryOp, a: &Value, b: &Value) -> Value {
    if a.is_null() || b.is_null() {
        return Value::Null;
    }
    let ord = match (a, b) {
        (Value::Number(_), Value::Number(_)) | (Value::String(_), Value::String(_)) | (Value::Bool(_), Value::Bool(_)) => {
            json_cmp(a, b)
        }
        _ if matches!(op, BinaryOp::Equal) => return Value::Bool(false),
        _ if matches!(op, BinaryOp::NotEqual) => return Value::Bool(true),
        _ => return Value::Null,
    };
    Value::Bool(match op {
        BinaryOp::Equal => json_eq(a, b),
        BinaryOp::NotEqual => !json_eq(a, b),
        BinaryOp::LessThan => ord == Ordering::Less,
        BinaryOp::LessThanOrEqual => ord != Ordering::Greater,
        BinaryOp::GreaterThan => ord == Ordering::Greater,
        BinaryOp::GreaterThanOrEqual => ord != Ordering::Less,
        _ => false,
    })
}

fn arithmetic(op: BinaryOp, a: &Value, b: &Value) -> Value {
    let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
        return Value::Null;
    };
    let both_int = a.is_i64() && b.is_i64();
    let r = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Subtract => x - y,
        BinaryOp::Multiply => x * y,
        BinaryOp::Divide if y == 0.0 => return Value::Null,
        BinaryOp::Divide => x / y,
        BinaryOp::Modulo if y == 0.0 => return Value::Null,
        BinaryOp::Modulo => x % y,
        _ => return Value::Null,
    };
    if both_int && r.fract() == 0.0 && !matches!(op, BinaryOp::Divide) {
        Value::from(r as i64)
    } else {
        serde_json::Number::from_f64(r)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// `x IN (a, b)` as `x = a OR x = b`: true on any match, undefined when
/// no item matched but some comparison was undefined, false otherwise.
fn membership(needle: &Value, items: &[Value]) -> Value {
    let mut undefined = false;
    for item in items {
        match compare(BinaryOp::Equal, needle, item) {
            Value::Bool(true) => return Value::Bool(true),
            Value::Bool(false) => {}
            _ => undefined = true,
        }
    }
    if undefined {
        Value::Null
    } else {
        Value::Bool(false)
    }
}

pub fn eval(expr: &SqlExpr, ctx: &EvalContext<'_>) -> Result<Value> {
    Ok(match expr {
        SqlExpr::Column { source, path, .. } => {
            if source != ctx.alias {
                return Err(ExecError::Storage(format!("unknown source alias '{}'", source)));
            }
            read_path(ctx.doc, path).clone()
        }
        SqlExpr::Constant { value, .. } => value.to_json(),
        SqlExpr::Parameter { name, .. } => ctx
            .params
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnboundParameter(name.clone()))?,
        SqlExpr::Binary {
            op, left, right, ..
        } => {
            let l = eval(left, ctx)?;
            match op {
                BinaryOp::And => {
                    if matches!(l, Value::Bool(false)) {
                        return Ok(Value::Bool(false));
                    }
                    let r = eval(right, ctx)?;
                    match (l, r) {
                        (Value::Bool(true), Value::Bool(b)) => Value::Bool(b),
                        (_, Value::Bool(false)) => Value::Bool(false),
                        _ => Value::Null,
                    }
                }
                BinaryOp::Or => {
                    if truthy(&l) {
                        return Ok(Value::Bool(true));
                    }
                    let r = eval(right, ctx)?;
                    match (l, r) {
                        (_, Value::Bool(true)) => Value::Bool(true),
                        (Value::Bool(false), Value::Bool(false)) => Value::Bool(false),
                        _ => Value::Null,
                    }
                }
                op if op.is_comparison() => compare(*op, &l, &eval(right, ctx)?),
                op => arithmetic(*op, &l, &eval(right, ctx)?),
            }
        }
        SqlExpr::Unary { op, operand, .. } => {
            let v = eval(operand, ctx)?;
            match op {
                UnaryOp::Not => match v {
                    Value::Bool(b) => Value::Bool(!b),
                    _ => Value::Null,
                },
                UnaryOp::Negate => arithmetic(BinaryOp::Subtract, &Value::from(0), &v),
                UnaryOp::IsNull => Value::Bool(v.is_null()),
                UnaryOp::IsNotNull => Value::Bool(!v.is_null()),
            }
        }
        SqlExpr::Function { name, args, .. } => {
            let values = args
                .iter()
                .map(|a| eval(a, ctx))
                .collect::<Result<Vec<_>>>()?;
            call_function(name, &values)?
        }
        SqlExpr::In { item, values } => {
            let needle = eval(item, ctx)?;
            match values {
                InValues::List(list) => {
                    let items = list.iter().map(|v| eval(v, ctx)).collect::<Result<Vec<_>>>()?;
                    membership(&needle, &items)
                }
                InValues::Parameter(p) => {
                    let bound = ctx
                        .params
                        .get(&p.name)
                        .ok_or_else(|| Error::UnboundParameter(p.name.clone()))?;
                    membership(&needle, bound.as_array().map(Vec::as_slice).unwrap_or(&[]))
                }
                InValues::Subquery(_) => {
                    return Err(Error::NotSupported("IN (subquery)".into()).into());
                }
            }
        }
    })
}

fn text(v: &Value) -> Option<&str> {
    v.as_str()
}

fn call_function(name: &str, args: &[Value]) -> Result<Value> {
    let unsupported = || ExecError::Storage(format!("function '{}' is not supported", name));
    Ok(match (name.to_ascii_uppercase().as_str(), args) {
        ("LOWER", [s]) => text(s)
            .map(|s| Value::String(s.to_lowercase()))
            .unwrap_or(Value::Null),
        ("UPPER", [s]) => text(s)
            .map(|s| Value::String(s.to_uppercase()))
            .unwrap_or(Value::Null),
        ("LENGTH", [s]) => text(s)
            .map(|s| Value::from(s.chars().count() as i64))
            .unwrap_or(Value::Null),
        ("CONTAINS", [s, sub]) => match (text(s), text(sub)) {
            (Some(s), Some(sub)) => Value::Bool(s.contains(sub)),
            _ => Value::Null,
        },
        ("STARTSWITH", [s, prefix]) => match (text(s), text(prefix)) {
            (Some(s), Some(p)) => Value::Bool(s.starts_with(p)),
            _ => Value::Null,
        },
        ("ARRAY_LENGTH", [a]) => a
            .as_array()
            .map(|a| Value::from(a.len() as i64))
            .unwrap_or(Value::Null),
        ("ARRAY_CONTAINS", [a, x]) => Value::Bool(
            a.as_array()
                .map(|items| items.iter().any(|i| json_eq(i, x)))
                .unwrap_or(false),
        ),
        // Term-frequency score over a text field.
        ("FULLTEXTSCORE", [field, terms @ ..]) => {
            let Some(body) = text(field) else {
                return Ok(Value::from(0.0));
            };
            let body = body.to_lowercase();
            let mut score = 0usize;
            for t in terms.iter().filter_map(text) {
                let t = t.to_lowercase();
                if !t.is_empty() {
                    score += body.matches(t.as_str()).count();
                }
            }
            Value::from(score as f64)
        }
        ("FULLTEXTCONTAINS", [field, term]) => match (text(field), text(term)) {
            (Some(f), Some(t)) => Value::Bool(f.to_lowercase().contains(&t.to_lowercase())),
            _ => Value::Bool(false),
        },
        _ => return Err(unsupported()),
    })
}
