//! Tree-walking evaluator.
//!
//! Values are JSON values. Member access never fails: a missing key, an
//! out-of-range index, or access on a non-container yields `null`. Type
//! errors in arithmetic and string methods are [`QueryError::Evaluation`].

use serde_json::Value;

use super::QueryError;
use super::parser::{BinaryOp, Expr, Method, number};

fn eval_error(message: impl Into<String>) -> QueryError {
    QueryError::Evaluation {
        message: message.into(),
    }
}

/// JSON type name as reported in errors.
#[must_use]
pub const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Truthiness: `null`, `false`, `0`, `NaN` and `""` are false.
#[must_use]
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Equality used by `==` and `===`: numbers compare numerically, everything
/// else structurally.
#[must_use]
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| loose_eq(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| loose_eq(x, y)))
        }
        _ => a == b,
    }
}

fn as_number(value: &Value, op: &str) -> Result<f64, QueryError> {
    value
        .as_f64()
        .ok_or_else(|| eval_error(format!("`{op}` needs numbers, got {}", type_name(value))))
}

fn as_str<'v>(value: &'v Value, method: &str) -> Result<&'v str, QueryError> {
    value.as_str().ok_or_else(|| {
        eval_error(format!(
            "`{method}` needs a string argument, got {}",
            type_name(value)
        ))
    })
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn member(object: &Value, property: &Value) -> Value {
    match (object, property) {
        (Value::Object(map), Value::String(key)) => map.get(key).cloned().unwrap_or(Value::Null),
        (Value::Array(items), Value::String(key)) if key == "length" => Value::from(items.len()),
        (Value::String(s), Value::String(key)) if key == "length" => {
            Value::from(s.chars().count())
        }
        (Value::Array(items), Value::Number(n)) => n
            .as_u64()
            .and_then(|i| usize::try_from(i).ok())
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn compare(op: BinaryOp, lhs: &Value, rhs: &Value) -> bool {
    let ordering = match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.as_f64().partial_cmp(&b.as_f64()),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };
    let Some(ordering) = ordering else {
        return false;
    };
    match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        BinaryOp::Ge => ordering.is_ge(),
        _ => false,
    }
}

fn call(method: Method, receiver: &Value, args: &[Value]) -> Result<Value, QueryError> {
    let arg = args.first().unwrap_or(&Value::Null);
    Ok(match (method, receiver) {
        // Predicates over absent fields read as "no".
        (Method::Includes | Method::StartsWith | Method::EndsWith, Value::Null) => {
            Value::Bool(false)
        }
        (Method::Includes, Value::Array(items)) => {
            Value::Bool(items.iter().any(|item| loose_eq(item, arg)))
        }
        (Method::Includes, Value::String(s)) => Value::Bool(s.contains(as_str(arg, "includes")?)),
        (Method::StartsWith, Value::String(s)) => {
            Value::Bool(s.starts_with(as_str(arg, "startsWith")?))
        }
        (Method::EndsWith, Value::String(s)) => Value::Bool(s.ends_with(as_str(arg, "endsWith")?)),
        (Method::ToLowerCase | Method::ToUpperCase | Method::Trim, Value::Null) => Value::Null,
        (Method::ToLowerCase, Value::String(s)) => Value::String(s.to_lowercase()),
        (Method::ToUpperCase, Value::String(s)) => Value::String(s.to_uppercase()),
        (Method::Trim, Value::String(s)) => Value::String(s.trim().to_owned()),
        (method, other) => {
            return Err(eval_error(format!(
                "{method:?} is not defined on {}",
                type_name(other)
            )));
        }
    })
}

/// Evaluate `expr` with `obj` bound to `param`.
///
/// # Errors
/// Type errors in arithmetic, negation and string methods.
pub fn eval(expr: &Expr, param: &Value) -> Result<Value, QueryError> {
    Ok(match expr {
        Expr::Literal(value) => value.clone(),
        Expr::Param => param.clone(),
        Expr::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| eval(item, param))
                .collect::<Result<_, _>>()?,
        ),
        Expr::Member { object, property } => {
            member(&eval(object, param)?, &eval(property, param)?)
        }
        Expr::Call {
            receiver,
            method,
            args,
        } => {
            let receiver = eval(receiver, param)?;
            let args = args
                .iter()
                .map(|arg| eval(arg, param))
                .collect::<Result<Vec<_>, _>>()?;
            call(*method, &receiver, &args)?
        }
        Expr::Not(operand) => Value::Bool(!truthy(&eval(operand, param)?)),
        Expr::Neg(operand) => number(-as_number(&eval(operand, param)?, "-")?),
        Expr::And(lhs, rhs) => {
            Value::Bool(truthy(&eval(lhs, param)?) && truthy(&eval(rhs, param)?))
        }
        Expr::Or(lhs, rhs) => {
            Value::Bool(truthy(&eval(lhs, param)?) || truthy(&eval(rhs, param)?))
        }
        Expr::Conditional {
            test,
            then,
            otherwise,
        } => {
            if truthy(&eval(test, param)?) {
                eval(then, param)?
            } else {
                eval(otherwise, param)?
            }
        }
        Expr::Binary { op, lhs, rhs } => {
            let lhs = eval(lhs, param)?;
            let rhs = eval(rhs, param)?;
            binary(*op, &lhs, &rhs)?
        }
    })
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, QueryError> {
    Ok(match op {
        BinaryOp::Eq => Value::Bool(loose_eq(lhs, rhs)),
        BinaryOp::Ne => Value::Bool(!loose_eq(lhs, rhs)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            Value::Bool(compare(op, lhs, rhs))
        }
        BinaryOp::Add if lhs.is_string() || rhs.is_string() => {
            Value::String(display(lhs) + &display(rhs))
        }
        BinaryOp::Add => number(as_number(lhs, "+")? + as_number(rhs, "+")?),
        BinaryOp::Sub => number(as_number(lhs, "-")? - as_number(rhs, "-")?),
        BinaryOp::Mul => number(as_number(lhs, "*")? * as_number(rhs, "*")?),
        BinaryOp::Div => number(as_number(lhs, "/")? / as_number(rhs, "/")?),
        BinaryOp::Rem => number(as_number(lhs, "%")? % as_number(rhs, "%")?),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn member_access_is_total() {
        let v = json!({"a": {"b": [10, 20]}, "s": "héllo"});
        assert_eq!(member(&v, &json!("missing")), Value::Null);
        assert_eq!(member(&Value::Null, &json!("x")), Value::Null);
        assert_eq!(member(&v["a"]["b"], &json!(1)), json!(20));
        assert_eq!(member(&v["a"]["b"], &json!(5)), Value::Null);
        assert_eq!(member(&v["a"]["b"], &json!("length")), json!(2));
        assert_eq!(member(&v["s"], &json!("length")), json!(5));
    }

    #[test]
    fn equality_is_numeric_for_numbers() {
        assert!(loose_eq(&json!(1), &json!(1.0)));
        assert!(loose_eq(&json!({"a": [1]}), &json!({"a": [1.0]})));
        assert!(!loose_eq(&json!("1"), &json!(1)));
        assert!(loose_eq(&Value::Null, &Value::Null));
    }

    #[test]
    fn truthiness() {
        for falsy in [json!(null), json!(false), json!(0), json!("")] {
            assert!(!truthy(&falsy), "{falsy}");
        }
        for t in [json!(true), json!(1), json!("0"), json!([]), json!({})] {
            assert!(truthy(&t), "{t}");
        }
    }

    #[test]
    fn arithmetic_and_concatenation() {
        assert_eq!(binary(BinaryOp::Add, &json!(1), &json!(2)).unwrap(), json!(3));
        assert_eq!(
            binary(BinaryOp::Add, &json!("a"), &json!(1)).unwrap(),
            json!("a1")
        );
        assert_eq!(binary(BinaryOp::Div, &json!(1), &json!(4)).unwrap(), json!(0.25));
        assert!(binary(BinaryOp::Mul, &json!("a"), &json!(2)).is_err());
        assert_eq!(binary(BinaryOp::Lt, &json!("a"), &json!("b")).unwrap(), json!(true));
        assert_eq!(binary(BinaryOp::Lt, &json!("a"), &json!(1)).unwrap(), json!(false));
    }

    #[test]
    fn methods() {
        assert_eq!(
            call(Method::Includes, &json!(["x", 2]), &[json!(2.0)]).unwrap(),
            json!(true)
        );
        assert_eq!(
            call(Method::StartsWith, &json!("folio"), &[json!("fo")]).unwrap(),
            json!(true)
        );
        assert_eq!(
            call(Method::Includes, &Value::Null, &[json!("x")]).unwrap(),
            json!(false)
        );
        assert!(call(Method::EndsWith, &json!(3), &[json!("x")]).is_err());
        assert!(call(Method::Includes, &json!("abc"), &[json!(1)]).is_err());
    }
}
