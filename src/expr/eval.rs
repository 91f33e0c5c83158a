use crate::expr::Variables;
use crate::expr::ast::{BinaryOp, Expr, UnaryOp};
use crate::expr::builtins;
use crate::model::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// 对表达式求值。未定义的变量得到 `Null`，只有真正的类型错误才返回 `Err`
pub(crate) fn eval(expr: &Expr, vars: &dyn Variables) -> Result<Value, String> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Ident(name) => Ok(vars.lookup(name).cloned().unwrap_or_default()),
        Expr::Array(items) => items
            .iter()
            .map(|e| eval(e, vars))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Expr::Object(entries) => {
            let mut map = BTreeMap::new();
            for (k, e) in entries {
                map.insert(k.clone(), eval(e, vars)?);
            }
            Ok(Value::Map(map))
        }
        Expr::Member(target, name) => Ok(eval(target, vars)?.get(name)),
        Expr::Index(target, index) => {
            let target = eval(target, vars)?;
            let index = eval(index, vars)?;
            Ok(target.index(&index))
        }
        Expr::Call(callee, args) => call(callee, args, vars),
        Expr::Unary(op, operand) => unary(*op, eval(operand, vars)?),
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            let l = eval(lhs, vars)?;
            if l.is_truthy() { eval(rhs, vars) } else { Ok(l) }
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            let l = eval(lhs, vars)?;
            if l.is_truthy() { Ok(l) } else { eval(rhs, vars) }
        }
        Expr::Binary(op, lhs, rhs) => binary(*op, eval(lhs, vars)?, eval(rhs, vars)?),
        Expr::Ternary(cond, then, otherwise) => {
            if eval(cond, vars)?.is_truthy() {
                eval(then, vars)
            } else {
                eval(otherwise, vars)
            }
        }
    }
}

fn call(callee: &Expr, args: &[Expr], vars: &dyn Variables) -> Result<Value, String> {
    let args = args
        .iter()
        .map(|a| eval(a, vars))
        .collect::<Result<Vec<_>, _>>()?;
    match callee {
        Expr::Ident(name) => builtins::call_function(name, args),
        Expr::Member(receiver, method) => {
            let receiver = eval(receiver, vars)?;
            let type_name = receiver.type_name();
            builtins::call_method(method, receiver, args)
                .unwrap_or_else(|| Err(format!("`{}` is not a method of {}", method, type_name)))
        }
        _ => Err("expression is not callable".into()),
    }
}

fn unary(op: UnaryOp, v: Value) -> Result<Value, String> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!v.is_truthy())),
        UnaryOp::Plus => builtins::to_number(&v),
        UnaryOp::Neg => match builtins::to_number(&v)? {
            Value::Int(i) => Ok(i
                .checked_neg()
                .map(Value::Int)
                .unwrap_or(Value::Float(-(i as f64)))),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(format!("cannot negate a {}", other.type_name())),
        },
    }
}

/// 整数视图：null 与布尔值参与整数运算
fn as_int(v: &Value) -> Option<i64> {
    match v {
        Value::Null => Some(0),
        Value::Bool(b) => Some(*b as i64),
        Value::Int(i) => Some(*i),
        _ => None,
    }
}

fn binary(op: BinaryOp, l: Value, r: Value) -> Result<Value, String> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(l.loose_eq(&r))),
        BinaryOp::Ne => Ok(Value::Bool(!l.loose_eq(&r))),
        BinaryOp::StrictEq => Ok(Value::Bool(l == r)),
        BinaryOp::StrictNe => Ok(Value::Bool(l != r)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ord = compare(&l, &r).ok_or_else(|| {
                format!(
                    "cannot compare {} with {} using `{}`",
                    l.type_name(),
                    r.type_name(),
                    op.symbol()
                )
            })?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        BinaryOp::Add => match (&l, &r) {
            (Value::Str(_), _) | (_, Value::Str(_)) => Ok(Value::Str(format!("{}{}", l, r))),
            (Value::List(a), Value::List(b)) => {
                Ok(Value::List(a.iter().chain(b.iter()).cloned().collect()))
            }
            _ => arithmetic(op, &l, &r),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => arithmetic(op, &l, &r),
        BinaryOp::And | BinaryOp::Or => unreachable!("short-circuit operators are handled in eval"),
    }
}

fn compare(l: &Value, r: &Value) -> Option<Ordering> {
    match (l, r) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Str(a), Value::Null) => Some(a.as_str().cmp("")),
        (Value::Null, Value::Str(b)) => Some("".cmp(b.as_str())),
        _ => {
            let (a, b) = (l.as_f64()?, r.as_f64()?);
            a.partial_cmp(&b).or(Some(Ordering::Greater))
        }
    }
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, String> {
    let type_error = || {
        format!(
            "cannot apply `{}` to {} and {}",
            op.symbol(),
            l.type_name(),
            r.type_name()
        )
    };

    if let (Some(a), Some(b)) = (as_int(l), as_int(r)) {
        let exact = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div => {
                if b == 0 {
                    return Err("division by zero".into());
                }
                // i64::MIN / -1 溢出时退回浮点运算
                match a.checked_rem(b) {
                    Some(0) => a.checked_div(b),
                    Some(_) => return Ok(Value::Float(a as f64 / b as f64)),
                    None => None,
                }
            }
            BinaryOp::Rem => {
                if b == 0 {
                    return Err("division by zero".into());
                }
                a.checked_rem(b)
            }
            _ => return Err(type_error()),
        };
        if let Some(v) = exact {
            return Ok(Value::Int(v));
        }
    }

    let (a, b) = match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(type_error()),
    };
    let v = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Rem if b == 0.0 => return Err("division by zero".into()),
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        _ => return Err(type_error()),
    };
    Ok(Value::Float(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parser::parse_expression;
    use std::collections::HashMap;

    fn run(src: &str, vars: &HashMap<String, Value>) -> Result<Value, String> {
        eval(&parse_expression(src).unwrap(), vars)
    }

    fn vars() -> HashMap<String, Value> {
        let mut user = BTreeMap::new();
        user.insert("name".to_string(), Value::from("alice"));
        user.insert("roles".to_string(), Value::from(vec!["admin", "editor"]));

        let mut m = HashMap::new();
        m.insert("a".to_string(), Value::Int(10));
        m.insert("b".to_string(), Value::Float(2.5));
        m.insert("user".to_string(), Value::Map(user));
        m
    }

    #[test]
    fn test_arithmetic() {
        let v = vars();
        assert_eq!(run("a + 1", &v), Ok(Value::Int(11)));
        assert_eq!(run("a * b", &v), Ok(Value::Float(25.0)));
        assert_eq!(run("a / 4", &v), Ok(Value::Float(2.5)));
        assert_eq!(run("a / 5", &v), Ok(Value::Int(2)));
        assert_eq!(run("a % 3", &v), Ok(Value::Int(1)));
        assert_eq!(run("-a", &v), Ok(Value::Int(-10)));
        assert_eq!(run("missing + 1", &v), Ok(Value::Int(1)));
    }

    #[test]
    fn test_string_concat() {
        let v = vars();
        assert_eq!(run("'n=' + a", &v), Ok(Value::from("n=10")));
        assert_eq!(run("user.name + '!'", &v), Ok(Value::from("alice!")));
    }

    #[test]
    fn test_comparison_and_logic() {
        let v = vars();
        assert_eq!(run("a > 5 && b < 3", &v), Ok(Value::Bool(true)));
        assert_eq!(run("a == 10.0", &v), Ok(Value::Bool(true)));
        assert_eq!(run("a === 10.0", &v), Ok(Value::Bool(false)));
        assert_eq!(run("missing || 'default'", &v), Ok(Value::from("default")));
        assert_eq!(run("a and 'yes'", &v), Ok(Value::from("yes")));
        assert_eq!(run("a > 5 ? 'big' : 'small'", &v), Ok(Value::from("big")));
    }

    #[test]
    fn test_missing_identifiers_are_null() {
        let v = vars();
        assert_eq!(run("nothing", &v), Ok(Value::Null));
        assert_eq!(run("nothing.deep.path", &v), Ok(Value::Null));
        assert_eq!(run("user.roles[5]", &v), Ok(Value::Null));
        assert_eq!(run("nothing == null", &v), Ok(Value::Bool(true)));
    }

    #[test]
    fn test_access_and_methods() {
        let v = vars();
        assert_eq!(run("user.roles[1]", &v), Ok(Value::from("editor")));
        assert_eq!(run("user['name']", &v), Ok(Value::from("alice")));
        assert_eq!(run("user.roles.length", &v), Ok(Value::Int(2)));
        assert_eq!(run("user.name.toUpperCase()", &v), Ok(Value::from("ALICE")));
        assert_eq!(run("user.roles.join(' / ')", &v), Ok(Value::from("admin / editor")));
        assert_eq!(run("length(user.roles)", &v), Ok(Value::Int(2)));
    }

    #[test]
    fn test_type_errors() {
        let v = vars();
        assert!(run("a()", &v).is_err());
        assert!(run("user.name.exec()", &v).is_err());
        assert!(run("a / 0", &v).is_err());
        assert!(run("user - 1", &v).is_err());
        assert!(run("user < 1", &v).is_err());
    }

    #[test]
    fn test_integer_overflow_falls_back_to_float() {
        let mut v = vars();
        v.insert("min".to_string(), Value::Int(i64::MIN));
        assert_eq!(
            run("(-9223372036854775807 - 1) / -1", &v),
            Ok(Value::Float(9223372036854775808.0))
        );
        assert_eq!(run("min / -1", &v), Ok(Value::Float(9223372036854775808.0)));
        assert_eq!(run("min % -1", &v).map(|r| r.as_f64()), Ok(Some(0.0)));
        assert_eq!(run("min / 2", &v), Ok(Value::Int(i64::MIN / 2)));
    }
}
