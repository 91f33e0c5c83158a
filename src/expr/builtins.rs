use crate::html::escape_html;
use crate::model::Value;

/// 允许在表达式中调用的内置函数
const FUNCTIONS: &[&str] = &[
    "length", "upper", "lower", "trim", "join", "keys", "values", "range", "contains", "string",
    "number", "escape",
];

/// `range` 最多生成的元素个数
const MAX_RANGE: i64 = 100_000;

pub(crate) fn is_function(name: &str) -> bool {
    FUNCTIONS.contains(&name)
}

/// 以方法形式调用（`x.trim()`），接收者作为第一个参数。未知方法返回 `None`。
pub(crate) fn call_method(
    name: &str,
    receiver: Value,
    mut args: Vec<Value>,
) -> Option<Result<Value, String>> {
    let function = match name {
        "length" => "length",
        "toUpperCase" => "upper",
        "toLowerCase" => "lower",
        "trim" => "trim",
        "join" => "join",
        "contains" | "includes" => "contains",
        "indexOf" => "indexOf",
        "startsWith" => "startsWith",
        "endsWith" => "endsWith",
        "split" => "split",
        _ => return None,
    };
    args.insert(0, receiver);
    Some(call(function, args))
}

pub(crate) fn call_function(name: &str, args: Vec<Value>) -> Result<Value, String> {
    if !is_function(name) {
        return Err(format!("`{}` is not callable", name));
    }
    call(name, args)
}

fn call(name: &str, args: Vec<Value>) -> Result<Value, String> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or_default();

    match name {
        "length" => Ok(arg(0)
            .len()
            .map(|n| Value::Int(n as i64))
            .unwrap_or(Value::Int(0))),
        "upper" => Ok(Value::Str(arg(0).to_string().to_uppercase())),
        "lower" => Ok(Value::Str(arg(0).to_string().to_lowercase())),
        "trim" => Ok(Value::Str(arg(0).to_string().trim().to_string())),
        "string" => Ok(Value::Str(arg(0).to_string())),
        "escape" => Ok(Value::Str(escape_html(&arg(0).to_string()))),
        "number" => to_number(&arg(0)),
        "join" => {
            let sep = match arg(1) {
                Value::Null => ",".to_string(),
                other => other.to_string(),
            };
            match arg(0) {
                Value::List(items) => Ok(Value::Str(
                    items
                        .iter()
                        .map(|v| v.to_string())
                        .collect::<Vec<_>>()
                        .join(&sep),
                )),
                Value::Null => Ok(Value::Str(String::new())),
                other => Err(format!("cannot join a {}", other.type_name())),
            }
        }
        "keys" => match arg(0) {
            Value::Map(m) => Ok(Value::List(m.keys().map(|k| Value::Str(k.clone())).collect())),
            Value::Null => Ok(Value::List(vec![])),
            other => Err(format!("cannot take keys of a {}", other.type_name())),
        },
        "values" => match arg(0) {
            Value::Map(m) => Ok(Value::List(m.into_values().collect())),
            Value::Null => Ok(Value::List(vec![])),
            other => Err(format!("cannot take values of a {}", other.type_name())),
        },
        "range" => {
            let (start, end) = match (arg(0), arg(1)) {
                (Value::Int(end), Value::Null) => (0, end),
                (Value::Int(start), Value::Int(end)) => (start, end),
                (a, b) => {
                    return Err(format!(
                        "range expects integers, got {} and {}",
                        a.type_name(),
                        b.type_name()
                    ));
                }
            };
            let span = (end as i128 - start as i128).max(0);
            if span > MAX_RANGE as i128 {
                return Err(format!("range of {} items exceeds the limit of {}", span, MAX_RANGE));
            }
            Ok(Value::List((start..end).map(Value::Int).collect()))
        }
        "contains" => {
            let needle = arg(1);
            Ok(Value::Bool(match arg(0) {
                Value::List(items) => items.iter().any(|v| v.loose_eq(&needle)),
                Value::Map(m) => m.contains_key(&needle.to_string()),
                Value::Str(s) => s.contains(&needle.to_string()),
                _ => false,
            }))
        }
        "indexOf" => {
            let needle = arg(1);
            let index = match arg(0) {
                Value::List(items) => items.iter().position(|v| v.loose_eq(&needle)),
                Value::Str(s) => s
                    .find(&needle.to_string())
                    .map(|byte| s[..byte].chars().count()),
                _ => None,
            };
            Ok(Value::Int(index.map(|i| i as i64).unwrap_or(-1)))
        }
        "startsWith" => Ok(Value::Bool(arg(0).to_string().starts_with(&arg(1).to_string()))),
        "endsWith" => Ok(Value::Bool(arg(0).to_string().ends_with(&arg(1).to_string()))),
        "split" => {
            let s = arg(0).to_string();
            let sep = arg(1).to_string();
            let parts: Vec<Value> = if sep.is_empty() {
                s.chars().map(|c| Value::Str(c.to_string())).collect()
            } else {
                s.split(sep.as_str()).map(Value::from).collect()
            };
            Ok(Value::List(parts))
        }
        _ => Err(format!("`{}` is not callable", name)),
    }
}

/// 数值转换，无法转换的字符串得到 NaN
pub(crate) fn to_number(v: &Value) -> Result<Value, String> {
    match v {
        Value::Int(_) | Value::Float(_) => Ok(v.clone()),
        Value::Null => Ok(Value::Int(0)),
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        Value::Str(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                Ok(Value::Int(i))
            } else {
                Ok(Value::Float(s.parse::<f64>().unwrap_or(f64::NAN)))
            }
        }
        other => Err(format!("cannot convert a {} to a number", other.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_functions() {
        assert_eq!(call_function("length", vec![Value::from("héllo")]), Ok(Value::Int(5)));
        assert_eq!(
            call_function("join", vec![Value::from(vec![1, 2]), Value::from("-")]),
            Ok(Value::from("1-2"))
        );
        assert_eq!(
            call_function("range", vec![Value::Int(1), Value::Int(4)]),
            Ok(Value::from(vec![1, 2, 3]))
        );
        assert_eq!(call_function("number", vec![Value::from("42")]), Ok(Value::Int(42)));
    }

    #[test]
    fn test_range_is_capped() {
        assert!(call_function("range", vec![Value::Int(10_000_000_000)]).is_err());
        assert!(call_function("range", vec![Value::Int(i64::MIN), Value::Int(i64::MAX)]).is_err());
        assert_eq!(call_function("range", vec![Value::Int(5), Value::Int(1)]), Ok(Value::List(vec![])));
        let max = call_function("range", vec![Value::Int(MAX_RANGE)]).unwrap();
        assert_eq!(max.len(), Some(MAX_RANGE as usize));
    }

    #[test]
    fn test_unknown_function_is_not_callable() {
        assert!(call_function("system", vec![]).is_err());
    }

    #[test]
    fn test_methods() {
        assert_eq!(
            call_method("toUpperCase", Value::from("abc"), vec![]),
            Some(Ok(Value::from("ABC")))
        );
        assert_eq!(
            call_method("indexOf", Value::from(vec!["a", "b"]), vec![Value::from("b")]),
            Some(Ok(Value::Int(1)))
        );
        assert_eq!(call_method("exec", Value::Null, vec![]), None);
    }

    #[test]
    fn test_type_errors() {
        assert!(call_function("join", vec![Value::Int(3)]).is_err());
        assert!(call_function("range", vec![Value::from("a")]).is_err());
    }
}
