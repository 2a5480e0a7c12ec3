//! Functions registered by the server binary at startup

use serde_json::{json, Number, Value};
use std::time::Duration;

use super::{FunctionError, FunctionRegistry, FunctionSpec};

/// Register every built-in function
pub fn register_all(registry: &FunctionRegistry) {
    registry.register(
        FunctionSpec::new("add", |args, _| add(&args[0], &args[1]))
            .param("x")
            .param("y")
            .describe("Return x + y for numbers, strings or lists"),
    );
    registry.register(
        FunctionSpec::new("multiply", |args, _| {
            arithmetic(&args[0], &args[1], "*", i64::checked_mul, |a, b| a * b)
        })
        .param("x")
        .param("y")
        .describe("Return x * y"),
    );
    registry.register(
        FunctionSpec::new("increment", |args, _| {
            arithmetic(&args[0], &args[1], "+", i64::checked_add, |a, b| a + b)
        })
        .param("x")
        .optional("by", json!(1))
        .describe("Return x + by"),
    );
    registry.register(
        FunctionSpec::new("identity", |args, _| Ok(args[0].clone()))
            .param("value")
            .describe("Return the argument unchanged"),
    );
    registry.register(
        FunctionSpec::new("sum_list", |args, _| {
            let total = sum(&args[0], "list_of_numbers")?;
            arithmetic(&total, &args[1], "*", i64::checked_mul, |a, b| a * b)
        })
        .param("list_of_numbers")
        .optional("x", json!(1))
        .describe("Sum a list of numbers and multiply the total by x"),
    );
    registry.register(
        FunctionSpec::new("reduce_sum", |args, _| sum(&args[0], "results"))
            .param("results")
            .describe("Reducer: sum the results of the map phase"),
    );
    registry.register(
        FunctionSpec::new("sleep", |args, _| {
            let duration = args[0]
                .as_f64()
                .and_then(|s| Duration::try_from_secs_f64(s).ok())
                .ok_or_else(|| {
                    FunctionError::value_error("seconds must be a non-negative number in range")
                })?;
            std::thread::sleep(duration);
            Ok(args[0].clone())
        })
        .param("seconds")
        .describe("Sleep for the given number of seconds and return it"),
    );
    registry.register(
        FunctionSpec::new("fail", |args, _| {
            let message = args[0]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| args[0].to_string());
            let kind = args[1].as_str().unwrap_or("RuntimeError");
            Err(FunctionError::new(kind, message))
        })
        .optional("message", json!("activation failed"))
        .optional("kind", json!("RuntimeError"))
        .describe("Always raise the given error"),
    );
    registry.register(
        FunctionSpec::new("count_words", |args, _| {
            let text = match &args[0] {
                Value::String(s) => s.as_str(),
                Value::Object(obj) => obj.get("data").and_then(Value::as_str).ok_or_else(|| {
                    FunctionError::type_error("obj has no text 'data' field")
                })?,
                other => {
                    return Err(FunctionError::type_error(format!(
                        "expected a string or an object partition, got {}",
                        type_name(other)
                    )))
                }
            };
            Ok(json!(text.split_whitespace().count()))
        })
        .param("obj")
        .describe("Count whitespace-separated words in a string or object partition"),
    );
    registry.register(
        FunctionSpec::new("getenv", |args, ctx| {
            let name = args[0]
                .as_str()
                .ok_or_else(|| FunctionError::type_error("name must be a string"))?;
            Ok(ctx
                .env
                .get(name)
                .map(|v| Value::String(v.clone()))
                .unwrap_or_else(|| args[1].clone()))
        })
        .param("name")
        .optional("default", Value::Null)
        .describe("Read a variable from the job's extra_env"),
    );
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

fn add(x: &Value, y: &Value) -> Result<Value, FunctionError> {
    match (x, y) {
        (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
        (Value::Array(a), Value::Array(b)) => Ok(Value::Array(a.iter().chain(b).cloned().collect())),
        _ => arithmetic(x, y, "+", i64::checked_add, |a, b| a + b),
    }
}

fn arithmetic(
    x: &Value,
    y: &Value,
    op: &str,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, FunctionError> {
    let unsupported = || {
        FunctionError::type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op,
            type_name(x),
            type_name(y)
        ))
    };

    let (Value::Number(a), Value::Number(b)) = (x, y) else {
        return Err(unsupported());
    };

    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        if let Some(result) = int_op(a, b) {
            return Ok(json!(result));
        }
    }

    let (a, b) = (
        a.as_f64().ok_or_else(unsupported)?,
        b.as_f64().ok_or_else(unsupported)?,
    );
    Number::from_f64(float_op(a, b))
        .map(Value::Number)
        .ok_or_else(|| FunctionError::value_error("result is not a finite number"))
}

fn sum(values: &Value, param: &str) -> Result<Value, FunctionError> {
    let items = values.as_array().ok_or_else(|| {
        FunctionError::type_error(format!(
            "{} must be a list, got {}",
            param,
            type_name(values)
        ))
    })?;
    items.iter().try_fold(json!(0), |acc, item| {
        arithmetic(&acc, item, "+", i64::checked_add, |a, b| a + b)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{CallArgs, CallContext};

    fn call(name: &str, args: Vec<Value>) -> Result<Value, FunctionError> {
        let registry = FunctionRegistry::with_builtins();
        let spec = registry.get(name).unwrap();
        spec.invoke(CallArgs::positional(args), &CallContext::default())
    }

    #[test]
    fn test_add_variants() {
        assert_eq!(call("add", vec![json!(2), json!(10)]).unwrap(), json!(12));
        assert_eq!(call("add", vec![json!(1.5), json!(1)]).unwrap(), json!(2.5));
        assert_eq!(call("add", vec![json!("a"), json!("b")]).unwrap(), json!("ab"));
        assert_eq!(
            call("add", vec![json!([1]), json!([2])]).unwrap(),
            json!([1, 2])
        );

        let err = call("add", vec![json!(1), json!("x")]).unwrap_err();
        assert_eq!(err.kind, "TypeError");
    }

    #[test]
    fn test_sum_list_with_multiplier() {
        assert_eq!(
            call("sum_list", vec![json!([1, 2, 3, 4, 5])]).unwrap(),
            json!(15)
        );
        assert_eq!(
            call("sum_list", vec![json!([1, 2, 3, 4, 5]), json!(3)]).unwrap(),
            json!(45)
        );
    }

    #[test]
    fn test_fail_raises_requested_kind() {
        let err = call("fail", vec![json!("bad row"), json!("ValueError")]).unwrap_err();
        assert_eq!(err, FunctionError::value_error("bad row"));
    }

    #[test]
    fn test_sleep_rejects_unrepresentable_seconds() {
        for seconds in [json!(-1), json!(1e20), json!("soon")] {
            let err = call("sleep", vec![seconds]).unwrap_err();
            assert_eq!(err.kind, "ValueError");
        }
        assert_eq!(call("sleep", vec![json!(0)]).unwrap(), json!(0));
    }

    #[test]
    fn test_count_words_on_partition() {
        let obj = json!({"key": "a.txt", "data": "one two  three\nfour"});
        assert_eq!(call("count_words", vec![obj]).unwrap(), json!(4));
    }

    #[test]
    fn test_getenv_reads_context() {
        let registry = FunctionRegistry::with_builtins();
        let spec = registry.get("getenv").unwrap();
        let mut ctx = CallContext::default();
        ctx.env.insert("MODE".into(), "fast".into());

        let found = spec
            .invoke(CallArgs::positional(vec![json!("MODE")]), &ctx)
            .unwrap();
        assert_eq!(found, json!("fast"));

        let missing = spec
            .invoke(CallArgs::positional(vec![json!("OTHER"), json!("x")]), &ctx)
            .unwrap();
        assert_eq!(missing, json!("x"));
    }
}
