//! Data-driven templates embedded in YAML values
//!
//! A template is parsed once and may be executed any number of times against
//! different data environments. Identifier, selector, and index expressions
//! resolve through the extractor; calls dispatch to [`FuncValue`] callables;
//! left-arrow expressions hand a YAML-serialized argument to a
//! [`LeftArrowFunc`].
//!
//! Left-arrow arguments must round-trip through YAML, so callables cannot be
//! embedded literally: the executor stashes them under generated `func-N`
//! names, substitutes `{{func-N}}` placeholder tokens, and restores the
//! originals after the callee's YAML decode.

pub mod ast;
pub mod parser;

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::de::DeserializeOwned;

use crate::common::{Error, Result};
use crate::query;
use crate::value::{Mapping, Value};

use ast::Expr;

/// The representation of a parsed template
#[derive(Debug, Clone)]
pub struct Template {
    src: String,
    expr: Expr,
}

impl Template {
    /// Parse `src` as a template
    pub fn new(src: &str) -> Result<Template> {
        let expr = parser::parse(src)?;
        Ok(Template {
            src: src.to_string(),
            expr,
        })
    }

    /// Apply the parsed template to the given data environment.
    ///
    /// Panics raised by user callables are converted into errors; this method
    /// never unwinds.
    pub fn execute(&self, data: &Value) -> Result<Value> {
        let mut executor = Executor::default();
        let outcome = catch_unwind(AssertUnwindSafe(|| executor.eval(&self.expr, data)));
        let result = match outcome {
            Ok(result) => result,
            Err(payload) => Err(Error::execute(format!(
                "panic: {}",
                panic_message(&payload)
            ))),
        };
        result.map_err(|e| Error::TemplateExecute {
            template: self.src.clone(),
            source: Box::new(e),
        })
    }
}

/// Execute every template found in the strings of `value`, recursively
/// through sequences and mappings (keys included). Strings without template
/// delimiters pass through untouched.
pub fn execute_value(value: &Value, data: &Value) -> Result<Value> {
    match value {
        Value::String(s) => {
            if s.contains("{{") {
                Template::new(s)?.execute(data)
            } else {
                Ok(value.clone())
            }
        }
        Value::Seq(items) => items
            .iter()
            .map(|v| execute_value(v, data))
            .collect::<Result<Vec<_>>>()
            .map(Value::Seq),
        Value::Map(map) => {
            let mut out = Mapping::new();
            for (k, v) in map.iter() {
                out.insert(execute_value(k, data)?, execute_value(v, data)?);
            }
            Ok(Value::Map(out))
        }
        Value::Shared(inner) => execute_value(inner, data),
        other => Ok(other.clone()),
    }
}

/// A left-arrow function: a callable whose argument is an embedded YAML
/// document parsed to a callee-chosen shape.
pub trait LeftArrowFunc: Send + Sync {
    /// Decode the YAML argument. Implementations call one of the
    /// [`ArgDecoder`] methods and return the decoded argument, which is
    /// handed back to [`exec`](Self::exec) unchanged.
    fn unmarshal_arg(&self, arg: &ArgDecoder<'_>) -> Result<Value>;

    /// Run the function on the decoded argument
    fn exec(&self, arg: Value) -> Result<Value>;
}

/// Decoder handed to [`LeftArrowFunc::unmarshal_arg`].
///
/// Decoding restores stashed callables in place of their placeholder tokens
/// before the value reaches the callee.
pub struct ArgDecoder<'a> {
    yaml: &'a str,
    stash_env: Value,
}

impl ArgDecoder<'_> {
    /// Decode to a dynamic value; restored callables survive intact
    pub fn decode_value(&self) -> Result<Value> {
        let decoded = Value::from_yaml(self.yaml)?;
        execute_value(&decoded, &self.stash_env)
    }

    /// Decode to a typed destination. Callables cannot land in typed
    /// destinations; their presence is a decode error.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let value = self.decode_value()?;
        let yaml = value.to_yaml()?;
        Ok(serde_yaml::from_str(&yaml)?)
    }

    /// The raw argument text
    pub fn raw(&self) -> &str {
        self.yaml
    }
}

/// Stash of callables replaced by placeholder tokens during left-arrow
/// argument serialization. Scoped to one template execution.
#[derive(Default)]
struct FuncStash {
    entries: Vec<(String, Value)>,
}

impl FuncStash {
    fn save(&mut self, value: Value) -> String {
        let name = format!("func-{}", self.entries.len());
        self.entries.push((name.clone(), value));
        name
    }

    fn env(&self) -> Value {
        let mut map = Mapping::new();
        for (name, value) in &self.entries {
            map.insert(name.as_str(), value.clone());
        }
        Value::Map(map)
    }
}

#[derive(Default)]
struct Executor {
    executing_left_arrow_arg: bool,
    stash: FuncStash,
}

impl Executor {
    fn eval(&mut self, expr: &Expr, data: &Value) -> Result<Value> {
        match expr {
            Expr::Str(s) => Ok(Value::String(s.clone())),
            Expr::Int(raw) => raw
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| Error::execute(format!("\"{raw}\" is not a valid integer"))),
            Expr::Ident(_) | Expr::Selector { .. } | Expr::Index { .. } => {
                self.lookup(expr, data)
            }
            Expr::Call { fun, args } => self.eval_call(fun, args, data),
            Expr::Param { x, quoted } => self.eval_param(x.as_deref(), *quoted, data),
            Expr::Add { x, y } => self.eval_add(x, y, data),
            Expr::LeftArrow { fun, arg } => self.eval_left_arrow(fun, arg, data),
        }
    }

    fn lookup(&mut self, expr: &Expr, data: &Value) -> Result<Value> {
        match expr {
            Expr::Ident(name) => query::extract_by_key(data, name)
                .ok_or_else(|| Error::NotFound(expr.path())),
            Expr::Selector { x, sel } => {
                let base = self.eval(x, data)?;
                query::extract_by_key(&base, sel).ok_or_else(|| Error::NotFound(expr.path()))
            }
            Expr::Index { x, index } => {
                let base = self.eval(x, data)?;
                let key = self.eval(index, data)?;
                match key {
                    Value::Int(i) => query::extract_by_index(&base, i),
                    Value::String(s) => query::extract_by_key(&base, &s),
                    other => {
                        return Err(Error::execute(format!(
                            "index must be an integer or string, got {}",
                            other.type_name()
                        )))
                    }
                }
                .ok_or_else(|| Error::NotFound(expr.path()))
            }
            _ => Err(Error::Internal("not a lookup expression".to_string())),
        }
    }

    fn eval_call(&mut self, fun: &Expr, args: &[Expr], data: &Value) -> Result<Value> {
        let fun_value = self.eval(fun, data)?;
        let Value::Func(func) = fun_value else {
            return Err(Error::execute(format!(
                "not a function: got {}",
                fun_value.type_name()
            )));
        };

        if func.is_variadic() {
            let min = func.param_count().saturating_sub(1);
            if args.len() < min {
                return Err(Error::execute(format!(
                    "too few arguments to function: requires at least {min}, got {}",
                    args.len()
                )));
            }
        } else if args.len() != func.param_count() {
            return Err(Error::execute(format!(
                "function takes {} arguments, got {}",
                func.param_count(),
                args.len()
            )));
        }

        let mut values = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let v = self.eval(arg, data)?;
            values.push(func.required_param(i).convert(v));
        }
        func.call(values)
    }

    fn eval_param(&mut self, x: Option<&Expr>, quoted: bool, data: &Value) -> Result<Value> {
        let Some(inner) = x else {
            return Ok(Value::String(String::new()));
        };
        let value = self.eval(inner, data)?;
        if !self.executing_left_arrow_arg {
            return Ok(value);
        }

        // Left arrow arguments must parse as YAML. Callables are stashed and
        // replaced by placeholder tokens, restored after the callee decodes.
        if value.is_callable() {
            let name = self.stash.save(value);
            let token = if quoted {
                format!("'{{{{{name}}}}}'")
            } else {
                format!("{{{{{name}}}}}")
            };
            return Ok(Value::String(token));
        }

        // Multi-line strings interpolate raw; concatenation re-indents them
        // to keep the surrounding YAML block structure intact. Everything
        // else serializes through YAML so scalars stay quoted as needed.
        let yaml = match &value {
            Value::String(s) if s.contains('\n') => s.clone(),
            _ => {
                let yaml = value.to_yaml()?;
                yaml.strip_suffix('\n').unwrap_or(&yaml).to_string()
            }
        };
        Ok(Value::String(yaml))
    }

    fn eval_add(&mut self, x: &Expr, y: &Expr, data: &Value) -> Result<Value> {
        let left = self.eval(x, data)?;
        let right = self.eval(y, data)?;
        let left = stringize(&left)?;
        let mut right = stringize(&right)?;
        if self.executing_left_arrow_arg && matches!(y, Expr::Param { .. }) {
            right = add_indent(&right, &left);
        }
        Ok(Value::String(left + &right))
    }

    fn eval_left_arrow(&mut self, fun: &Expr, arg: &Expr, data: &Value) -> Result<Value> {
        let fun_value = self.eval(fun, data)?;
        let Value::LeftArrowFunc(func) = fun_value else {
            return Err(Error::execute(format!(
                "expected a left arrow function, got {}",
                fun_value.type_name()
            )));
        };

        let prev = self.executing_left_arrow_arg;
        self.executing_left_arrow_arg = true;
        let arg_value = self.eval(arg, data);
        self.executing_left_arrow_arg = prev;

        let arg_value = arg_value?;
        let Value::String(yaml) = arg_value else {
            return Err(Error::execute(format!(
                "left arrow argument must be a string, got {}",
                arg_value.type_name()
            )));
        };

        let decoder = ArgDecoder {
            yaml: &yaml,
            stash_env: self.stash.env(),
        };
        let decoded = func.unmarshal_arg(&decoder)?;
        func.exec(decoded)
    }
}

fn stringize(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Err(Error::execute(format!(
            "failed to concatenate: expected string, got {}",
            other.type_name()
        ))),
    }
}

/// Align the indentation of an interpolated multi-line value with the column
/// where it starts, preserving YAML block structure:
/// `add_indent("a: 1\nb: 2", "- ")` yields `"a: 1\n  b: 2"`.
fn add_indent(s: &str, pre: &str) -> String {
    if !s.contains('\n') || pre.is_empty() {
        return s.to_string();
    }
    let last_line = pre.rsplit('\n').next().unwrap_or("");
    let prefix = " ".repeat(last_line.chars().count());
    let mut out = String::new();
    for (i, line) in s.split('\n').enumerate() {
        if i != 0 {
            out.push('\n');
            if !line.is_empty() {
                out.push_str(&prefix);
            }
        }
        out.push_str(line);
    }
    out
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{FuncValue, ParamType};
    use std::sync::Arc;

    fn data_from_yaml(yaml: &str) -> Value {
        Value::from_yaml(yaml).unwrap()
    }

    fn execute(src: &str, data: &Value) -> Result<Value> {
        Template::new(src)?.execute(data)
    }

    #[test]
    fn test_literal_substitution() {
        let data = data_from_yaml("vars:\n  message: hello\n");
        assert_eq!(
            execute("say {{vars.message}}", &data).unwrap(),
            Value::from("say hello")
        );
    }

    #[test]
    fn test_full_template_returns_raw_value() {
        let data = data_from_yaml("vars:\n  n: 42\n");
        assert_eq!(execute("{{vars.n}}", &data).unwrap(), Value::Int(42));
    }

    #[test]
    fn test_empty_template() {
        assert_eq!(
            execute("{{}}", &Value::Null).unwrap(),
            Value::from("")
        );
    }

    #[test]
    fn test_nested_extraction() {
        let data = data_from_yaml("a:\n  b: [10, 20, 30]\n");
        assert_eq!(execute("{{a.b[1]}}", &data).unwrap(), Value::Int(20));
    }

    #[test]
    fn test_not_found_reports_path() {
        let data = data_from_yaml("vars: {}\n");
        let err = execute("{{vars.missing}}", &data).unwrap_err();
        assert!(err.to_string().contains(".vars.missing"), "{err}");
    }

    #[test]
    fn test_int_literal_overflow() {
        let err = execute("{{99999999999999999999}}", &Value::Null).unwrap_err();
        assert!(err.to_string().contains("not a valid integer"), "{err}");
    }

    #[test]
    fn test_concat_requires_strings() {
        let data = data_from_yaml("vars:\n  n: 42\n");
        assert!(execute("say {{vars.n}}", &data).is_err());
    }

    #[test]
    fn test_function_call_with_conversion() {
        let double = FuncValue::new("double", vec![ParamType::Float], false, |args| {
            match &args[0] {
                Value::Float(f) => Ok(Value::Float(f * 2.0)),
                other => Err(Error::execute(format!("want float, got {}", other.type_name()))),
            }
        });
        let mut vars = Mapping::new();
        vars.insert("double", Value::Func(double));
        let mut root = Mapping::new();
        root.insert("vars", Value::Map(vars));
        let data = Value::Map(root);

        assert_eq!(
            execute("{{vars.double(21)}}", &data).unwrap(),
            Value::Float(42.0)
        );
    }

    #[test]
    fn test_function_arity() {
        let join = FuncValue::new(
            "join",
            vec![ParamType::String, ParamType::String],
            true,
            |args| {
                let sep = args[0].as_str().unwrap_or("").to_string();
                let parts: Vec<&str> = args[1..].iter().filter_map(Value::as_str).collect();
                Ok(Value::String(parts.join(&sep)))
            },
        );
        let mut root = Mapping::new();
        root.insert("join", Value::Func(join.clone()));
        let data = Value::Map(root);

        assert_eq!(
            execute(r#"{{join("-", "a", "b", "c")}}"#, &data).unwrap(),
            Value::from("a-b-c")
        );
        // variadic: at least N-1 arguments
        assert!(execute("{{join()}}", &data).is_err());

        let exact = FuncValue::new("one", vec![ParamType::Any], false, |mut args| {
            Ok(args.remove(0))
        });
        let mut root = Mapping::new();
        root.insert("one", Value::Func(exact));
        let data = Value::Map(root);
        assert!(execute("{{one(1, 2)}}", &data).is_err());
    }

    #[test]
    fn test_panic_containment() {
        let boom = FuncValue::new("boom", vec![], false, |_| panic!("exploded"));
        let mut root = Mapping::new();
        root.insert("boom", Value::Func(boom));
        let data = Value::Map(root);

        let err = execute("{{boom()}}", &data).unwrap_err();
        assert!(err.to_string().contains("panic: exploded"), "{err}");
    }

    #[test]
    fn test_execute_twice_yields_equal_results() {
        let data = data_from_yaml("a:\n  b: [10, 20, 30]\n");
        let t = Template::new("{{a.b[2]}}").unwrap();
        assert_eq!(t.execute(&data).unwrap(), t.execute(&data).unwrap());
    }

    struct EchoArg;

    impl LeftArrowFunc for EchoArg {
        fn unmarshal_arg(&self, arg: &ArgDecoder<'_>) -> Result<Value> {
            arg.decode_value()
        }

        fn exec(&self, arg: Value) -> Result<Value> {
            Ok(arg)
        }
    }

    fn left_arrow_env(extra: Vec<(&str, Value)>) -> Value {
        let mut root = Mapping::new();
        root.insert("f", Value::LeftArrowFunc(Arc::new(EchoArg)));
        for (k, v) in extra {
            root.insert(k, v);
        }
        Value::Map(root)
    }

    #[test]
    fn test_left_arrow_serializes_values() {
        let data = left_arrow_env(vec![("x", Value::Int(1))]);
        let got = execute("{{f <-}}\nvalue: '{{x}}'", &data).unwrap();
        let expected = data_from_yaml("value: 1\n");
        assert_eq!(got, expected);
    }

    #[test]
    fn test_left_arrow_restores_callable_identity() {
        let callable = FuncValue::new("cb", vec![], false, |_| Ok(Value::Null));
        let data = left_arrow_env(vec![("cb", Value::Func(callable.clone()))]);

        let got = execute("{{f <-}}\ncallback: '{{cb}}'", &data).unwrap();
        let Value::Map(m) = got else { panic!("expected mapping") };
        let restored = m.get("callback").expect("callback key");
        // identical, not merely equal by serialization
        assert_eq!(restored, &Value::Func(callable));
    }

    #[test]
    fn test_left_arrow_reindents_multiline_values() {
        let data = left_arrow_env(vec![("x", Value::from("a: 1\nb: 2"))]);
        let got = execute("{{f <-}}\n- {{x}}", &data).unwrap();
        let expected = data_from_yaml("- a: 1\n  b: 2\n");
        assert_eq!(got, expected);
    }

    struct TypedArg;

    impl LeftArrowFunc for TypedArg {
        fn unmarshal_arg(&self, arg: &ArgDecoder<'_>) -> Result<Value> {
            #[derive(serde::Deserialize)]
            struct Greeting {
                prefix: String,
                name: String,
            }
            let g: Greeting = arg.decode()?;
            Ok(Value::String(format!("{}, {}", g.prefix, g.name)))
        }

        fn exec(&self, arg: Value) -> Result<Value> {
            Ok(arg)
        }
    }

    #[test]
    fn test_left_arrow_typed_destination() {
        let mut root = Mapping::new();
        root.insert("greet", Value::LeftArrowFunc(Arc::new(TypedArg)));
        root.insert("who", Value::from("world"));
        let data = Value::Map(root);

        let got = execute("{{greet <-}}\nprefix: hello\nname: '{{who}}'", &data).unwrap();
        assert_eq!(got, Value::from("hello, world"));
    }

    #[test]
    fn test_left_arrow_requires_function() {
        let data = data_from_yaml("f: 1\n");
        assert!(execute("{{f <-}}\narg: 1", &data).is_err());
    }
}
