//! Built-in functions bound in the root scope.
//!
//! Builtins are reachable whenever the name is not shadowed by a user
//! binding; they are not first-class values.

use super::{Interpreter, Value};
use crate::error::NaabError;

const BUILTINS: &[&str] = &[
    "print", "len", "str", "int", "float", "type_of", "push", "keys", "values", "contains",
    "abs", "min", "max", "join", "split",
];

/// True when `name` names a builtin.
pub(crate) fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Dispatch a builtin call.
pub(crate) fn call(
    interp: &mut Interpreter,
    name: &str,
    args: Vec<Value>,
) -> Result<Value, NaabError> {
    match name {
        "print" => {
            let line = args
                .iter()
                .map(Value::display_string)
                .collect::<Vec<_>>()
                .join(" ");
            interp.write_line(&line);
            Ok(Value::Null)
        }

        "len" => {
            let [value] = take::<1>(name, args)?;
            match &value {
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::List(l) => Ok(Value::Int(l.read().len() as i64)),
                Value::Dict(d) => Ok(Value::Int(d.read().len() as i64)),
                other => Err(NaabError::type_error(format!(
                    "len() does not accept {}",
                    other.type_name()
                ))),
            }
        }

        "str" => {
            let [value] = take::<1>(name, args)?;
            Ok(Value::string(&value.display_string()))
        }

        "int" => {
            let [value] = take::<1>(name, args)?;
            match &value {
                Value::Int(i) => Ok(Value::Int(*i)),
                Value::Float(f) => Ok(Value::Int(*f as i64)),
                Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
                Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                    NaabError::value_error(format!("invalid integer literal '{s}'"))
                }),
                other => Err(NaabError::type_error(format!(
                    "int() does not accept {}",
                    other.type_name()
                ))),
            }
        }

        "float" => {
            let [value] = take::<1>(name, args)?;
            match &value {
                Value::Int(i) => Ok(Value::Float(*i as f64)),
                Value::Float(f) => Ok(Value::Float(*f)),
                Value::Str(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                    NaabError::value_error(format!("invalid float literal '{s}'"))
                }),
                other => Err(NaabError::type_error(format!(
                    "float() does not accept {}",
                    other.type_name()
                ))),
            }
        }

        "type_of" => {
            let [value] = take::<1>(name, args)?;
            Ok(Value::string(value.type_name()))
        }

        "push" => {
            let [list, item] = take::<2>(name, args)?;
            match &list {
                Value::List(l) => {
                    l.write().push(item);
                    Ok(list)
                }
                other => Err(NaabError::type_error(format!(
                    "push() expects a list, got {}",
                    other.type_name()
                ))),
            }
        }

        "keys" => {
            let [dict] = take::<1>(name, args)?;
            match &dict {
                Value::Dict(d) => Ok(Value::list(
                    d.read().keys().map(|k| Value::string(k)).collect(),
                )),
                other => Err(NaabError::type_error(format!(
                    "keys() expects a dict, got {}",
                    other.type_name()
                ))),
            }
        }

        "values" => {
            let [dict] = take::<1>(name, args)?;
            match &dict {
                Value::Dict(d) => Ok(Value::list(d.read().values().cloned().collect())),
                other => Err(NaabError::type_error(format!(
                    "values() expects a dict, got {}",
                    other.type_name()
                ))),
            }
        }

        "contains" => {
            let [container, needle] = take::<2>(name, args)?;
            match &container {
                Value::List(l) => Ok(Value::Bool(l.read().iter().any(|v| v.equals(&needle)))),
                Value::Dict(d) => match needle.as_str() {
                    Some(key) => Ok(Value::Bool(d.read().contains_key(key))),
                    None => Err(NaabError::type_error("dict keys are strings")),
                },
                Value::Str(s) => match needle.as_str() {
                    Some(sub) => Ok(Value::Bool(s.contains(sub))),
                    None => Err(NaabError::type_error("contains() on a string expects a string")),
                },
                other => Err(NaabError::type_error(format!(
                    "contains() does not accept {}",
                    other.type_name()
                ))),
            }
        }

        "abs" => {
            let [value] = take::<1>(name, args)?;
            match &value {
                Value::Int(i) => i
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| NaabError::value_error(format!("integer overflow in abs({i})"))),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                other => Err(NaabError::type_error(format!(
                    "abs() does not accept {}",
                    other.type_name()
                ))),
            }
        }

        "min" | "max" => {
            if args.len() < 2 {
                return Err(NaabError::type_error(format!(
                    "{name}() expects at least 2 arguments"
                )));
            }
            let mut best = args[0].clone();
            for candidate in &args[1..] {
                let (a, b) = match (best.as_float(), candidate.as_float()) {
                    (Some(a), Some(b)) => (a, b),
                    _ => {
                        return Err(NaabError::type_error(format!(
                            "{name}() expects numbers"
                        )))
                    }
                };
                let replace = if name == "min" { b < a } else { b > a };
                if replace {
                    best = candidate.clone();
                }
            }
            Ok(best)
        }

        "join" => {
            let [list, sep] = take::<2>(name, args)?;
            let (Value::List(items), Some(sep)) = (&list, sep.as_str()) else {
                return Err(NaabError::type_error("join() expects a list and a string"));
            };
            let parts: Vec<String> = items.read().iter().map(Value::display_string).collect();
            Ok(Value::string(&parts.join(sep)))
        }

        "split" => {
            let [text, sep] = take::<2>(name, args)?;
            let (Some(text), Some(sep)) = (text.as_str(), sep.as_str()) else {
                return Err(NaabError::type_error("split() expects two strings"));
            };
            Ok(Value::list(text.split(sep).map(Value::string).collect()))
        }

        _ => Err(NaabError::name_error(name, &[])),
    }
}

fn take<const N: usize>(name: &str, args: Vec<Value>) -> Result<[Value; N], NaabError> {
    let len = args.len();
    args.try_into().map_err(|_| {
        NaabError::type_error(format!("{name}() expects {N} arguments, got {len}"))
    })
}
