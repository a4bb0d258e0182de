//! Value ↔ JSON conversion.
//!
//! Subprocess executors marshal by serialisation: arguments are encoded
//! as JSON on the way out, and the output parser recovers results as
//! JSON on the way back. Embedded runtimes have their own marshallers
//! (see the executor modules); this one is the common denominator.

use crate::error::NaabError;
use crate::interpreter::Value;
use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Number, Value as Json};

/// Convert a JSON document into a runtime value.
///
/// null→Null, booleans→Bool, integral numbers→Int, fractional→Float,
/// strings→String, arrays→List, objects→Dict (insertion order kept).
pub fn json_to_value(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                // Out-of-range integers and fractional numbers both land
                // here; precision loss for the former is documented.
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Json::String(s) => Value::string(s),
        Json::Array(items) => Value::list(items.iter().map(json_to_value).collect()),
        Json::Object(entries) => {
            let mut dict = IndexMap::new();
            for (k, v) in entries {
                dict.insert(k.clone(), json_to_value(v));
            }
            Value::dict(dict)
        }
    }
}

/// Convert a runtime value into JSON.
///
/// Functions, blocks and foreign handles are not representable and fail
/// with a Type error naming the variant.
pub fn value_to_json(value: &Value) -> Result<Json, NaabError> {
    match value {
        Value::Null => Ok(Json::Null),
        Value::Bool(b) => Ok(Json::Bool(*b)),
        Value::Int(i) => Ok(Json::Number(Number::from(*i))),
        Value::Float(f) => Number::from_f64(*f)
            .map(Json::Number)
            .ok_or_else(|| NaabError::value_error(format!("cannot serialise float {f}"))),
        Value::Str(s) => Ok(Json::String(s.to_string())),
        Value::List(items) => {
            let items = items.read();
            let mut out = Vec::with_capacity(items.len());
            for item in items.iter() {
                out.push(value_to_json(item)?);
            }
            Ok(Json::Array(out))
        }
        Value::Dict(entries) => {
            let entries = entries.read();
            let mut out = JsonMap::new();
            for (k, v) in entries.iter() {
                out.insert(k.clone(), value_to_json(v)?);
            }
            Ok(Json::Object(out))
        }
        Value::Struct(s) => {
            let fields = s.fields.read();
            let mut out = JsonMap::new();
            for ((name, _), v) in s.def.fields.iter().zip(fields.iter()) {
                out.insert(name.clone(), value_to_json(v)?);
            }
            Ok(Json::Object(out))
        }
        other => Err(NaabError::type_error(format!(
            "cannot marshal {} across a subprocess boundary",
            other.type_name()
        ))),
    }
}

/// Encode `bindings` as one JSON object for subprocess argv.
pub fn bindings_to_json(bindings: &[(String, Value)]) -> Result<String, NaabError> {
    let mut out = JsonMap::new();
    for (name, value) in bindings {
        out.insert(name.clone(), value_to_json(value)?);
    }
    Ok(Json::Object(out).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: Value) {
        let json = value_to_json(&value).unwrap();
        let back = json_to_value(&json);
        assert!(value.equals(&back), "{value:?} != {back:?}");
    }

    #[test]
    fn test_round_trips_for_representable_variants() {
        round_trip(Value::Null);
        round_trip(Value::Int(-42));
        round_trip(Value::Float(2.5));
        round_trip(Value::Bool(true));
        round_trip(Value::string("polyglot"));
        round_trip(Value::list(vec![
            Value::Int(1),
            Value::string("two"),
            Value::list(vec![Value::Bool(false)]),
        ]));
        let mut dict = IndexMap::new();
        dict.insert("double".to_string(), Value::Int(14));
        dict.insert("square".to_string(), Value::Int(49));
        round_trip(Value::dict(dict));
    }

    #[test]
    fn test_oversized_integers_become_floats() {
        let json: Json = serde_json::from_str("18446744073709551615").unwrap(); // > i64::MAX
        let v = json_to_value(&json);
        assert!(matches!(v, Value::Float(_)));
    }

    #[test]
    fn test_unrepresentable_values_are_type_errors() {
        let exec: std::sync::Arc<dyn crate::polyglot::Executor> =
            std::sync::Arc::new(crate::polyglot::testing::MockExecutor::new("mock"));
        let block = Value::Block(std::sync::Arc::new(crate::interpreter::BlockValue {
            metadata: crate::interpreter::BlockMetadata {
                id: "<inline>".to_string(),
                language: "mock".to_string(),
                version: "0".to_string(),
                hash: String::new(),
            },
            source: String::new(),
            executor: exec,
        }));
        let err = value_to_json(&block).unwrap_err();
        assert!(err.message.contains("block"));
    }

    #[test]
    fn test_bindings_encode_as_object() {
        let bindings = vec![
            ("a".to_string(), Value::Int(1)),
            ("b".to_string(), Value::string("x")),
        ];
        let encoded = bindings_to_json(&bindings).unwrap();
        let parsed: Json = serde_json::from_str(&encoded).unwrap();
        assert_eq!(parsed["a"], 1);
        assert_eq!(parsed["b"], "x");
    }

    #[test]
    fn test_struct_serialises_as_object() {
        use crate::ast::TypeExpr;
        use crate::interpreter::{StructDef, StructInstance};
        use parking_lot::RwLock;
        use std::sync::Arc;

        let def = Arc::new(StructDef::new(
            "Point",
            vec![
                ("x".to_string(), TypeExpr::Int),
                ("y".to_string(), TypeExpr::Int),
            ],
        ));
        let value = Value::Struct(Arc::new(StructInstance {
            def,
            fields: RwLock::new(vec![Value::Int(1), Value::Int(2)]),
        }));
        let json = value_to_json(&value).unwrap();
        assert_eq!(json["x"], 1);
        assert_eq!(json["y"], 2);
    }
}
