//! Interpretation of JSON default values.
//!
//! Field defaults are kept as raw JSON until a reader actually needs to
//! fill in a missing field.

use crate::error::SchemaError;
use crate::schema::{Field, NamedSchema, Schema, Schemata};
use crate::value::Value;
use serde_json::Value as Json;
use std::collections::BTreeMap;

/// Converts a JSON default literal into its runtime value for `schema`.
///
/// Union defaults always use the first branch. `bytes` and `fixed`
/// defaults are strings whose code points 0-255 are the byte values.
pub fn json_to_value(schema: &Schema, names: &Schemata, json: &Json) -> Result<Value, SchemaError> {
    let invalid = || SchemaError::InvalidDefault {
        schema: schema.to_string(),
        value: json.to_string(),
    };

    match schema {
        Schema::Null => json.is_null().then_some(Value::Null).ok_or_else(invalid),
        Schema::Boolean => json.as_bool().map(Value::Boolean).ok_or_else(invalid),
        Schema::Int => json
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .map(Value::Int)
            .ok_or_else(invalid),
        Schema::Long => json.as_i64().map(Value::Long).ok_or_else(invalid),
        Schema::Float => json.as_f64().map(|x| Value::Float(x as f32)).ok_or_else(invalid),
        Schema::Double => json.as_f64().map(Value::Double).ok_or_else(invalid),
        Schema::String => json
            .as_str()
            .map(|s| Value::String(s.to_string()))
            .ok_or_else(invalid),
        Schema::Bytes => json
            .as_str()
            .and_then(code_points_to_bytes)
            .map(Value::Bytes)
            .ok_or_else(invalid),
        Schema::Array(items) => {
            let elements = json.as_array().ok_or_else(invalid)?;
            elements
                .iter()
                .map(|e| json_to_value(items, names, e))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        Schema::Map(values) => {
            let entries = json.as_object().ok_or_else(invalid)?;
            entries
                .iter()
                .map(|(k, v)| Ok((k.clone(), json_to_value(values, names, v)?)))
                .collect::<Result<BTreeMap<_, _>, SchemaError>>()
                .map(Value::Map)
        }
        Schema::Union(union) => {
            let first = union.branch(0).ok_or_else(invalid)?;
            json_to_value(first, names, json)
        }
        Schema::Request(fields) => record_default(fields, names, json).ok_or_else(invalid)?,
        Schema::Ref(name) => match names.lookup(name) {
            Some(NamedSchema::Record(record)) => {
                record_default(&record.fields, names, json).ok_or_else(invalid)?
            }
            Some(NamedSchema::Enum(enum_schema)) => json
                .as_str()
                .filter(|s| enum_schema.symbol_index(s).is_some())
                .map(|s| Value::Enum(s.to_string()))
                .ok_or_else(invalid),
            Some(NamedSchema::Fixed(fixed)) => json
                .as_str()
                .and_then(code_points_to_bytes)
                .filter(|b| b.len() == fixed.size)
                .map(Value::Fixed)
                .ok_or_else(invalid),
            None => Err(SchemaError::UnknownType(name.fullname().to_string())),
        },
    }
}

/// Returns `None` when `json` is not an object.
fn record_default(
    fields: &[Field],
    names: &Schemata,
    json: &Json,
) -> Option<Result<Value, SchemaError>> {
    let obj = json.as_object()?;
    let result = fields
        .iter()
        .map(|field| {
            let literal = obj
                .get(&field.name)
                .or(field.default.as_ref())
                .ok_or_else(|| SchemaError::InvalidDefault {
                    schema: field.schema.to_string(),
                    value: format!("missing field {}", field.name),
                })?;
            Ok((field.name.clone(), json_to_value(&field.schema, names, literal)?))
        })
        .collect::<Result<BTreeMap<_, _>, SchemaError>>()
        .map(Value::Map);
    Some(result)
}

fn code_points_to_bytes(s: &str) -> Option<Vec<u8>> {
    s.chars().map(|c| u8::try_from(u32::from(c)).ok()).collect()
}
