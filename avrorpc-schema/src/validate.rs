//! Datum validation against a schema.

use crate::schema::{NamedSchema, Schema, Schemata};
use crate::value::Value;
use std::collections::BTreeMap;

/// Returns whether `datum` conforms to `schema`.
///
/// Integers are range-checked rather than tag-checked, so `Value::Long(5)`
/// is a valid `int`. Records accept either a [`Value::Record`] tagged with
/// the schema's name or a map holding every field without a default.
pub fn is_valid_datum(schema: &Schema, names: &Schemata, datum: &Value) -> bool {
    match schema {
        Schema::Null => datum.is_null(),
        Schema::Boolean => matches!(datum, Value::Boolean(_)),
        Schema::Int => datum
            .as_i64()
            .map_or(false, |n| i32::try_from(n).is_ok()),
        Schema::Long => datum.as_i64().is_some(),
        Schema::Float | Schema::Double => datum.as_f64().is_some(),
        Schema::String => matches!(datum, Value::String(_)),
        Schema::Bytes => matches!(datum, Value::Bytes(_) | Value::String(_)),
        Schema::Array(items) => match datum {
            Value::Array(values) => values.iter().all(|v| is_valid_datum(items, names, v)),
            _ => false,
        },
        Schema::Map(values) => match datum {
            Value::Map(entries) => entries.values().all(|v| is_valid_datum(values, names, v)),
            _ => false,
        },
        Schema::Union(union) => union
            .branches()
            .iter()
            .any(|branch| is_valid_datum(branch, names, datum)),
        Schema::Request(fields) => match datum.fields() {
            Some(entries) => fields_valid(fields, names, entries),
            None => false,
        },
        Schema::Ref(name) => match names.lookup(name) {
            Some(NamedSchema::Record(record)) => match datum {
                Value::Record(r) => {
                    (r.name() == name.fullname() || r.name() == name.name())
                        && fields_valid(&record.fields, names, r.fields())
                }
                Value::Map(entries) => fields_valid(&record.fields, names, entries),
                _ => false,
            },
            Some(NamedSchema::Enum(enum_schema)) => datum
                .as_str()
                .map_or(false, |s| enum_schema.symbol_index(s).is_some()),
            Some(NamedSchema::Fixed(fixed)) => match datum {
                Value::Fixed(b) | Value::Bytes(b) => b.len() == fixed.size,
                Value::String(s) => s.len() == fixed.size,
                _ => false,
            },
            None => false,
        },
    }
}

fn fields_valid(
    fields: &[crate::schema::Field],
    names: &Schemata,
    entries: &BTreeMap<String, Value>,
) -> bool {
    fields.iter().all(|field| match entries.get(&field.name) {
        Some(value) => is_valid_datum(&field.schema, names, value),
        None => field.has_default(),
    })
}
