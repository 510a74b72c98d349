//! Schema to JSON serialization.
//!
//! The first occurrence of a named schema is written as its full
//! definition; every later occurrence is written as its name. This keeps
//! recursive schemas finite and makes the output re-parseable.

use crate::name::Name;
use crate::schema::{Field, NamedSchema, Schema, Schemata};
use serde_json::{json, Map, Value as Json};
use std::collections::HashSet;

/// Serializes schemas sharing one registry, remembering which named
/// schemas were already written in full.
pub struct SchemaJsonWriter<'a> {
    names: &'a Schemata,
    written: HashSet<String>,
}

impl<'a> SchemaJsonWriter<'a> {
    pub fn new(names: &'a Schemata) -> Self {
        Self {
            names,
            written: HashSet::new(),
        }
    }

    pub fn schema_to_json(&mut self, schema: &Schema, default_namespace: Option<&str>) -> Json {
        match schema {
            Schema::Array(items) => json!({
                "type": "array",
                "items": self.schema_to_json(items, default_namespace),
            }),
            Schema::Map(values) => json!({
                "type": "map",
                "values": self.schema_to_json(values, default_namespace),
            }),
            Schema::Union(union) => Json::Array(
                union
                    .branches()
                    .iter()
                    .map(|branch| self.schema_to_json(branch, default_namespace))
                    .collect(),
            ),
            Schema::Ref(name) => self.named_to_json(name, default_namespace),
            Schema::Request(fields) => self.fields_to_json(fields, default_namespace),
            primitive => Json::String(primitive.type_name().to_string()),
        }
    }

    /// Serializes a field list (record body or message request).
    pub fn fields_to_json(&mut self, fields: &[Field], default_namespace: Option<&str>) -> Json {
        Json::Array(
            fields
                .iter()
                .map(|field| self.field_to_json(field, default_namespace))
                .collect(),
        )
    }

    fn field_to_json(&mut self, field: &Field, default_namespace: Option<&str>) -> Json {
        let mut obj = Map::new();
        obj.insert("name".to_string(), Json::String(field.name.clone()));
        obj.insert(
            "type".to_string(),
            self.schema_to_json(&field.schema, default_namespace),
        );
        if let Some(ref doc) = field.doc {
            obj.insert("doc".to_string(), Json::String(doc.clone()));
        }
        if let Some(ref default) = field.default {
            obj.insert("default".to_string(), default.clone());
        }
        if let Some(order) = field.order {
            obj.insert("order".to_string(), Json::String(order.as_str().to_string()));
        }
        Json::Object(obj)
    }

    fn named_to_json(&mut self, name: &Name, default_namespace: Option<&str>) -> Json {
        if self.written.contains(name.fullname()) {
            return Json::String(name.qualified_name(default_namespace).to_string());
        }
        let named = match self.names.lookup(name) {
            Some(named) => named,
            // Reserved but not yet defined: only reachable mid-parse.
            None => return Json::String(name.fullname().to_string()),
        };
        self.written.insert(name.fullname().to_string());

        let mut obj = Map::new();
        obj.insert("type".to_string(), Json::String(named.kind().to_string()));
        obj.insert("name".to_string(), Json::String(name.name().to_string()));
        let default_namespace = default_namespace.filter(|ns| !ns.is_empty());
        if name.namespace() != default_namespace {
            obj.insert(
                "namespace".to_string(),
                Json::String(name.namespace().unwrap_or("").to_string()),
            );
        }

        match named {
            NamedSchema::Record(record) => {
                if let Some(ref doc) = record.doc {
                    obj.insert("doc".to_string(), Json::String(doc.clone()));
                }
                let fields = self.fields_to_json(&record.fields, name.namespace());
                obj.insert("fields".to_string(), fields);
            }
            NamedSchema::Enum(enum_schema) => {
                if let Some(ref doc) = enum_schema.doc {
                    obj.insert("doc".to_string(), Json::String(doc.clone()));
                }
                obj.insert("symbols".to_string(), json!(enum_schema.symbols));
            }
            NamedSchema::Fixed(fixed) => {
                if let Some(ref doc) = fixed.doc {
                    obj.insert("doc".to_string(), Json::String(doc.clone()));
                }
                obj.insert("size".to_string(), json!(fixed.size));
            }
        }

        Json::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use crate::schema::AvroSchema;
    use serde_json::json;

    fn round_trip(json: &str) {
        let first = AvroSchema::parse(json).unwrap();
        let second = AvroSchema::parse_value(&first.to_json()).unwrap();
        assert_eq!(first, second, "round trip of {}", json);
    }

    #[test]
    fn test_primitive_json() {
        let schema = AvroSchema::parse(r#"{"type": "string"}"#).unwrap();
        assert_eq!(schema.to_json(), json!("string"));
        assert_eq!(schema.to_string(), r#""string""#);
    }

    #[test]
    fn test_self_reference_written_by_name() {
        let schema = AvroSchema::parse(
            r#"{"type":"record","name":"ListLink","fields":[{"name":"car","type":"int"},{"name":"cdr","type":"ListLink"}]}"#,
        )
        .unwrap();
        assert_eq!(
            schema.to_json(),
            json!({
                "type": "record",
                "name": "ListLink",
                "fields": [
                    {"name": "car", "type": "int"},
                    {"name": "cdr", "type": "ListLink"}
                ]
            })
        );
    }

    #[test]
    fn test_canonical_round_trips() {
        for json in [
            r#""null""#,
            r#"{"type": "map", "values": {"type": "array", "items": "bytes"}}"#,
            r#"["null", "boolean", {"type": "fixed", "name": "MD5", "size": 16}]"#,
            r#"{"type": "enum", "name": "Suit", "namespace": "cards", "symbols": ["SPADES", "HEARTS"]}"#,
            r#"{"type":"record","name":"ListLink","fields":[{"name":"car","type":"int"},{"name":"cdr","type":"ListLink"}]}"#,
            r#"{"type": "record", "name": "Node", "namespace": "tree", "fields": [
                {"name": "label", "type": "string", "order": "ignore", "doc": "node label"},
                {"name": "children", "type": {"type": "array", "items": "Node"}},
                {"name": "parent", "type": ["null", "tree.Node"], "default": null}
            ]}"#,
            r#"{"type": "record", "name": "A", "namespace": "x", "fields": [
                {"name": "b", "type": {"type": "record", "name": "B", "namespace": "y", "fields": [
                    {"name": "a", "type": ["null", "x.A"]},
                    {"name": "c", "type": {"type": "enum", "name": "C", "namespace": "", "symbols": ["ONE"]}}
                ]}},
                {"name": "c", "type": "C"}
            ]}"#,
        ] {
            round_trip(json);
        }
    }

    #[test]
    fn test_foreign_namespace_reference_uses_fullname() {
        let schema = AvroSchema::parse(
            r#"{"type": "record", "name": "A", "namespace": "x", "fields": [
                {"name": "f", "type": {"type": "fixed", "name": "F", "namespace": "y", "size": 2}},
                {"name": "g", "type": "y.F"}
            ]}"#,
        )
        .unwrap();
        let json = schema.to_json();
        assert_eq!(json["fields"][0]["type"]["namespace"], json!("y"));
        assert_eq!(json["fields"][1]["type"], json!("y.F"));
    }
}
