//! Avro protocol definitions.
//!
//! A protocol declares named types and a set of messages. Every schema in
//! a protocol shares one [`Schemata`], so messages may refer to declared
//! types by name. A protocol's identity is the MD5 of its canonical JSON.

use crate::error::ProtocolError;
use avrorpc_schema::{
    AvroSchema, Field, Name, NamedSchema, Parser, Schema, SchemaJsonWriter, Schemata, UnionSchema,
};
use md5::{Digest, Md5};
use serde_json::{Map, Value as Json};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// MD5 of a protocol's canonical JSON.
pub type ProtocolHash = [u8; 16];

/// A parsed Avro protocol.
#[derive(Debug, Clone)]
pub struct Protocol {
    name: Name,
    doc: Option<String>,
    names: Arc<Schemata>,
    types: Vec<Schema>,
    messages: Vec<Message>,
    json: OnceLock<String>,
    hash: OnceLock<ProtocolHash>,
}

/// A single RPC message of a protocol.
#[derive(Debug, Clone)]
pub struct Message {
    name: String,
    doc: Option<String>,
    request: AvroSchema,
    response: AvroSchema,
    errors: AvroSchema,
    declared_errors: Vec<Name>,
    one_way: bool,
}

/// Message parts collected while the registry is still being filled.
struct ParsedMessage {
    name: String,
    doc: Option<String>,
    request: Vec<Field>,
    response: Schema,
    declared_errors: Vec<Name>,
    one_way: bool,
}

impl Protocol {
    pub fn parse(json: &str) -> Result<Self, ProtocolError> {
        let value: Json = serde_json::from_str(json)?;
        Self::parse_value(&value)
    }

    pub fn parse_value(json: &Json) -> Result<Self, ProtocolError> {
        let obj = json
            .as_object()
            .ok_or_else(|| ProtocolError::InvalidProtocol("protocol must be a JSON object".into()))?;

        let protocol_name = obj
            .get("protocol")
            .and_then(Json::as_str)
            .ok_or_else(|| ProtocolError::InvalidProtocol("missing 'protocol' name".into()))?;
        let namespace = optional_str(obj, "namespace")?;
        let name = Name::new(protocol_name, namespace, None)?;
        let doc = optional_str(obj, "doc")?.map(str::to_string);
        let ns = name.namespace();

        let mut names = Schemata::new();
        let mut parser = Parser::new(&mut names);

        let mut types = Vec::new();
        match obj.get("types") {
            None | Some(Json::Null) => {}
            Some(Json::Array(list)) => {
                for type_json in list {
                    types.push(parser.parse(type_json, ns)?);
                }
            }
            Some(_) => return Err(ProtocolError::InvalidProtocol("'types' must be an array".into())),
        }

        let mut parsed = Vec::new();
        match obj.get("messages") {
            None | Some(Json::Null) => {}
            Some(Json::Object(messages)) => {
                for (message_name, message_json) in messages {
                    parsed.push(parse_message(&mut parser, message_name, message_json, ns)?);
                }
            }
            Some(_) => {
                return Err(ProtocolError::InvalidProtocol("'messages' must be an object".into()))
            }
        }

        let names = Arc::new(names);
        let messages = parsed
            .into_iter()
            .map(|m| Message::build(m, &names))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(protocol = %name, types = types.len(), messages = messages.len(), "parsed protocol");
        Ok(Self {
            name,
            doc,
            names,
            types,
            messages,
            json: OnceLock::new(),
            hash: OnceLock::new(),
        })
    }

    /// Short protocol name.
    pub fn name(&self) -> &str {
        self.name.name()
    }

    pub fn fullname(&self) -> &str {
        self.name.fullname()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.name.namespace()
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    pub fn names(&self) -> &Arc<Schemata> {
        &self.names
    }

    /// Declared types, in declaration order.
    pub fn types(&self) -> &[Schema] {
        &self.types
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn message(&self, name: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.name == name)
    }

    /// Wraps a schema rooted in this protocol's registry.
    pub fn schema(&self, root: Schema) -> AvroSchema {
        AvroSchema::new(root, Arc::clone(&self.names))
    }

    pub fn to_json(&self) -> Json {
        let ns = self.namespace();
        let mut writer = SchemaJsonWriter::new(&self.names);

        let mut obj = Map::new();
        obj.insert("protocol".into(), Json::String(self.name().to_string()));
        if let Some(ns) = ns {
            obj.insert("namespace".into(), Json::String(ns.to_string()));
        }
        if let Some(ref doc) = self.doc {
            obj.insert("doc".into(), Json::String(doc.clone()));
        }

        let types = self
            .types
            .iter()
            .map(|t| writer.schema_to_json(t, ns))
            .collect();
        obj.insert("types".into(), Json::Array(types));

        let mut messages = Map::new();
        for message in &self.messages {
            messages.insert(message.name.clone(), message.to_json(&mut writer, ns));
        }
        obj.insert("messages".into(), Json::Object(messages));
        Json::Object(obj)
    }

    /// Canonical JSON text, computed once.
    pub fn canonical_json(&self) -> &str {
        self.json.get_or_init(|| self.to_json().to_string())
    }

    /// Identity hash, computed once.
    pub fn md5(&self) -> ProtocolHash {
        *self.hash.get_or_init(|| {
            let digest = Md5::digest(self.canonical_json().as_bytes());
            let mut hash = [0u8; 16];
            hash.copy_from_slice(&digest);
            hash
        })
    }

    pub fn md5_hex(&self) -> String {
        hex::encode(self.md5())
    }
}

impl PartialEq for Protocol {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_json() == other.canonical_json()
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_json())
    }
}

impl Message {
    fn build(parsed: ParsedMessage, names: &Arc<Schemata>) -> Result<Self, ProtocolError> {
        let mut branches = vec![Schema::String];
        for error in &parsed.declared_errors {
            match names.lookup(error) {
                Some(NamedSchema::Record(record)) if record.is_error => {
                    branches.push(Schema::Ref(error.clone()));
                }
                _ => {
                    return Err(ProtocolError::invalid_message(
                        &parsed.name,
                        format!("'{}' is not an error type", error),
                    ))
                }
            }
        }
        let errors = UnionSchema::new(branches)?;

        Ok(Self {
            name: parsed.name,
            doc: parsed.doc,
            request: AvroSchema::new(Schema::Request(parsed.request), Arc::clone(names)),
            response: AvroSchema::new(parsed.response, Arc::clone(names)),
            errors: AvroSchema::new(Schema::Union(errors), Arc::clone(names)),
            declared_errors: parsed.declared_errors,
            one_way: parsed.one_way,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    /// Anonymous record of request parameters.
    pub fn request(&self) -> &AvroSchema {
        &self.request
    }

    pub fn request_fields(&self) -> &[Field] {
        match self.request.root() {
            Schema::Request(fields) => fields,
            _ => &[],
        }
    }

    pub fn response(&self) -> &AvroSchema {
        &self.response
    }

    /// Error union: `"string"` first, then the declared error types.
    pub fn errors(&self) -> &AvroSchema {
        &self.errors
    }

    pub fn declared_errors(&self) -> &[Name] {
        &self.declared_errors
    }

    pub fn is_one_way(&self) -> bool {
        self.one_way
    }

    fn to_json(&self, writer: &mut SchemaJsonWriter<'_>, ns: Option<&str>) -> Json {
        let mut obj = Map::new();
        if let Some(ref doc) = self.doc {
            obj.insert("doc".into(), Json::String(doc.clone()));
        }
        obj.insert("request".into(), writer.fields_to_json(self.request_fields(), ns));
        obj.insert("response".into(), writer.schema_to_json(self.response.root(), ns));
        if !self.declared_errors.is_empty() {
            let errors = self
                .declared_errors
                .iter()
                .map(|e| Json::String(e.qualified_name(ns).to_string()))
                .collect();
            obj.insert("errors".into(), Json::Array(errors));
        }
        if self.one_way {
            obj.insert("one-way".into(), Json::Bool(true));
        }
        Json::Object(obj)
    }
}

fn parse_message(
    parser: &mut Parser<'_>,
    name: &str,
    json: &Json,
    ns: Option<&str>,
) -> Result<ParsedMessage, ProtocolError> {
    let obj = json
        .as_object()
        .ok_or_else(|| ProtocolError::invalid_message(name, "message must be an object"))?;

    let request = match obj.get("request") {
        Some(Json::Array(fields)) => parser.parse_fields(fields, name, ns)?,
        Some(_) => return Err(ProtocolError::invalid_message(name, "'request' must be an array")),
        None => return Err(ProtocolError::invalid_message(name, "missing 'request'")),
    };

    let response = match obj.get("response") {
        Some(response) => parser.parse(response, ns)?,
        None => Schema::Null,
    };

    let mut declared_errors = Vec::new();
    match obj.get("errors") {
        None | Some(Json::Null) => {}
        Some(Json::Array(list)) => {
            for entry in list {
                let error_type = entry
                    .as_str()
                    .ok_or_else(|| ProtocolError::invalid_message(name, "error types must be names"))?;
                match parser.resolve_reference(error_type, ns) {
                    Ok(Schema::Ref(error)) => declared_errors.push(error),
                    _ => {
                        return Err(ProtocolError::UnknownErrorType {
                            message: name.to_string(),
                            error_type: error_type.to_string(),
                        })
                    }
                }
            }
        }
        Some(_) => return Err(ProtocolError::invalid_message(name, "'errors' must be an array")),
    }

    let one_way = match obj.get("one-way") {
        None => false,
        Some(Json::Bool(b)) => *b,
        Some(_) => return Err(ProtocolError::invalid_message(name, "'one-way' must be a boolean")),
    };
    if one_way && response != Schema::Null {
        return Err(ProtocolError::invalid_message(name, "one-way message must have a null response"));
    }
    if one_way && !declared_errors.is_empty() {
        return Err(ProtocolError::invalid_message(name, "one-way message cannot declare errors"));
    }

    Ok(ParsedMessage {
        name: name.to_string(),
        doc: optional_str(obj, "doc")?.map(str::to_string),
        request,
        response,
        declared_errors,
        one_way,
    })
}

fn optional_str<'a>(obj: &'a Map<String, Json>, key: &str) -> Result<Option<&'a str>, ProtocolError> {
    match obj.get(key) {
        None | Some(Json::Null) => Ok(None),
        Some(Json::String(s)) => Ok(Some(s)),
        Some(_) => Err(ProtocolError::InvalidProtocol(format!("'{}' must be a string", key))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = r#"{
        "protocol": "Simple",
        "namespace": "org.apache.avro.test",
        "doc": "Protocol used for testing.",
        "types": [
            {"type": "enum", "name": "Kind", "symbols": ["FOO", "BAR", "BAZ"]},
            {"type": "fixed", "name": "MD5", "size": 16},
            {"type": "record", "name": "TestRecord", "fields": [
                {"name": "name", "type": "string", "order": "ignore"},
                {"name": "kind", "type": "Kind", "order": "descending"},
                {"name": "hash", "type": "MD5"}
            ]},
            {"type": "error", "name": "TestError", "fields": [
                {"name": "message", "type": "string"}
            ]}
        ],
        "messages": {
            "hello": {
                "doc": "Send a greeting",
                "request": [{"name": "greeting", "type": "string"}],
                "response": "string"
            },
            "echo": {
                "request": [{"name": "record", "type": "TestRecord"}],
                "response": "TestRecord"
            },
            "add": {
                "request": [{"name": "arg1", "type": "int"}, {"name": "arg2", "type": "int"}],
                "response": "int"
            },
            "echoBytes": {
                "request": [{"name": "data", "type": "bytes"}],
                "response": "bytes"
            },
            "error": {
                "request": [],
                "response": "null",
                "errors": ["TestError"]
            },
            "ack": {
                "request": [],
                "response": "null",
                "one-way": true
            }
        }
    }"#;

    #[test]
    fn test_parse_simple() {
        let protocol = Protocol::parse(SIMPLE).unwrap();
        assert_eq!(protocol.name(), "Simple");
        assert_eq!(protocol.fullname(), "org.apache.avro.test.Simple");
        assert_eq!(protocol.types().len(), 4);
        assert_eq!(protocol.messages().count(), 6);

        let hello = protocol.message("hello").unwrap();
        assert_eq!(hello.doc(), Some("Send a greeting"));
        assert_eq!(hello.request_fields().len(), 1);
        assert_eq!(hello.response().root(), &Schema::String);
        assert!(!hello.is_one_way());

        let echo = protocol.message("echo").unwrap();
        assert_eq!(echo.response().root().type_name(), "org.apache.avro.test.TestRecord");

        let error = protocol.message("error").unwrap();
        assert_eq!(error.declared_errors().len(), 1);
        assert_eq!(error.errors().root().to_string(), "[string, org.apache.avro.test.TestError]");

        assert!(protocol.message("ack").unwrap().is_one_way());
        assert!(protocol.message("missing").is_none());
    }

    #[test]
    fn test_undeclared_errors_union_is_string_only() {
        let protocol = Protocol::parse(SIMPLE).unwrap();
        let hello = protocol.message("hello").unwrap();
        assert_eq!(hello.errors().root().to_string(), "[string]");
    }

    #[test]
    fn test_json_roundtrip_preserves_hash() {
        let protocol = Protocol::parse(SIMPLE).unwrap();
        let reparsed = Protocol::parse(protocol.canonical_json()).unwrap();
        assert_eq!(protocol, reparsed);
        assert_eq!(protocol.md5(), reparsed.md5());
        assert_eq!(protocol.md5_hex().len(), 32);
    }

    #[test]
    fn test_hash_differs_between_protocols() {
        let a = Protocol::parse(SIMPLE).unwrap();
        let b = Protocol::parse(r#"{"protocol": "Other", "messages": {}}"#).unwrap();
        assert_ne!(a.md5(), b.md5());
    }

    #[test]
    fn test_to_json_shape() {
        let protocol = Protocol::parse(SIMPLE).unwrap();
        let json = protocol.to_json();
        assert_eq!(json["protocol"], "Simple");
        assert_eq!(json["namespace"], "org.apache.avro.test");
        assert_eq!(json["types"][0]["type"], "enum");
        assert_eq!(json["messages"]["echo"]["response"], "TestRecord");
        assert_eq!(json["messages"]["error"]["errors"][0], "TestError");
        assert_eq!(json["messages"]["ack"]["one-way"], true);
        assert!(json["messages"]["hello"].get("errors").is_none());
    }

    #[test]
    fn test_inline_response_type() {
        let protocol = Protocol::parse(
            r#"{"protocol": "P", "messages": {"m": {
                "request": [],
                "response": {"type": "record", "name": "Out", "fields": [{"name": "x", "type": "long"}]}
            }}}"#,
        )
        .unwrap();
        assert!(protocol.names().contains("Out"));
    }

    #[test]
    fn test_unknown_error_type() {
        let result = Protocol::parse(
            r#"{"protocol": "P", "messages": {"m": {"request": [], "errors": ["Nope"]}}}"#,
        );
        assert!(matches!(result, Err(ProtocolError::UnknownErrorType { .. })));
    }

    #[test]
    fn test_error_must_be_error_kind() {
        let result = Protocol::parse(
            r#"{"protocol": "P",
                "types": [{"type": "record", "name": "NotError", "fields": []}],
                "messages": {"m": {"request": [], "errors": ["NotError"]}}}"#,
        );
        assert!(matches!(result, Err(ProtocolError::InvalidMessage { .. })));
    }

    #[test]
    fn test_one_way_constraints() {
        let with_response = Protocol::parse(
            r#"{"protocol": "P", "messages": {"m": {"request": [], "response": "int", "one-way": true}}}"#,
        );
        assert!(matches!(with_response, Err(ProtocolError::InvalidMessage { .. })));

        let with_errors = Protocol::parse(
            r#"{"protocol": "P",
                "types": [{"type": "error", "name": "E", "fields": []}],
                "messages": {"m": {"request": [], "errors": ["E"], "one-way": true}}}"#,
        );
        assert!(matches!(with_errors, Err(ProtocolError::InvalidMessage { .. })));
    }

    #[test]
    fn test_invalid_protocol_documents() {
        assert!(matches!(Protocol::parse("[]"), Err(ProtocolError::InvalidProtocol(_))));
        assert!(matches!(
            Protocol::parse(r#"{"namespace": "x"}"#),
            Err(ProtocolError::InvalidProtocol(_))
        ));
        assert!(matches!(Protocol::parse("{"), Err(ProtocolError::Json(_))));
        assert!(matches!(
            Protocol::parse(r#"{"protocol": "P", "types": [{"type": "record", "name": "int", "fields": []}]}"#),
            Err(ProtocolError::Schema(_))
        ));
        assert!(matches!(
            Protocol::parse(r#"{"protocol": "P", "messages": {"m": {"response": "int"}}}"#),
            Err(ProtocolError::InvalidMessage { .. })
        ));
    }
}
