//! Built-in demonstration protocol and its handler.

use avrorpc_ipc::{MessageHandler, RemoteError};
use avrorpc_protocol::{Message, Protocol, ProtocolError};
use avrorpc_schema::{Record, Value};

/// The `Simple` protocol served when no protocol file is configured.
pub const SIMPLE_PROTOCOL: &str = r#"{
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
            "doc": "Pretend you're in a cave!",
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
            "doc": "Always throws an error.",
            "request": [],
            "response": "null",
            "errors": ["TestError"]
        },
        "ack": {
            "doc": "Send a one way message",
            "request": [],
            "response": "null",
            "one-way": true
        }
    }
}"#;

pub fn simple_protocol() -> Result<Protocol, ProtocolError> {
    Protocol::parse(SIMPLE_PROTOCOL)
}

/// Handler answering the `Simple` protocol.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleHandler;

impl MessageHandler for SimpleHandler {
    fn invoke(&self, message: &Message, request: &Value) -> Result<Value, RemoteError> {
        let param = |name: &str| {
            request
                .field(name)
                .ok_or_else(|| RemoteError::system(format!("missing parameter '{}'", name)))
        };

        match message.name() {
            "hello" => {
                let greeting = param("greeting")?.as_str().unwrap_or_default();
                Ok(Value::String(format!("goodbye {}", greeting)))
            }
            "echo" | "echoBytes" => {
                let field = if message.name() == "echo" { "record" } else { "data" };
                param(field).cloned()
            }
            "add" => {
                let sum = param("arg1")?.as_i64().unwrap_or(0) + param("arg2")?.as_i64().unwrap_or(0);
                i32::try_from(sum)
                    .map(Value::Int)
                    .map_err(|_| RemoteError::system("int overflow"))
            }
            "error" => Err(RemoteError::declared(
                "org.apache.avro.test.TestError",
                Record::new("org.apache.avro.test.TestError")
                    .with("message", "an error")
                    .into(),
            )),
            "ack" => {
                tracing::debug!("ack received");
                Ok(Value::Null)
            }
            other => Err(RemoteError::system(format!("no handler for '{}'", other))),
        }
    }
}
