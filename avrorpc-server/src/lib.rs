//! # avrorpc-server
//!
//! TCP server for avrorpc.
//!
//! This crate provides:
//! - TCP connection handling with async I/O
//! - Plain and serial message framing
//! - Per-connection handshake sessions over a shared [`avrorpc_ipc::Responder`]
//! - YAML and environment configuration
//! - The built-in `Simple` demonstration protocol

pub mod config;
pub mod demo;
pub mod error;
pub mod server;
pub mod session;

pub use config::{Config, ConfigError, NetworkConfig, ProtocolConfig};
pub use demo::{simple_protocol, SimpleHandler, SIMPLE_PROTOCOL};
pub use error::ServerError;
pub use server::{Server, ServerConfig, ServerStats};
pub use session::Session;
