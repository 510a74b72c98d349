//! # avrorpc-client
//!
//! Client library for avrorpc.
//!
//! This crate provides:
//! - [`SocketTransceiver`], a TCP transport with plain or serial framing
//! - Connect and per-response timeouts
//! - [`Client`], a requester bound to one server connection

pub mod client;
pub mod connection;
pub mod error;

pub use client::Client;
pub use connection::{ConnectionConfig, SocketTransceiver};
pub use error::ClientError;
