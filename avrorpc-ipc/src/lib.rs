//! # avrorpc-ipc
//!
//! Avro RPC over any message transport.
//!
//! A [`Requester`] sends calls of its local protocol through a
//! [`Transceiver`]; a [`Responder`] answers them against its own protocol.
//! The first call on a connection carries a handshake through which both
//! sides learn each other's protocol, so calls resolve between differing
//! protocol versions the same way data files do.

pub mod error;
pub mod requester;
pub mod responder;
pub mod transceiver;

pub use error::{IpcError, RemoteError};
pub use requester::Requester;
pub use responder::{ConnectionState, MessageHandler, Responder};
pub use transceiver::{LocalTransceiver, Transceiver};
