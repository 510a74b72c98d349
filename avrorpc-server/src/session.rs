//! Per-connection session state.

use avrorpc_ipc::ConnectionState;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// A client connection.
///
/// Owns the handshake state of its connection; nothing in it is shared
/// with other sessions.
pub struct Session {
    /// Unique session ID.
    pub id: String,

    /// Remote address.
    pub remote_addr: SocketAddr,

    /// Handshake state seen by the responder.
    state: ConnectionState,

    /// Messages handled on this connection.
    request_count: u64,

    created_at: Instant,
    last_activity: Instant,
}

impl Session {
    pub fn new(remote_addr: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4().to_string(),
            remote_addr,
            state: ConnectionState::new(),
            request_count: 0,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ConnectionState {
        &mut self.state
    }

    /// Returns whether the handshake has completed.
    pub fn is_established(&self) -> bool {
        self.state.is_established()
    }

    /// Records an inbound message.
    pub fn touch(&mut self) {
        self.request_count += 1;
        self.last_activity = Instant::now();
    }

    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    /// Time since the last inbound message.
    pub fn idle_duration(&self) -> Duration {
        self.last_activity.elapsed()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}
