//! Session configuration.
//!
//! A `SessionConfig` is built once by the orchestrator and cloned into
//! every session task. It is never mutated after construction.

use std::time::Duration;

/// The role a session binds with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMode {
    /// Sends requests, does not receive incoming receipts.
    Transmitter,

    /// Receives incoming receipts only, never sends.
    Receiver,

    /// Sends requests and receives receipts on the same session.
    Transceiver,
}

impl BindMode {
    /// Whether sessions bound with this mode run the send loop.
    pub fn sends(self) -> bool {
        matches!(self, Self::Transmitter | Self::Transceiver)
    }

    /// Whether sessions bound with this mode accept incoming receipts.
    pub fn receives(self) -> bool {
        matches!(self, Self::Receiver | Self::Transceiver)
    }
}

/// Immutable per-session configuration.
///
/// Shared read-only across all session tasks of a run; each task gets its
/// own clone.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Peer host to connect to.
    pub host: String,

    /// Peer port to connect to.
    pub port: u16,

    /// Bind role for this session.
    pub mode: BindMode,

    /// Maximum number of outstanding requests the session may hold.
    ///
    /// Backpressure is enforced by the session itself: a send issued
    /// against a full window blocks until capacity frees up.
    pub window_size: usize,

    /// System identifier presented during the bind handshake.
    pub system_id: String,

    /// Credential presented during the bind handshake.
    pub password: String,

    /// How long a bind attempt may take before it fails.
    pub connect_timeout: Duration,

    /// Per-request expiry used by synchronous sends.
    pub request_timeout: Duration,

    /// How long an unbind may wait for in-flight requests to settle.
    pub unbind_timeout: Duration,

    /// Whether submits request a delivery receipt from the peer.
    pub registered_receipts: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8088,
            mode: BindMode::Transmitter,
            window_size: 5,
            system_id: "loadclient1".to_string(),
            password: "password".to_string(),
            connect_timeout: Duration::from_secs(50),
            request_timeout: Duration::from_secs(10),
            unbind_timeout: Duration::from_secs(5),
            registered_receipts: true,
        }
    }
}

impl SessionConfig {
    /// Return a copy of this configuration with a different bind mode.
    pub fn with_mode(&self, mode: BindMode) -> Self {
        Self { mode, ..self.clone() }
    }
}
