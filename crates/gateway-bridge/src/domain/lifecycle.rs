//! Session lifecycle state machine.
//!
//! ```text
//! [CONNECTING] ──CONNECT──→ [AUTHENTICATING] ──accepted──→ [ACTIVE]
//!      │                          │                           │
//!      │ timeout / bad packet     │ rejected / terminated     │ terminated
//!      ↓                          ↓                           ↓
//!   [CLOSED] ←─────────────────────────────── [CLOSING] ←─────┘
//!                                  teardown complete
//! ```
//!
//! Transitions are deterministic; events that do not apply to the current
//! state leave it unchanged.

use std::fmt;
use tracing::debug;

/// Session state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Transport accepted, waiting for CONNECT
    #[default]
    Connecting,
    /// Credentials submitted to the validator
    Authenticating,
    /// Connection registered, bidirectional pump running
    Active,
    /// Tearing down the registered connection
    Closing,
    /// Terminal
    Closed,
}

/// Why a session ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    ClientDisconnect,
    ConnectTimeout,
    ProtocolViolation,
    AuthenticationFailed,
    AlreadyConnected,
    KeepAliveExpired,
    TransportFailure,
    /// The connection was closed elsewhere (eviction, unregister)
    ConnectionClosed,
    ViolationLimit,
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::ClientDisconnect => "client disconnect",
            Self::ConnectTimeout => "connect timeout",
            Self::ProtocolViolation => "protocol violation",
            Self::AuthenticationFailed => "authentication failed",
            Self::AlreadyConnected => "already connected",
            Self::KeepAliveExpired => "keep-alive expired",
            Self::TransportFailure => "transport failure",
            Self::ConnectionClosed => "connection closed",
            Self::ViolationLimit => "violation limit reached",
            Self::Shutdown => "shutdown",
        };
        f.write_str(text)
    }
}

/// Events that drive session transitions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// A well-formed CONNECT arrived
    ConnectReceived,
    /// Validator accepted and the connection was registered
    Authenticated,
    /// The session ends for the given reason
    Terminate(CloseReason),
    /// Registry entry removed and connection closed
    TeardownComplete,
}

/// Tracks one session's state and violation count.
#[derive(Debug)]
pub struct SessionLifecycle {
    state: SessionState,
    close_reason: Option<CloseReason>,
    violation_limit: u32,
    violations: u32,
}

impl SessionLifecycle {
    /// `violation_limit` of 0 tolerates any number of dropped messages.
    pub fn new(violation_limit: u32) -> Self {
        Self {
            state: SessionState::Connecting,
            close_reason: None,
            violation_limit,
            violations: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    pub fn violations(&self) -> u32 {
        self.violations
    }

    /// Apply an event and return the resulting state.
    pub fn process_event(&mut self, event: SessionEvent) -> SessionState {
        let next = next_state(self.state, event);
        if next == self.state {
            debug!(state = ?self.state, event = ?event, "Ignored session event");
            return next;
        }
        if let SessionEvent::Terminate(reason) = event {
            self.close_reason.get_or_insert(reason);
        }
        self.state = next;
        next
    }

    /// Count a dropped message. Returns `true` when the limit is reached.
    pub fn record_violation(&mut self) -> bool {
        self.violations = self.violations.saturating_add(1);
        self.violation_limit > 0 && self.violations >= self.violation_limit
    }
}

/// Pure transition function.
pub fn next_state(state: SessionState, event: SessionEvent) -> SessionState {
    use SessionEvent::*;
    use SessionState::*;

    match (state, event) {
        (Connecting, ConnectReceived) => Authenticating,
        (Authenticating, Authenticated) => Active,

        // Nothing registered yet, nothing to tear down.
        (Connecting | Authenticating, Terminate(_)) => Closed,

        (Active, Terminate(_)) => Closing,
        (Closing, TeardownComplete) => Closed,

        (state, _) => state,
    }
}
