//! Per-Connection State Machine (component J, §4.2). A pure value type: it
//! holds no socket handle and emits no frames itself — callers inspect the
//! `Transition` it returns and send the listed frames themselves. Keeping
//! the machine frame-free makes its edges independently testable.

use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticating,
    Active,
    Closing,
}

/// Observable side effect of a transition: the exact frames §4.2 says the
/// state machine itself may emit, nothing else.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// `connecting -> authenticating`: socket upgrade complete.
    AwaitingCredentials,
    /// `authenticating -> active`: emit `connection:established` then
    /// `connection:authenticated`.
    Authenticated,
    /// `authenticating -> closing`: emit `connection:error` with kind
    /// `authentication`, then close with 1008.
    AuthenticationFailed { reason: String },
    /// `active -> closing` for any of the listed causes.
    Closed { cause: CloseCause },
    /// No legal edge for this input in the current state.
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCause {
    ClientClose,
    WriteFailure,
    HeartbeatTimeout,
    Shutdown,
    AuthFailure,
}

impl CloseCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseCause::ClientClose => "client-close",
            CloseCause::WriteFailure => "write-failure",
            CloseCause::HeartbeatTimeout => "heartbeat-timeout",
            CloseCause::Shutdown => "shutdown",
            CloseCause::AuthFailure => "auth-failure",
        }
    }
}

/// Drives one connection from `connecting` to `closing`. `closing` is
/// terminal and leads directly to removal by the Cleanup Orchestrator (N).
pub struct ConnectionStateMachine {
    state: ConnectionState,
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self { state: ConnectionState::Connecting }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == ConnectionState::Active
    }

    /// Socket upgrade completed; the connection now expects credentials on
    /// its first inbound frame.
    pub fn on_upgrade_complete(&mut self) -> Transition {
        if self.state != ConnectionState::Connecting {
            return Transition::Rejected;
        }
        self.state = ConnectionState::Authenticating;
        Transition::AwaitingCredentials
    }

    /// The Token Verifier accepted the credential.
    pub fn on_authenticated(&mut self) -> Transition {
        if self.state != ConnectionState::Authenticating {
            return Transition::Rejected;
        }
        self.state = ConnectionState::Active;
        Transition::Authenticated
    }

    /// The Token Verifier rejected the credential, or none was supplied.
    pub fn on_authentication_failed(&mut self, kind: ErrorKind, reason: impl Into<String>) -> Transition {
        if self.state != ConnectionState::Authenticating {
            return Transition::Rejected;
        }
        debug_assert_eq!(kind, ErrorKind::Authentication);
        self.state = ConnectionState::Closing;
        Transition::AuthenticationFailed { reason: reason.into() }
    }

    /// Any cause that ends an active connection.
    pub fn on_close(&mut self, cause: CloseCause) -> Transition {
        if self.state == ConnectionState::Closing {
            return Transition::Rejected;
        }
        self.state = ConnectionState::Closing;
        Transition::Closed { cause }
    }
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
