//! Connection lifecycle states.

use std::fmt;

/// Lifecycle state of a [`SecureEndpoint`](super::SecureEndpoint).
///
/// ```text
/// Unestablished → Handshaking → Authenticated → Closed
///                      │
///                      └──────→ HandshakeFailed → Closed
/// any state ─(I/O failure)─→ Error → Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Raw transport present, no TLS yet
    Unestablished,
    /// TLS handshake in progress
    Handshaking,
    /// Both sides verified; application data may flow
    Authenticated,
    /// The peer was rejected or never authenticated
    HandshakeFailed,
    /// Transport released after `close()`
    Closed,
    /// Transport failed
    Error,
}

impl ConnectionState {
    /// Whether moving to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{Authenticated, Closed, Error, HandshakeFailed, Handshaking, Unestablished};

        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Unestablished, Handshaking) => true,
            (Handshaking, Authenticated | HandshakeFailed) => true,
            (Unestablished | Handshaking | Authenticated, Error) => true,
            _ => false,
        }
    }

    /// No further I/O is possible; only `close()` remains meaningful.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::HandshakeFailed | Self::Closed | Self::Error)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unestablished => "unestablished",
            Self::Handshaking => "handshaking",
            Self::Authenticated => "authenticated",
            Self::HandshakeFailed => "handshake failed",
            Self::Closed => "closed",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}
