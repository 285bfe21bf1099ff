use std::fmt;
use std::time::Duration;

/// Lifecycle state of the persistent connection.
///
/// Exactly one state is active at a time and it is owned exclusively by the
/// connection manager's task; subscribers only observe states through the
/// published stream.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ConnectionState {
    /// Set before the manager is started and after it is built from `Closed`.
    Disconnected,

    /// Set while a connect attempt is in flight.
    Connecting,

    /// Set when the transport handshake completed and the link is usable.
    Connected,

    /// Set after a failed connect attempt or a dropped link, while waiting out
    /// the backoff delay before the next attempt.
    Reconnecting {
        /// Consecutive failed attempts in the current reconnect cycle, 1-indexed.
        attempt: u32,
        /// The delay the manager will wait before the next connect attempt.
        next_delay: Duration,
    },

    /// Terminal. The manager never leaves this state; a new manager must be
    /// built to connect again, which resets the attempt count.
    Closed,
}

impl ConnectionState {
    pub fn as_type(&self) -> ConnectionStateType {
        self.into()
    }

    /// Returns `true` if the link is usable for sending frames.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectionStateType {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

impl ConnectionStateType {
    /// Returns `true` if no further transitions can follow this state.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Disconnected => false,
            Self::Connecting => false,
            Self::Connected => false,
            Self::Reconnecting => false,
            Self::Closed => true,
        }
    }
}

impl<'a> From<&'a ConnectionState> for ConnectionStateType {
    fn from(state: &'a ConnectionState) -> Self {
        match state {
            ConnectionState::Disconnected => Self::Disconnected,
            ConnectionState::Connecting => Self::Connecting,
            ConnectionState::Connected => Self::Connected,
            ConnectionState::Reconnecting { .. } => Self::Reconnecting,
            ConnectionState::Closed => Self::Closed,
        }
    }
}

impl fmt::Display for ConnectionStateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Closed => write!(f, "closed"),
        }
    }
}
