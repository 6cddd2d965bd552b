//! Stream lifecycle state

use std::time::Instant;

/// Lifecycle of one stream on a worker
///
/// Packets are only accepted while `Running`. A `Draining` stream rejects
/// new packets but still flushes what its stages hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Registered but no pipeline attached yet
    Idle,

    /// Processing packets
    Running {
        /// When the stream started running
        started_at: Instant,
    },

    /// Tearing down; new packets are dropped
    Draining,

    /// Gone; cannot be restarted
    Closed,
}

impl StreamState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &StreamState) -> bool {
        use StreamState::*;

        match (self, target) {
            (Idle, Running { .. }) => true,
            (Idle, Closed) => true,

            (Running { .. }, Draining) => true,

            (Draining, Closed) => true,

            (Closed, _) => false,

            (a, b) if a == b => true,

            _ => false,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            StreamState::Idle => "Idle",
            StreamState::Running { .. } => "Running",
            StreamState::Draining => "Draining",
            StreamState::Closed => "Closed",
        }
    }

    pub fn accepts_packets(&self) -> bool {
        matches!(self, StreamState::Running { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, StreamState::Closed)
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}
