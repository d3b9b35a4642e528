//! Stream session lifecycle states
//!
//! `Joining → Streaming → Draining → Closed`. Cleanup runs on the single
//! `Streaming/Joining → Draining` edge, so "close" is a state transition and
//! a second close attempt is a no-op by construction.

/// Lifecycle of one stream session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Verifying membership and registering with the registry
    Joining,
    /// Forwarding messages and keep-alives to the client
    Streaming,
    /// A stop trigger fired; cleanup in progress
    Draining,
    /// Cleanup finished; terminal
    Closed,
}

impl SessionState {
    /// Enter `Streaming` after registration succeeds
    pub fn start_streaming(&mut self) -> bool {
        if *self == SessionState::Joining {
            *self = SessionState::Streaming;
            true
        } else {
            false
        }
    }

    /// Begin teardown; returns whether this call won the transition
    ///
    /// Only the winner runs cleanup. Later triggers (cancellation racing a
    /// channel close, for instance) observe `false` and do nothing.
    pub fn begin_drain(&mut self) -> bool {
        match *self {
            SessionState::Joining | SessionState::Streaming => {
                *self = SessionState::Draining;
                true
            }
            SessionState::Draining | SessionState::Closed => false,
        }
    }

    /// Mark cleanup complete
    pub fn close(&mut self) {
        *self = SessionState::Closed;
    }

    pub fn is_closed(&self) -> bool {
        *self == SessionState::Closed
    }
}
