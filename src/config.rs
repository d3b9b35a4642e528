//! Relay configuration

use std::time::Duration;

/// Tunables for the streaming core
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Capacity of each subscriber's outbound channel
    ///
    /// Sized to absorb bursts; a full channel drops messages for that
    /// subscriber only.
    pub channel_capacity: usize,

    /// Interval between keep-alives on an otherwise quiet stream
    pub keep_alive_interval: Duration,

    /// Maximum message ids retained per room (oldest evicted first)
    pub history_limit: usize,

    /// Maximum history entries returned by a join
    pub recent_limit: usize,

    /// Hard upper bound on a single stream session
    ///
    /// Safety net against leaked sessions; cancellation derived from the
    /// client connection is the primary lifecycle signal.
    pub max_stream_duration: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 200,
            keep_alive_interval: Duration::from_secs(10),
            history_limit: 1000,
            recent_limit: 50,
            max_stream_duration: Duration::from_secs(60 * 60),
        }
    }
}

impl RelayConfig {
    /// Set the per-subscriber channel capacity
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Set the keep-alive interval
    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Set the per-room history bound
    pub fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    /// Set how many history entries a join returns
    pub fn recent_limit(mut self, limit: usize) -> Self {
        self.recent_limit = limit;
        self
    }

    /// Set the stream session safety-net bound
    pub fn max_stream_duration(mut self, bound: Duration) -> Self {
        self.max_stream_duration = bound;
        self
    }
}
