//! Relay tuning knobs.

use std::time::Duration;

use crate::dispatcher::DEFAULT_ACK_TIMEOUT;

/// Configuration for the relay core.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// How long a peer has to acknowledge a pushed event
    pub ack_timeout: Duration,
    /// Frames buffered towards one connection before senders wait
    pub outbound_buffer: usize,
    /// Requests queued per connection while an earlier one is still routing
    pub request_queue_depth: usize,
}

impl RelayConfig {
    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            outbound_buffer: 256,
            request_queue_depth: 64,
        }
    }
}
