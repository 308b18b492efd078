//! Protocol configuration shared by every connection of a server.

use std::time::Duration;

/// What a producer does when the per-connection outbound buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Close the connection with `4500 Outbound buffer overflow`.
    #[default]
    Close,
    /// Suspend the producer until the writer drains the buffer.
    ///
    /// Cancellation (`complete` or connection close) still interrupts the
    /// wait.
    Backpressure,
}

/// Configuration for the subprotocol engine.
///
/// # Defaults
/// - Init timeout: 60 s
/// - Keep-alive: disabled
/// - Outbound capacity: 256 frames per connection
/// - Overflow policy: [`OverflowPolicy::Close`]
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Time allowed between transport open and `connection_init`.
    ///
    /// `None` disables the timeout.
    pub init_timeout: Option<Duration>,

    /// Interval of server-initiated `ping` messages once the connection is
    /// acknowledged, and of `ping` events on the SSE endpoint.
    pub keep_alive: Option<Duration>,

    /// Bound of the per-connection outbound frame buffer.
    pub outbound_capacity: usize,

    pub overflow_policy: OverflowPolicy,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            init_timeout: Some(Duration::from_secs(60)),
            keep_alive: None,
            outbound_capacity: 256,
            overflow_policy: OverflowPolicy::Close,
        }
    }
}

impl ProtocolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the init timeout (`None` = wait forever)
    pub fn init_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.init_timeout = timeout;
        self
    }

    /// Sets the keep-alive ping interval (`None` or zero = no pings)
    pub fn keep_alive(mut self, interval: Option<Duration>) -> Self {
        self.keep_alive = crate::timers::keep_alive_period(interval);
        self
    }

    /// Sets the outbound buffer capacity (clamped to at least 1)
    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }

    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }
}
