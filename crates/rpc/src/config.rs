//! Protocol configuration.

use std::time::Duration;

use crate::identifier::Side;

/// Configuration for one [`RpcProtocol`](crate::RpcProtocol).
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// The side this protocol runs on.
    pub side: Side,
    /// How long a call waits for its reply. `None` waits until the channel closes.
    pub request_timeout: Option<Duration>,
    /// Maximum number of calls awaiting a reply at once.
    pub max_in_flight: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            side: Side::Main,
            request_timeout: None,
            max_in_flight: 10_000,
        }
    }
}

impl RpcConfig {
    /// Configuration for the main (UI) side.
    #[must_use]
    pub fn main() -> Self {
        Self::default()
    }

    /// Configuration for the extension host side.
    #[must_use]
    pub fn ext() -> Self {
        Self::default().with_side(Side::Ext)
    }

    /// Set the local side.
    #[must_use]
    pub const fn with_side(mut self, side: Side) -> Self {
        self.side = side;
        self
    }

    /// Set the reply timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the maximum number of in-flight calls.
    #[must_use]
    pub const fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max;
        self
    }
}
