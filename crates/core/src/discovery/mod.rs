//! Camera discovery and the request/reply control channel.
//!
//! The viewer never talks to the camera's control service directly; it goes
//! through a [`Discovery`] implementation that can:
//!
//! - **resolve** a logical camera name (e.g. `"picam"`) to a socket address
//!   within a bounded time, and
//! - **exchange** one JSON value with that address: send a request, block
//!   for the reply.
//!
//! The image stream runs over a separate TCP connection that the camera
//! opens back to us (see [`crate::session`]), so control exchanges never
//! touch the stream socket.
//!
//! [`BeaconDiscovery`] is the network implementation. Tests and embedders can
//! supply their own.

pub mod beacon;
pub mod control;

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::Result;
pub use beacon::{BeaconConfig, BeaconDiscovery};

/// Name resolution plus request/reply messaging.
///
/// Implementations must be shareable across threads: the connect thread
/// resolves and announces, while the consumer thread may submit settings
/// updates at the same time.
pub trait Discovery: Send + Sync {
    /// Resolve `name` to the camera's control address.
    ///
    /// Fails with [`DiscoveryTimeout`](crate::CameraError::DiscoveryTimeout)
    /// if nobody answers in time, or [`NotFound`](crate::CameraError::NotFound)
    /// if a responder explicitly does not know the name.
    fn resolve(&self, name: &str, timeout: Duration) -> Result<SocketAddr>;

    /// Send `request` to `address` and wait for the single reply.
    fn exchange(&self, address: SocketAddr, request: &serde_json::Value) -> Result<serde_json::Value>;
}
