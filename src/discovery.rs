//! Controller autodiscovery over UDP broadcast.
//!
//! A probe frame is broadcast with the reserved discovery sentinel as its
//! source NAD; every controller on the segment answers with a response
//! frame addressed back to the sentinel. Replies arriving within the
//! collection window are recorded as `(source IP, source NAD)` pairs and
//! deduplicated. An empty result is a valid outcome, not an error.
//!
//! Discovery uses its own short-lived socket and is not subject to the
//! per-endpoint exchange serialization; broadcast is enabled only for the
//! duration of the probe transmission.
//!
//! # Example
//!
//! ```no_run
//! use cybro_plc::discovery::discover;
//!
//! # async fn run() -> cybro_plc::Result<()> {
//! let controllers = discover("255.255.255.255:8442".parse().unwrap()).await?;
//! for c in &controllers {
//!     println!("controller nad {} at {}", c.nad, c.address);
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::command::CMD_STATUS;
use crate::error::Result;
use crate::frame::{self, Direction, DISCOVERY_NAD};
use crate::transport::MAX_PACKET_SIZE;

/// How long replies are collected after the probe is sent.
pub const DISCOVERY_WINDOW: Duration = Duration::from_millis(50);

/// One controller that answered a discovery probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiscoveredController {
    /// IP address the reply came from.
    pub address: IpAddr,
    /// The controller's device NAD.
    pub nad: u32,
}

/// Broadcasts a probe and collects distinct replies for
/// [`DISCOVERY_WINDOW`].
///
/// # Errors
///
/// Returns `CybroError::Transport` if the socket cannot be created or the
/// probe cannot be sent. An empty reply set is `Ok(vec![])`.
pub async fn discover(broadcast: SocketAddr) -> Result<Vec<DiscoveredController>> {
    discover_with_window(broadcast, DISCOVERY_WINDOW).await
}

/// [`discover`] with a caller-chosen collection window.
///
/// # Errors
///
/// See [`discover`].
pub async fn discover_with_window(
    broadcast: SocketAddr,
    window: Duration,
) -> Result<Vec<DiscoveredController>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;

    let probe = frame::encode(Direction::Request, 0, DISCOVERY_NAD, 0, &[CMD_STATUS], None);
    socket.set_broadcast(true)?;
    let sent = socket.send_to(&probe, broadcast).await;
    socket.set_broadcast(false)?;
    sent?;

    let deadline = Instant::now() + window;
    let mut seen = HashSet::new();
    let mut controllers = Vec::new();
    let mut buf = vec![0u8; MAX_PACKET_SIZE];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let received = match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok(received)) => received,
            Ok(Err(err)) => {
                debug!("discovery receive failed: {err}");
                continue;
            }
            Err(_) => break,
        };

        let (len, peer) = received;
        match frame::decode(&buf[..len]) {
            Ok(reply) if reply.direction == Direction::Response && reply.nad_to == DISCOVERY_NAD => {
                if seen.insert((peer.ip(), reply.nad_from)) {
                    controllers.push(DiscoveredController {
                        address: peer.ip(),
                        nad: reply.nad_from,
                    });
                }
            }
            Ok(_) => trace!(%peer, "ignoring unrelated datagram during discovery"),
            Err(err) => debug!(%peer, "discarding datagram: {err}"),
        }
    }

    Ok(controllers)
}
