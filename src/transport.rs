//! UDP transport and request/response correlation.
//!
//! [`UdpExchange`] owns one UDP socket connected to a controller endpoint
//! plus the reader task draining it. It is responsible for:
//!
//! - **Correlation**: every outgoing request is tagged with an ephemeral
//!   NAD; a response is matched by its destination NAD against the pending
//!   table. Ephemeral NADs are allocated monotonically from the reserved
//!   high range and wrap back to the range start on overflow.
//! - **Retry**: on timeout the same frame bytes (same NAD) are
//!   retransmitted until the retry budget is spent, then the exchange
//!   fails with [`CybroError::RequestTimeout`]. A socket send error fails
//!   the exchange immediately without consuming a retry.
//! - **Serialization**: at most one in-flight exchange per endpoint at a
//!   time. Callers queue on an internal mutex and are served in arrival
//!   order; the lock is released on every exit path. This keeps command
//!   ordering deterministic, which matters for run-state commands, and
//!   bounds retry storms.
//!
//! Inbound frames that match no pending request and carry a non-zero
//! socket selector are controller-initiated push traffic; they are handed
//! off to the channel consumed by the event dispatcher and never block the
//! reader.
//!
//! The protocol runs on a LAN and expects sub-millisecond round trips, so
//! the per-attempt timeout defaults to a few milliseconds.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{CybroError, Result};
use crate::frame::{self, Direction, Frame, EPHEMERAL_NAD_MIN, EPHEMERAL_NAD_SPAN};

/// Default Cybro UDP port.
pub const DEFAULT_PORT: u16 = 8442;

/// Default per-attempt response timeout.
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_millis(5);

/// Default number of transmission attempts per exchange.
pub const DEFAULT_RETRY_BUDGET: u32 = 5;

/// Maximum UDP datagram size accepted from a controller.
pub const MAX_PACKET_SIZE: usize = 2048;

type PendingMap = Arc<StdMutex<HashMap<u32, oneshot::Sender<Frame>>>>;

/// Correlated request/response engine for one controller endpoint.
pub struct UdpExchange {
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
    device_nad: u32,
    password: Option<String>,
    pending: PendingMap,
    serial: Mutex<()>,
    nad_counter: AtomicU32,
    exchange_timeout: Duration,
    retry_budget: u32,
    push_rx: StdMutex<Option<mpsc::UnboundedReceiver<Frame>>>,
    reader: JoinHandle<()>,
}

impl UdpExchange {
    /// Binds a local socket, connects it to the controller endpoint and
    /// starts the reader task.
    ///
    /// # Errors
    ///
    /// Returns `CybroError::Transport` if the socket cannot be created or
    /// connected.
    pub async fn connect(
        remote: SocketAddr,
        device_nad: u32,
        password: Option<String>,
        exchange_timeout: Duration,
        retry_budget: u32,
    ) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(remote).await?;
        let socket = Arc::new(socket);

        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(reader_loop(
            Arc::clone(&socket),
            Arc::clone(&pending),
            push_tx,
        ));

        Ok(Self {
            socket,
            remote,
            device_nad,
            password,
            pending,
            serial: Mutex::new(()),
            nad_counter: AtomicU32::new(0),
            exchange_timeout,
            retry_budget,
            push_rx: StdMutex::new(Some(push_rx)),
            reader,
        })
    }

    /// Performs one correlated exchange on the command channel or a named
    /// socket, allocating a fresh ephemeral NAD.
    ///
    /// # Errors
    ///
    /// - `CybroError::Transport` on a socket send failure (immediate).
    /// - `CybroError::RequestTimeout` once the retry budget is exhausted.
    pub async fn request(&self, socket: u8, payload: &[u8]) -> Result<Frame> {
        self.request_with_nad(socket, payload, None).await
    }

    /// Performs one correlated exchange with an explicit source NAD.
    ///
    /// The same NAD is reused for every retry of this exchange; it must
    /// not be shared with any other outstanding exchange.
    ///
    /// # Errors
    ///
    /// See [`UdpExchange::request`].
    pub async fn request_with_nad(
        &self,
        socket: u8,
        payload: &[u8],
        nad: Option<u32>,
    ) -> Result<Frame> {
        // One in-flight exchange per endpoint: held across all retries,
        // released on every exit path when the guard drops.
        let _serial = self.serial.lock().await;

        let nad = nad.unwrap_or_else(|| self.next_nad());
        let bytes = frame::encode(
            Direction::Request,
            socket,
            nad,
            self.device_nad,
            payload,
            self.password.as_deref(),
        );

        for attempt in 1..=self.retry_budget {
            let (tx, rx) = oneshot::channel();
            self.pending.lock().unwrap().insert(nad, tx);

            if let Err(err) = self.socket.send(&bytes).await {
                self.pending.lock().unwrap().remove(&nad);
                return Err(CybroError::Transport(err));
            }

            match tokio::time::timeout(self.exchange_timeout, rx).await {
                Ok(Ok(frame)) => return Ok(frame),
                Ok(Err(_)) | Err(_) => {
                    self.pending.lock().unwrap().remove(&nad);
                    trace!(nad, attempt, "no response within timeout");
                }
            }
        }

        debug!(
            nad,
            attempts = self.retry_budget,
            "retry budget exhausted"
        );
        Err(CybroError::RequestTimeout)
    }

    /// Takes the receiver for controller-initiated push frames. Yields
    /// `Some` exactly once; the event dispatcher owns it afterwards.
    pub fn take_push_receiver(&self) -> Option<mpsc::UnboundedReceiver<Frame>> {
        self.push_rx.lock().unwrap().take()
    }

    /// The controller endpoint this exchange talks to.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// The configured device NAD of the controller.
    pub fn device_nad(&self) -> u32 {
        self.device_nad
    }

    fn next_nad(&self) -> u32 {
        let n = self.nad_counter.fetch_add(1, Ordering::Relaxed);
        EPHEMERAL_NAD_MIN + n % EPHEMERAL_NAD_SPAN
    }
}

impl Drop for UdpExchange {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl std::fmt::Debug for UdpExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpExchange")
            .field("remote", &self.remote)
            .field("device_nad", &self.device_nad)
            .field("local_addr", &self.socket.local_addr().ok())
            .finish()
    }
}

/// Drains the socket: resolves pending exchanges, forwards push traffic,
/// drops everything else. Must never block on user code.
async fn reader_loop(
    socket: Arc<UdpSocket>,
    pending: PendingMap,
    push_tx: mpsc::UnboundedSender<Frame>,
) {
    let mut buf = vec![0u8; MAX_PACKET_SIZE];
    loop {
        let len = match socket.recv(&mut buf).await {
            Ok(len) => len,
            Err(err) => {
                warn!("socket receive failed: {err}");
                continue;
            }
        };

        match frame::decode(&buf[..len]) {
            Ok(frame) => {
                if frame.direction == Direction::Response {
                    let waiter = pending.lock().unwrap().remove(&frame.nad_to);
                    if let Some(tx) = waiter {
                        // Receiver may have timed out concurrently.
                        let _ = tx.send(frame);
                        continue;
                    }
                }
                if frame.socket != 0 {
                    let _ = push_tx.send(frame);
                } else {
                    trace!(
                        nad_to = frame.nad_to,
                        "dropping frame with no pending request"
                    );
                }
            }
            Err(err) => debug!("discarding datagram: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    async fn connect_exchange(
        remote: SocketAddr,
        timeout: Duration,
        retries: u32,
    ) -> UdpExchange {
        UdpExchange::connect(remote, 1000, None, timeout, retries)
            .await
            .unwrap()
    }

    /// Controller double that answers every request with the given payload.
    async fn spawn_echo_controller(reply_payload: Vec<u8>) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_PACKET_SIZE];
            loop {
                let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
                let request = frame::decode(&buf[..len]).unwrap();
                let reply = frame::encode(
                    Direction::Response,
                    0,
                    1000,
                    request.nad_from,
                    &reply_payload,
                    None,
                );
                socket.send_to(&reply, peer).await.unwrap();
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_request_resolves_matching_response() {
        let addr = spawn_echo_controller(vec![0x01, 0x02]).await;
        let exchange = connect_exchange(addr, Duration::from_millis(200), 3).await;

        let frame = exchange.request(0, &[0x11]).await.unwrap();
        assert_eq!(frame.payload, vec![0x01, 0x02]);
        assert_eq!(frame.nad_from, 1000);
        assert!(frame.nad_to >= EPHEMERAL_NAD_MIN);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_transmits_same_nad() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let seen: Arc<StdMutex<Vec<u32>>> = Arc::new(StdMutex::new(Vec::new()));
        let seen_writer = Arc::clone(&seen);
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_PACKET_SIZE];
            loop {
                let (len, _) = socket.recv_from(&mut buf).await.unwrap();
                let request = frame::decode(&buf[..len]).unwrap();
                seen_writer.lock().unwrap().push(request.nad_from);
                // Never reply.
            }
        });

        let exchange = connect_exchange(addr, Duration::from_millis(20), 5).await;
        let result = exchange.request(0, &[0x10]).await;
        assert!(matches!(result, Err(CybroError::RequestTimeout)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 5, "expected exactly 5 transmissions");
        assert!(seen.iter().all(|nad| *nad == seen[0]));
        assert!(seen[0] >= EPHEMERAL_NAD_MIN && seen[0] < EPHEMERAL_NAD_MIN + EPHEMERAL_NAD_SPAN);
    }

    #[tokio::test]
    async fn test_concurrent_exchanges_do_not_interleave() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let log: Arc<StdMutex<Vec<(u8, Instant)>>> = Arc::new(StdMutex::new(Vec::new()));
        let replied: Arc<StdMutex<Vec<Instant>>> = Arc::new(StdMutex::new(Vec::new()));
        let log_writer = Arc::clone(&log);
        let replied_writer = Arc::clone(&replied);
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_PACKET_SIZE];
            loop {
                let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
                let request = frame::decode(&buf[..len]).unwrap();
                log_writer
                    .lock()
                    .unwrap()
                    .push((request.payload[0], Instant::now()));
                // Hold the first exchange open long enough for the second
                // caller to be waiting on the serialization lock.
                tokio::time::sleep(Duration::from_millis(30)).await;
                let reply =
                    frame::encode(Direction::Response, 0, 1000, request.nad_from, &[], None);
                socket.send_to(&reply, peer).await.unwrap();
                replied_writer.lock().unwrap().push(Instant::now());
            }
        });

        let exchange = connect_exchange(addr, Duration::from_millis(500), 1).await;
        let (a, b) = tokio::join!(exchange.request(0, &[0xA1]), exchange.request(0, &[0xA2]));
        a.unwrap();
        b.unwrap();

        let log = log.lock().unwrap();
        let replied = replied.lock().unwrap();
        assert_eq!(log.len(), 2);
        // The second request may only hit the wire after the first reply
        // was sent.
        assert!(log[1].1 >= replied[0]);
    }

    #[tokio::test]
    async fn test_unsolicited_frames_reach_push_channel() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_PACKET_SIZE];
            let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
            let request = frame::decode(&buf[..len]).unwrap();
            let reply = frame::encode(Direction::Response, 0, 1000, request.nad_from, &[], None);
            socket.send_to(&reply, peer).await.unwrap();
            // Controller-initiated push on socket 5.
            let push = frame::encode(Direction::Request, 5, 1000, 0, &[0x2A], None);
            socket.send_to(&push, peer).await.unwrap();
        });

        let exchange = connect_exchange(addr, Duration::from_millis(200), 3).await;
        let mut push_rx = exchange.take_push_receiver().unwrap();
        assert!(exchange.take_push_receiver().is_none());

        exchange.request(0, &[0x10]).await.unwrap();
        let pushed = tokio::time::timeout(Duration::from_millis(500), push_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pushed.socket, 5);
        assert_eq!(pushed.payload, vec![0x2A]);
    }

    #[tokio::test]
    async fn test_malformed_datagrams_are_discarded() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_PACKET_SIZE];
            let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
            let request = frame::decode(&buf[..len]).unwrap();
            // Garbage first, then the real response.
            socket.send_to(&[0xDE, 0xAD, 0xBE, 0xEF], peer).await.unwrap();
            let reply =
                frame::encode(Direction::Response, 0, 1000, request.nad_from, &[0x07], None);
            socket.send_to(&reply, peer).await.unwrap();
        });

        let exchange = connect_exchange(addr, Duration::from_millis(200), 3).await;
        let frame = exchange.request(0, &[0x11]).await.unwrap();
        assert_eq!(frame.payload, vec![0x07]);
    }

    #[tokio::test]
    async fn test_nad_allocation_is_monotonic_and_wraps() {
        let remote = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let exchange = connect_exchange(
            remote.local_addr().unwrap(),
            Duration::from_millis(10),
            1,
        )
        .await;

        let first = exchange.next_nad();
        let second = exchange.next_nad();
        assert_eq!(second, first + 1);

        exchange
            .nad_counter
            .store(EPHEMERAL_NAD_SPAN - 1, Ordering::Relaxed);
        assert_eq!(exchange.next_nad(), EPHEMERAL_NAD_MIN + EPHEMERAL_NAD_SPAN - 1);
        assert_eq!(exchange.next_nad(), EPHEMERAL_NAD_MIN);
    }
}
