//! High-level controller client.
//!
//! [`Controller`] is the primary interface of the crate. It wires the
//! correlated exchange engine, the variable registry, the socket-routing
//! table and the event dispatcher together and exposes the protocol
//! operations:
//!
//! - [`ping`](Controller::ping), [`status`](Controller::status) and the
//!   run-state commands [`start`](Controller::start),
//!   [`stop`](Controller::stop), [`pause`](Controller::pause)
//! - typed variable access via [`read`](Controller::read) and
//!   [`write`](Controller::write)
//! - segmented code-memory reads via [`read_code`](Controller::read_code)
//!   and the configuration bootstrap built on top of them
//! - push-channel subscriptions via [`subscribe`](Controller::subscribe)
//!
//! # Example
//!
//! ```no_run
//! use cybro_plc::{Controller, ControllerConfig};
//! use std::net::Ipv4Addr;
//!
//! #[tokio::main]
//! async fn main() -> cybro_plc::Result<()> {
//!     let config = ControllerConfig::new(Ipv4Addr::new(192, 168, 1, 100), 1000)
//!         .with_password("plant");
//!     let controller = Controller::connect(config).await?;
//!
//!     if let Some(rtt) = controller.ping().await {
//!         println!("controller alive, rtt {:?}", rtt);
//!     }
//!
//!     let vars = controller.read(&["pump_on", "level"]).await?;
//!     for var in &vars {
//!         println!("{} = {:?}", var.name, var.value);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Thread safety
//!
//! `Controller` is `Send + Sync`; exchanges issued from concurrent tasks
//! are serialized per endpoint by the engine. Registry access is guarded
//! so that readers never observe a torn multi-byte value.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::command::{
    read_code_request, segment_span, VariableSet, CMD_PING, CMD_PLC_PAUSE, CMD_PLC_START,
    CMD_PLC_STOP, CMD_STATUS, SEGMENT_SIZE,
};
use crate::config::{self, CodeMemory, ConfigArchive};
use crate::dispatch::{EventDispatcher, VariableChange};
use crate::error::{CybroError, Result};
use crate::transport::{
    UdpExchange, DEFAULT_EXCHANGE_TIMEOUT, DEFAULT_PORT, DEFAULT_RETRY_BUDGET,
};
use crate::variable::{Registry, RouteTable, Value, Variable};

/// PLC run state as reported by the status command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlcState {
    /// Program stopped (code 0).
    Stopped,
    /// Program paused (code 1).
    Paused,
    /// Program running (code 2).
    Running,
}

impl PlcState {
    /// Maps a status run-state code onto a state, if it names one.
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(PlcState::Stopped),
            1 => Some(PlcState::Paused),
            2 => Some(PlcState::Running),
            _ => None,
        }
    }

    /// The wire code of this state.
    pub fn code(self) -> i16 {
        match self {
            PlcState::Stopped => 0,
            PlcState::Paused => 1,
            PlcState::Running => 2,
        }
    }
}

/// Configuration for connecting to a controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Controller socket address (IP:port).
    pub addr: SocketAddr,
    /// Device NAD of the controller.
    pub nad: u32,
    /// Session password, if the controller expects one.
    pub password: Option<String>,
    /// Per-attempt response timeout.
    pub exchange_timeout: Duration,
    /// Transmission attempts per exchange.
    pub retry_budget: u32,
}

impl ControllerConfig {
    /// Creates a configuration with the default port, timeout and retry
    /// budget.
    ///
    /// # Example
    ///
    /// ```
    /// use cybro_plc::ControllerConfig;
    /// use std::net::Ipv4Addr;
    ///
    /// let config = ControllerConfig::new(Ipv4Addr::new(192, 168, 1, 100), 1000);
    /// assert_eq!(config.addr.port(), 8442);
    /// ```
    pub fn new(ip: Ipv4Addr, nad: u32) -> Self {
        Self {
            addr: SocketAddr::from((ip, DEFAULT_PORT)),
            nad,
            password: None,
            exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT,
            retry_budget: DEFAULT_RETRY_BUDGET,
        }
    }

    /// Sets a custom UDP port (default is 8442).
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr.set_port(port);
        self
    }

    /// Sets the session password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets a custom per-attempt timeout.
    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout;
        self
    }

    /// Sets a custom retry budget.
    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }
}

/// Client for one Cybro controller.
pub struct Controller {
    exchange: UdpExchange,
    registry: Arc<RwLock<Registry>>,
    routes: Arc<RwLock<RouteTable>>,
    plc_state: StdMutex<Option<PlcState>>,
    changes: broadcast::Sender<VariableChange>,
    dispatcher: JoinHandle<()>,
}

impl Controller {
    /// Connects to a controller and starts the push-dispatch task.
    ///
    /// # Errors
    ///
    /// Returns `CybroError::Transport` if the UDP socket cannot be set up.
    pub async fn connect(config: ControllerConfig) -> Result<Self> {
        let exchange = UdpExchange::connect(
            config.addr,
            config.nad,
            config.password,
            config.exchange_timeout,
            config.retry_budget,
        )
        .await?;

        let registry = Arc::new(RwLock::new(Registry::new()));
        let routes = Arc::new(RwLock::new(RouteTable::new()));
        let (changes, _) = broadcast::channel(256);

        let event_dispatcher = EventDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&routes),
            changes.clone(),
        );
        let mut push_rx = exchange
            .take_push_receiver()
            .expect("push receiver taken at construction");
        let dispatcher = tokio::spawn(async move {
            while let Some(frame) = push_rx.recv().await {
                event_dispatcher.dispatch(&frame);
            }
        });

        Ok(Self {
            exchange,
            registry,
            routes,
            plc_state: StdMutex::new(None),
            changes,
            dispatcher,
        })
    }

    /// Measures the round-trip latency of a ping exchange.
    ///
    /// Ping is advisory: any transport or timeout failure yields `None`
    /// instead of an error.
    pub async fn ping(&self) -> Option<Duration> {
        let started = Instant::now();
        match self.exchange.request(0, &[CMD_PING]).await {
            Ok(_) => Some(started.elapsed()),
            Err(err) => {
                debug!("ping failed: {err}");
                None
            }
        }
    }

    /// Queries the controller run state.
    ///
    /// Returns `-1` when the controller reports no status available,
    /// otherwise the run-state code verbatim. The cached [`PlcState`] is
    /// updated when the code maps onto one.
    ///
    /// # Errors
    ///
    /// Propagates exchange failures and rejects a payload too short to
    /// carry the status.
    pub async fn status(&self) -> Result<i16> {
        let reply = self.exchange.request(0, &[CMD_STATUS]).await?;
        let available = *reply
            .payload
            .first()
            .ok_or_else(|| CybroError::invalid_response("empty status payload"))?;

        let code = if available == 0 {
            -1
        } else {
            i16::from(*reply.payload.get(1).ok_or_else(|| {
                CybroError::invalid_response("status payload missing run-state byte")
            })?)
        };

        *self.plc_state.lock().unwrap() = PlcState::from_code(code);
        Ok(code)
    }

    /// Switches the PLC to run mode. Advisory: returns `false` on failure
    /// instead of an error; the authoritative state is always the next
    /// [`status`](Controller::status) call.
    pub async fn start(&self) -> bool {
        self.control(CMD_PLC_START, PlcState::Running).await
    }

    /// Stops the PLC. Advisory, like [`start`](Controller::start).
    pub async fn stop(&self) -> bool {
        self.control(CMD_PLC_STOP, PlcState::Stopped).await
    }

    /// Pauses the PLC. Advisory, like [`start`](Controller::start).
    pub async fn pause(&self) -> bool {
        self.control(CMD_PLC_PAUSE, PlcState::Paused).await
    }

    async fn control(&self, command: u8, state: PlcState) -> bool {
        match self.exchange.request(0, &[command]).await {
            Ok(_) => {
                *self.plc_state.lock().unwrap() = Some(state);
                true
            }
            Err(err) => {
                debug!(command, "control command failed: {err}");
                false
            }
        }
    }

    /// The locally cached run state, as last learned from a status reply
    /// or an acknowledged control command.
    pub fn plc_state(&self) -> Option<PlcState> {
        *self.plc_state.lock().unwrap()
    }

    /// Reads the named variables from the controller.
    ///
    /// Names absent from the registry are silently ignored; the returned
    /// variables are in wire order (ascending declared size, stable) with
    /// their values populated. Registry entries are updated as well.
    ///
    /// # Errors
    ///
    /// Propagates exchange failures and response decode errors.
    pub async fn read(&self, names: &[&str]) -> Result<Vec<Variable>> {
        let mut set = {
            let registry = self.registry.read().unwrap();
            VariableSet::resolve(names, &registry)
        };
        if set.is_empty() {
            return Ok(Vec::new());
        }

        let reply = self.exchange.request(0, &set.read_request()).await?;
        set.decode_values(&reply.payload)?;

        let mut registry = self.registry.write().unwrap();
        for var in set.vars() {
            if let Some(value) = var.value {
                registry.update_value(&var.name, value);
            }
        }
        drop(registry);

        Ok(set.into_vars())
    }

    /// Reads a single variable. Returns `None` if the name is not in the
    /// registry.
    ///
    /// # Errors
    ///
    /// See [`read`](Controller::read).
    pub async fn read_one(&self, name: &str) -> Result<Option<Variable>> {
        Ok(self.read(&[name]).await?.into_iter().next())
    }

    /// Writes the given values to the controller.
    ///
    /// Names absent from the registry are silently ignored. On success the
    /// registry entries are updated with the written values.
    ///
    /// # Errors
    ///
    /// Returns `CybroError::InvalidParameter` on a value/type mismatch and
    /// propagates exchange failures.
    pub async fn write(&self, values: &[(&str, Value)]) -> Result<()> {
        let set = {
            let registry = self.registry.read().unwrap();
            VariableSet::resolve_with_values(values, &registry)?
        };
        if set.is_empty() {
            return Ok(());
        }

        let payload = set.write_request()?;
        self.exchange.request(0, &payload).await?;

        let mut registry = self.registry.write().unwrap();
        for var in set.vars() {
            if let Some(value) = var.value {
                registry.update_value(&var.name, value);
            }
        }
        Ok(())
    }

    /// Reads an arbitrary byte range from code memory.
    ///
    /// Code memory is only addressable in 256-byte segments; the range is
    /// covered by sequential segment reads (each a full correlated
    /// exchange with its own retry policy) and the requested window is
    /// sliced out of the concatenation.
    ///
    /// # Errors
    ///
    /// Propagates exchange failures; rejects ranges beyond the
    /// addressable segment space and responses shorter than a segment.
    pub async fn read_code(&self, address: u32, size: usize) -> Result<Vec<u8>> {
        let (first, blocks) = segment_span(address, size);
        if first + blocks - 1 > u32::from(u16::MAX) {
            return Err(CybroError::invalid_parameter(
                "address",
                "range exceeds addressable code memory",
            ));
        }

        let mut data = Vec::with_capacity(blocks as usize * SEGMENT_SIZE);
        for block in 0..blocks {
            let request = read_code_request((first + block) as u16, SEGMENT_SIZE as u16);
            let reply = self.exchange.request(0, &request).await?;
            data.extend_from_slice(&reply.payload);
        }

        let start = address as usize % SEGMENT_SIZE;
        let end = start + size;
        if end > data.len() {
            return Err(CybroError::invalid_response(
                "code read returned short segments",
            ));
        }
        Ok(data[start..end].to_vec())
    }

    /// Pulls the onboard configuration archives (raw bytes; ZIP inflation
    /// is the caller's business).
    ///
    /// # Errors
    ///
    /// See [`config::read_archives`].
    pub async fn read_configuration(&self) -> Result<Vec<ConfigArchive>> {
        config::read_archives(self).await
    }

    /// Installs an externally parsed variable registry and socket-routing
    /// table, replacing the current ones.
    pub fn install_configuration(&self, registry: Registry, routes: RouteTable) {
        *self.registry.write().unwrap() = registry;
        *self.routes.write().unwrap() = routes;
    }

    /// Reads every registry variable once, seeding the cached values.
    ///
    /// # Errors
    ///
    /// See [`read`](Controller::read).
    pub async fn refresh(&self) -> Result<Vec<Variable>> {
        let names: Vec<String> = self.registry.read().unwrap().names().cloned().collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        self.read(&refs).await
    }

    /// Subscribes to debounced variable-change notifications from
    /// controller push traffic.
    pub fn subscribe(&self) -> broadcast::Receiver<VariableChange> {
        self.changes.subscribe()
    }

    /// Snapshot of a registry entry, including its last known value.
    pub fn variable(&self, name: &str) -> Option<Variable> {
        self.registry.read().unwrap().get(name).cloned()
    }

    /// The controller endpoint this client talks to.
    pub fn remote_addr(&self) -> SocketAddr {
        self.exchange.remote_addr()
    }

    /// The configured device NAD.
    pub fn device_nad(&self) -> u32 {
        self.exchange.device_nad()
    }
}

impl CodeMemory for Controller {
    fn read_range(
        &self,
        address: u32,
        size: usize,
    ) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send {
        self.read_code(address, size)
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("remote", &self.exchange.remote_addr())
            .field("device_nad", &self.exchange.device_nad())
            .field("plc_state", &self.plc_state())
            .finish()
    }
}
