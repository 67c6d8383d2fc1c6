//! # Cybro PLC Protocol Library
//!
//! A Rust client for the Cybro industrial-controller (PLC) UDP protocol:
//! discover controllers on a LAN, exchange framed binary commands,
//! read/write typed process variables, receive controller-initiated event
//! data ("sockets"), and pull the onboard configuration bundle out of code
//! memory.
//!
//! ## Features
//!
//! - **Exact wire fidelity** — fixed frame layout with the protocol's
//!   weighted 16-bit checksum, verified before any field is interpreted
//! - **Correlated exchanges** — ephemeral transaction NADs match responses
//!   to requests over the connectionless transport, with per-exchange
//!   timeouts and a bounded retry budget
//! - **Deterministic ordering** — exchanges are fully serialized per
//!   endpoint, so run-state commands can never interleave
//! - **Typed variables** — bit/int/long/real marshaling against an
//!   externally loaded registry
//! - **Push channels** — controller-initiated frames are demultiplexed
//!   into debounced, named change notifications
//! - **No panics** — all fallible operations return [`Result`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use cybro_plc::{Controller, ControllerConfig, Value};
//! use std::net::Ipv4Addr;
//!
//! #[tokio::main]
//! async fn main() -> cybro_plc::Result<()> {
//!     let config = ControllerConfig::new(Ipv4Addr::new(192, 168, 1, 100), 1000);
//!     let controller = Controller::connect(config).await?;
//!
//!     // Bootstrap the variable registry from the controller itself:
//!     // pull the raw archives, inflate them externally, then install.
//!     let archives = controller.read_configuration().await?;
//!     # let _ = archives;
//!     # let (registry, info) = (cybro_plc::Registry::new(), cybro_plc::config::ProgramInfo::default());
//!     controller.install_configuration(registry, info.routes);
//!     controller.refresh().await?;
//!
//!     // Typed access by name.
//!     let vars = controller.read(&["pump_on", "level"]).await?;
//!     for var in &vars {
//!         println!("{} = {:?}", var.name, var.value);
//!     }
//!     controller.write(&[("pump_on", Value::Bit(1))]).await?;
//!
//!     // Push traffic arrives as debounced change notifications.
//!     let mut changes = controller.subscribe();
//!     while let Ok(change) = changes.recv().await {
//!         println!("{} -> {}", change.name, change.value);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Wire Frame
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 2 | signature `AA 55` |
//! | 2 | 2 | length = payload + 4 |
//! | 4 | 4 | source NAD |
//! | 8 | 4 | destination NAD |
//! | 12 | 1 | direction |
//! | 13 | 1 | socket selector |
//! | 14 | n | payload |
//! | 14 + n | 2 | password field |
//! | 16 + n | 2 | checksum |
//!
//! All multi-byte integers are little-endian. See [`frame`] for details
//! and [`checksum`] for the integrity/obfuscation function.
//!
//! ## Discovery
//!
//! ```no_run
//! # async fn run() -> cybro_plc::Result<()> {
//! let controllers = cybro_plc::discovery::discover(
//!     "255.255.255.255:8442".parse().unwrap(),
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Design Notes
//!
//! The driver trades wire-level concurrency for deterministic ordering:
//! one exchange is in flight per endpoint at any time, and retries reuse
//! the exchange's ephemeral NAD. The password field is an obfuscation
//! checksum, not a credential exchange — strengthening it would break the
//! wire format expected by deployed controllers.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod checksum;
mod client;
pub mod command;
pub mod config;
mod dispatch;
pub mod discovery;
mod error;
pub mod frame;
mod transport;
mod variable;

// Public re-exports
pub use client::{Controller, ControllerConfig, PlcState};
pub use config::{ArchiveFile, CodeMemory, ConfigArchive, ProgramInfo};
pub use dispatch::VariableChange;
pub use discovery::{DiscoveredController, DISCOVERY_WINDOW};
pub use error::{CybroError, Result};
pub use frame::{Direction, Frame, DISCOVERY_NAD, EPHEMERAL_NAD_MIN, EPHEMERAL_NAD_SPAN};
pub use transport::{
    UdpExchange, DEFAULT_EXCHANGE_TIMEOUT, DEFAULT_PORT, DEFAULT_RETRY_BUDGET, MAX_PACKET_SIZE,
};
pub use variable::{Registry, RouteTable, SocketRoute, Value, VarType, Variable};
