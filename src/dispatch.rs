//! Unsolicited event dispatch for controller push traffic.
//!
//! Controllers proactively send grouped variable data on numbered push
//! channels ("sockets" in the protocol sense, unrelated to transport
//! sockets). The [`EventDispatcher`] demultiplexes those frames using the
//! externally loaded routing table: each route names the variables carried
//! by one socket in wire order, with byte offsets implied by the running
//! sum of declared sizes.
//!
//! A change notification is emitted **only when the decoded value differs
//! from the registry's stored value**. This is the system's sole debouncing
//! mechanism for push traffic; unconditional re-emission must not occur.
//!
//! Notifications are delivered through a [`tokio::sync::broadcast`]
//! channel. The dispatcher runs on the single push-intake task, so
//! per-variable notification order matches frame arrival order.

use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::frame::Frame;
use crate::variable::{Registry, RouteTable, Value};

/// A named variable-change notification.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableChange {
    /// Name of the variable that changed.
    pub name: String,
    /// The new value.
    pub value: Value,
}

/// Demultiplexes pushed frames into debounced variable-change events.
pub struct EventDispatcher {
    registry: Arc<RwLock<Registry>>,
    routes: Arc<RwLock<RouteTable>>,
    changes: broadcast::Sender<VariableChange>,
}

impl EventDispatcher {
    /// Creates a dispatcher over the shared registry and routing table.
    pub fn new(
        registry: Arc<RwLock<Registry>>,
        routes: Arc<RwLock<RouteTable>>,
        changes: broadcast::Sender<VariableChange>,
    ) -> Self {
        Self {
            registry,
            routes,
            changes,
        }
    }

    /// Processes one pushed frame.
    ///
    /// Frames for sockets with no route are logged and dropped (not
    /// fatal). A routed variable missing from the registry makes the
    /// offsets of everything after it unknowable, so the rest of the
    /// frame is abandoned with a warning.
    pub fn dispatch(&self, frame: &Frame) {
        let routes = self.routes.read().unwrap();
        let route = match routes.get(frame.socket) {
            Some(route) => route,
            None => {
                warn!(socket = frame.socket, "no route for push frame");
                return;
            }
        };

        let mut registry = self.registry.write().unwrap();
        let mut offset = 0usize;
        for name in &route.variables {
            let (var_type, size) = match registry.get(name) {
                Some(var) => (var.var_type, var.size as usize),
                None => {
                    warn!(
                        socket = frame.socket,
                        variable = name.as_str(),
                        "routed variable not in registry; abandoning frame"
                    );
                    return;
                }
            };

            let value = match Value::decode(var_type, &frame.payload[offset.min(frame.payload.len())..]) {
                Ok(value) => value,
                Err(err) => {
                    warn!(
                        socket = frame.socket,
                        variable = name.as_str(),
                        "push payload truncated: {err}"
                    );
                    return;
                }
            };
            offset += size;

            if registry.update_value(name, value) {
                // No receivers is fine; subscription is optional.
                let _ = self.changes.send(VariableChange {
                    name: name.clone(),
                    value,
                });
            } else {
                trace!(variable = name.as_str(), "unchanged value suppressed");
            }
        }
    }
}
