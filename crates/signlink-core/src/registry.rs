//! Concurrent connections keyed by device address.
//!
//! The [`ConnectionRegistry`] holds at most one [`Connection`] per address.
//! For every registered connection it runs a small monitor task that
//! republishes state and status changes as [`ConnectionEvent`]s, tracks
//! accident reports and keeps the [`AlertSummary`] current. One device
//! failing never touches another device's entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use signlink_types::{ConnectionState, DeviceDescriptor};

use crate::alert::{AlertSummary, is_accident_message};
use crate::commands::is_reset_accident;
use crate::config::{ConnectionConfig, RegistryConfig};
use crate::error::{Error, Result};
use crate::events::{ConnectionEvent, EventDispatcher};
use crate::gatt::{GattConnection, GattConnector};
use crate::observable::Observable;
use crate::serial::{SerialConnection, SerialConnector};
use crate::traits::Connection;
use crate::util::lock;

/// Creates connections for the registry.
pub trait ConnectionFactory: Send + Sync {
    /// Create a disconnected connection for `device`.
    fn create(
        &self,
        device: &DeviceDescriptor,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn Connection>>;
}

/// Picks GATT or serial from the device's [`TransportKind`].
///
/// Classic and dual-mode devices go over the serial port profile; BLE-only
/// devices go over GATT.
///
/// [`TransportKind`]: signlink_types::TransportKind
pub struct TransportFactory {
    gatt: Arc<dyn GattConnector>,
    serial: Option<Arc<dyn SerialConnector>>,
}

impl TransportFactory {
    /// Factory with both transports.
    pub fn new(gatt: Arc<dyn GattConnector>, serial: Arc<dyn SerialConnector>) -> Self {
        Self {
            gatt,
            serial: Some(serial),
        }
    }

    /// Factory for builds without classic Bluetooth support.
    pub fn ble_only(gatt: Arc<dyn GattConnector>) -> Self {
        Self { gatt, serial: None }
    }
}

impl ConnectionFactory for TransportFactory {
    fn create(
        &self,
        device: &DeviceDescriptor,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn Connection>> {
        if device.transport.uses_serial() {
            let serial = self.serial.as_ref().ok_or_else(|| {
                Error::Unsupported(format!(
                    "classic Bluetooth is not available for {}",
                    device.address
                ))
            })?;
            Ok(Arc::new(SerialConnection::new(
                device.clone(),
                Arc::clone(serial),
                config.clone(),
            )))
        } else {
            Ok(Arc::new(GattConnection::new(
                device.clone(),
                Arc::clone(&self.gatt),
                config.clone(),
            )))
        }
    }
}

struct Entry {
    id: u64,
    connection: Arc<dyn Connection>,
    accident: bool,
    monitor: JoinHandle<()>,
}

struct RegistryInner {
    factory: Arc<dyn ConnectionFactory>,
    config: RegistryConfig,
    entries: Mutex<HashMap<String, Entry>>,
    next_id: AtomicU64,
    events: EventDispatcher,
    alerts: Observable<AlertSummary>,
}

/// Registry of live connections, at most one per address.
///
/// Cloning the registry is cheap; clones share the same connections.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("addresses", &self.addresses())
            .field("alerts", &self.inner.alerts.get())
            .finish()
    }
}

impl ConnectionRegistry {
    /// Create a registry with default configuration.
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self::with_config(factory, RegistryConfig::default())
    }

    /// Create a registry with custom configuration.
    pub fn with_config(factory: Arc<dyn ConnectionFactory>, config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                factory,
                events: EventDispatcher::new(config.event_capacity.max(1)),
                config,
                entries: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                alerts: Observable::new(AlertSummary::default()),
            }),
        }
    }

    /// Get the event dispatcher for subscribing to events.
    pub fn events(&self) -> &EventDispatcher {
        &self.inner.events
    }

    /// Get the registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Get or create the connection for `device` and start it.
    ///
    /// If the address is already registered the existing connection is
    /// returned untouched; use [`ConnectionRegistry::reconnect`] to retry it.
    /// Lookup, creation and start happen under the registry lock, so
    /// concurrent calls for one address always yield the same instance.
    ///
    /// Must be called from within a Tokio runtime.
    #[tracing::instrument(level = "info", skip_all, fields(address = %device.address))]
    pub fn connect(&self, device: &DeviceDescriptor) -> Result<Arc<dyn Connection>> {
        let runtime = Handle::try_current().map_err(|_| {
            Error::Unsupported("ConnectionRegistry::connect requires a Tokio runtime".to_string())
        })?;

        let connection = {
            let mut entries = lock(&self.inner.entries);
            if let Some(entry) = entries.get(&device.address) {
                debug!("Connection already registered");
                return Ok(Arc::clone(&entry.connection));
            }

            let connection = self
                .inner
                .factory
                .create(device, &self.inner.config.connection)?;
            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            let monitor = runtime.spawn(monitor(
                Arc::downgrade(&self.inner),
                id,
                device.address.clone(),
                connection.watch_state(),
                connection.subscribe_messages(),
            ));
            entries.insert(
                device.address.clone(),
                Entry {
                    id,
                    connection: Arc::clone(&connection),
                    accident: false,
                    monitor,
                },
            );
            connection.connect();
            connection
        };

        info!(transport = %device.transport, "Registered connection");
        self.inner.recompute_alerts();
        Ok(connection)
    }

    /// Get the connection registered for `address`.
    pub fn get(&self, address: &str) -> Option<Arc<dyn Connection>> {
        lock(&self.inner.entries)
            .get(address)
            .map(|entry| Arc::clone(&entry.connection))
    }

    /// Whether `address` is registered.
    pub fn contains(&self, address: &str) -> bool {
        lock(&self.inner.entries).contains_key(address)
    }

    /// Retry the connection registered for `address`.
    ///
    /// Returns `false` if nothing is registered under that address.
    #[tracing::instrument(level = "info", skip(self))]
    pub fn reconnect(&self, address: &str) -> bool {
        match self.get(address) {
            Some(connection) => {
                connection.connect();
                true
            }
            None => {
                warn!("No connection registered");
                false
            }
        }
    }

    /// Send a command to the device registered for `address`.
    ///
    /// A successfully sent `RESET_ACCIDENT` clears the device's accident mark.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn send_command(&self, address: &str, command: &str) -> bool {
        let Some(connection) = self.get(address) else {
            warn!("No connection registered");
            return false;
        };
        let sent = connection.send_command(command).await;
        if sent && is_reset_accident(command) {
            self.clear_accident(address);
        }
        sent
    }

    /// Disconnect the device and remove it from the registry.
    ///
    /// Returns `false` if nothing was registered under that address.
    #[tracing::instrument(level = "info", skip(self))]
    pub fn disconnect(&self, address: &str) -> bool {
        let Some(entry) = lock(&self.inner.entries).remove(address) else {
            return false;
        };
        entry.monitor.abort();
        entry.connection.disconnect();
        self.inner.events.send(ConnectionEvent::Removed {
            address: address.to_string(),
        });
        info!("Connection removed");
        self.inner.recompute_alerts();
        true
    }

    /// Close and remove every connection.
    #[tracing::instrument(level = "info", skip_all)]
    pub fn close_all(&self) {
        let drained: Vec<(String, Entry)> = lock(&self.inner.entries).drain().collect();
        for (address, entry) in drained {
            entry.monitor.abort();
            entry.connection.close();
            self.inner.events.send(ConnectionEvent::Removed { address });
        }
        self.inner.recompute_alerts();
        info!("All connections closed");
    }

    /// Registered addresses, sorted.
    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = lock(&self.inner.entries).keys().cloned().collect();
        addresses.sort();
        addresses
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        lock(&self.inner.entries).len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        lock(&self.inner.entries).is_empty()
    }

    /// Addresses with an uncleared accident report, sorted.
    pub fn accident_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = lock(&self.inner.entries)
            .iter()
            .filter(|(_, entry)| entry.accident)
            .map(|(address, _)| address.clone())
            .collect();
        addresses.sort();
        addresses
    }

    /// Clear the accident mark for `address`.
    ///
    /// Returns `true` if a mark was cleared.
    pub fn clear_accident(&self, address: &str) -> bool {
        let cleared = match lock(&self.inner.entries).get_mut(address) {
            Some(entry) if entry.accident => {
                entry.accident = false;
                true
            }
            _ => false,
        };
        if cleared {
            info!(address = %address, "Accident cleared");
            self.inner.events.send(ConnectionEvent::AccidentCleared {
                address: address.to_string(),
            });
            self.inner.recompute_alerts();
        }
        cleared
    }

    /// Clear every accident mark.
    pub fn clear_all_accidents(&self) {
        for address in self.accident_addresses() {
            self.clear_accident(&address);
        }
    }

    /// Current alert summary.
    pub fn alert_summary(&self) -> AlertSummary {
        self.inner.alerts.get()
    }

    /// Subscribe to alert summary changes.
    pub fn watch_alerts(&self) -> watch::Receiver<AlertSummary> {
        self.inner.alerts.subscribe()
    }
}

impl RegistryInner {
    fn recompute_alerts(&self) {
        let summary = {
            let entries = lock(&self.entries);
            AlertSummary {
                active_connections: entries
                    .values()
                    .filter(|entry| entry.connection.state().is_connected())
                    .count(),
                accident_detected: entries.values().any(|entry| entry.accident),
            }
        };
        self.alerts.set_if_changed(summary);
    }

    fn on_state(&self, id: u64, address: &str, state: ConnectionState) {
        if !self.is_current(id, address) {
            return;
        }
        debug!(address = %address, state = %state, "State changed");
        self.events.send(ConnectionEvent::StateChanged {
            address: address.to_string(),
            state,
        });
        self.recompute_alerts();
    }

    fn on_status(&self, id: u64, address: &str, message: String) {
        let accident = is_accident_message(&message);
        {
            let mut entries = lock(&self.entries);
            match entries.get_mut(address) {
                Some(entry) if entry.id == id => {
                    if accident {
                        entry.accident = true;
                    }
                }
                _ => return,
            }
        }

        self.events.send(ConnectionEvent::StatusMessage {
            address: address.to_string(),
            message: message.clone(),
        });
        if accident {
            warn!(address = %address, "Accident reported: {}", message);
            self.events.send(ConnectionEvent::AccidentDetected {
                address: address.to_string(),
                message,
            });
        }
        self.recompute_alerts();
    }

    fn is_current(&self, id: u64, address: &str) -> bool {
        lock(&self.entries)
            .get(address)
            .is_some_and(|entry| entry.id == id)
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        let entries = self
            .entries
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for entry in entries.values() {
            entry.monitor.abort();
        }
    }
}

/// Republishes one connection's state and status until it is unregistered.
///
/// Status messages come from the connection's message stream, so a burst of
/// lines is handled line by line. The subscription is taken before the
/// connection starts, so no message of the first attempt is missed.
async fn monitor(
    registry: Weak<RegistryInner>,
    id: u64,
    address: String,
    mut state_rx: watch::Receiver<ConnectionState>,
    mut messages: broadcast::Receiver<String>,
) {
    let initial = *state_rx.borrow_and_update();
    if let Some(inner) = registry.upgrade() {
        inner.on_state(id, &address, initial);
    }

    loop {
        tokio::select! {
            changed = state_rx.changed() => {
                if changed.is_err() {
                    return;
                }
                let state = *state_rx.borrow_and_update();
                let Some(inner) = registry.upgrade() else { return };
                inner.on_state(id, &address, state);
            }
            received = messages.recv() => {
                let message = match received {
                    Ok(message) => message,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(address = %address, skipped, "Status messages dropped");
                        continue;
                    }
                    Err(RecvError::Closed) => return,
                };
                let Some(inner) = registry.upgrade() else { return };
                inner.on_status(id, &address, message);
            }
        }
    }
}
