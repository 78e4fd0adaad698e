//! BLE (GATT) connections to traffic signs.
//!
//! ```text
//! Disconnected --connect--> Connecting --link up--> Connected (discovering)
//!     --service + command characteristic found--> Connected (ready)
//! ```
//!
//! Establishment failures end in `Error`. Service resolution problems only
//! update the status message and leave the connection `Connected` but not
//! ready. A native disconnect from any state, including mid-discovery, forces
//! `Disconnected` and releases the peripheral.
//!
//! The native stack sits behind [`GattConnector`] and [`GattPeripheral`];
//! [`crate::ble`] implements them over btleplug and [`crate::mock`] provides
//! in-memory versions for tests.

use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use signlink_types::uuids::{COMMAND_CHARACTERISTIC, SIGN_SERVICE, STATUS_CHARACTERISTIC};
use signlink_types::{ConnectionState, DeviceDescriptor, TransportKind};

use crate::config::ConnectionConfig;
use crate::error::{ConnectionFailureReason, Error, Result};
use crate::observable::{Observable, StatusFeed};
use crate::traits::Connection;
use crate::util::lock;

/// Status published once the command characteristic has been resolved.
pub const STATUS_READY: &str = "Device ready for commands";
/// Status published after the stack accepted a command write.
pub const STATUS_COMMAND_SENT: &str = "Command sent successfully";
/// Status published when a command write was rejected or timed out.
pub const STATUS_WRITE_FAILED: &str = "Write failed";
/// Status published when a command is sent before the connection is ready.
pub const STATUS_NO_CONNECTION: &str = "Error: no connection";
/// Status published when the sign service is absent.
pub const STATUS_SERVICE_MISSING: &str = "Error: sign service not found";
/// Status published when the sign service has no command characteristic.
pub const STATUS_COMMAND_MISSING: &str = "Error: command characteristic not found";
/// Status published when service discovery fails or times out.
pub const STATUS_DISCOVERY_FAILED: &str = "Service discovery failed";

/// A primary service and the characteristics it exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    /// Service UUID.
    pub uuid: Uuid,
    /// UUIDs of the service's characteristics.
    pub characteristics: Vec<Uuid>,
}

/// Event delivered by a connected peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattEvent {
    /// A subscribed characteristic changed.
    Notification {
        /// Characteristic that sent the value.
        characteristic: Uuid,
        /// Raw value.
        value: Vec<u8>,
    },
    /// The link went down.
    Disconnected,
}

/// Stream of peripheral events. Ending the stream counts as a disconnect.
pub type GattEventStream = Pin<Box<dyn Stream<Item = GattEvent> + Send>>;

/// A GATT peripheral handle from the native stack.
#[async_trait]
pub trait GattPeripheral: Send + Sync {
    /// Establish the link.
    async fn connect(&self) -> Result<()>;

    /// Discover primary services and their characteristics.
    async fn discover_services(&self) -> Result<Vec<GattService>>;

    /// Enable notifications on a characteristic.
    async fn subscribe(&self, characteristic: Uuid) -> Result<()>;

    /// Write a value to a characteristic.
    async fn write(&self, characteristic: Uuid, value: &[u8]) -> Result<()>;

    /// Stream of notifications and link-loss events for this peripheral.
    async fn events(&self) -> Result<GattEventStream>;

    /// Tear the link down.
    async fn disconnect(&self) -> Result<()>;
}

/// Resolves a device descriptor to a native peripheral.
#[async_trait]
pub trait GattConnector: Send + Sync {
    /// Look up the peripheral for `device`.
    async fn open(&self, device: &DeviceDescriptor) -> Result<Arc<dyn GattPeripheral>>;
}

/// Per-attempt bookkeeping. Every task spawned for an attempt carries the
/// epoch it was started with and may only publish while it is still current.
struct Session {
    epoch: u64,
    cancel: CancellationToken,
    peripheral: Option<Arc<dyn GattPeripheral>>,
    command_char: Option<Uuid>,
    tasks: Vec<JoinHandle<()>>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            epoch: 0,
            cancel: CancellationToken::new(),
            peripheral: None,
            command_char: None,
            tasks: Vec::new(),
        }
    }
}

impl Session {
    /// End the current attempt: fence its tasks, cancel and abort them and
    /// drop the cached characteristics. Returns the peripheral, if any.
    fn teardown(&mut self) -> Option<Arc<dyn GattPeripheral>> {
        self.epoch += 1;
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.command_char = None;
        self.peripheral.take()
    }
}

struct Shared {
    device: DeviceDescriptor,
    connector: Arc<dyn GattConnector>,
    config: ConnectionConfig,
    state: Observable<ConnectionState>,
    status: StatusFeed,
    session: Mutex<Session>,
    /// At most one write in flight.
    write_lock: tokio::sync::Mutex<()>,
}

/// A connection to one BLE traffic sign.
pub struct GattConnection {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for GattConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GattConnection")
            .field("address", &self.shared.device.address)
            .field("name", &self.shared.device.name)
            .field("state", &self.shared.state.get())
            .finish()
    }
}

impl GattConnection {
    /// Create a disconnected connection for `device`.
    pub fn new(
        device: DeviceDescriptor,
        connector: Arc<dyn GattConnector>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                device,
                connector,
                config,
                state: Observable::new(ConnectionState::Disconnected),
                status: StatusFeed::new(),
                session: Mutex::new(Session::default()),
                write_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// The descriptor this connection was created for.
    pub fn device(&self) -> &DeviceDescriptor {
        &self.shared.device
    }
}

impl Shared {
    fn publish_status(&self, epoch: u64, message: impl Into<String>) {
        let session = lock(&self.session);
        if session.epoch == epoch {
            self.status.publish(message);
        }
    }

    /// End a failed attempt in the `Error` state.
    fn fail_attempt(&self, epoch: u64, message: String) {
        let peripheral = {
            let mut session = lock(&self.session);
            if session.epoch != epoch {
                return;
            }
            let peripheral = session.teardown();
            self.state.set(ConnectionState::Error);
            self.status.publish(message.clone());
            peripheral
        };
        warn!(address = %self.device.address, "GATT connection failed: {}", message);
        if let Some(peripheral) = peripheral {
            spawn_release(peripheral, self.device.address.clone());
        }
    }

    /// The native link went away.
    fn link_lost(&self, epoch: u64) {
        let mut session = lock(&self.session);
        if session.epoch != epoch {
            return;
        }
        // The stack already dropped the link; nothing to disconnect.
        drop(session.teardown());
        self.state.set(ConnectionState::Disconnected);
        info!(address = %self.device.address, "GATT link lost");
    }

    async fn establish(&self, epoch: u64) -> Result<Arc<dyn GattPeripheral>> {
        let peripheral = self.connector.open(&self.device).await?;
        {
            let mut session = lock(&self.session);
            if session.epoch != epoch {
                return Err(Error::Cancelled);
            }
            session.peripheral = Some(Arc::clone(&peripheral));
        }
        peripheral.connect().await?;
        Ok(peripheral)
    }

    async fn run_attempt(self: Arc<Self>, epoch: u64, cancel: CancellationToken) {
        let address = self.device.address.clone();
        debug!(address = %address, "Opening GATT connection");

        let establish = tokio::time::timeout(self.config.connect_timeout, self.establish(epoch));
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return,
            outcome = establish => outcome,
        };
        let peripheral = match outcome {
            Ok(Ok(peripheral)) => peripheral,
            Ok(Err(e)) => {
                self.fail_attempt(epoch, format!("Error: {}", e));
                return;
            }
            Err(_) => {
                debug!(
                    address = %self.device.address,
                    timeout = ?self.config.connect_timeout,
                    "Connect timed out"
                );
                let err = Error::connection_failed(
                    Some(self.device.address.clone()),
                    ConnectionFailureReason::Timeout,
                );
                self.fail_attempt(epoch, format!("Error: {}", err));
                return;
            }
        };

        let events = match peripheral.events().await {
            Ok(events) => events,
            Err(e) => {
                self.fail_attempt(epoch, format!("Error: {}", e));
                return;
            }
        };

        {
            let mut session = lock(&self.session);
            if session.epoch != epoch {
                return;
            }
            let watcher = tokio::spawn(Arc::clone(&self).run_events(epoch, events, cancel.clone()));
            session.tasks.push(watcher);
            self.state.set(ConnectionState::Connected);
        }
        info!(address = %address, "GATT link up, discovering services");

        let discovery =
            tokio::time::timeout(self.config.discovery_timeout, peripheral.discover_services());
        let services = tokio::select! {
            _ = cancel.cancelled() => return,
            services = discovery => services,
        };
        let services = match services {
            Ok(Ok(services)) => services,
            Ok(Err(e)) => {
                warn!(address = %address, error = %e, "Service discovery failed");
                self.publish_status(epoch, STATUS_DISCOVERY_FAILED);
                return;
            }
            Err(_) => {
                warn!(address = %address, "Service discovery timed out");
                self.publish_status(epoch, STATUS_DISCOVERY_FAILED);
                return;
            }
        };

        let Some(service) = services.iter().find(|s| s.uuid == SIGN_SERVICE) else {
            warn!(
                address = %address,
                service_count = services.len(),
                "Sign service not found"
            );
            self.publish_status(epoch, STATUS_SERVICE_MISSING);
            return;
        };
        if !service.characteristics.contains(&COMMAND_CHARACTERISTIC) {
            warn!(address = %address, "Command characteristic not found");
            self.publish_status(epoch, STATUS_COMMAND_MISSING);
            return;
        }

        if service.characteristics.contains(&STATUS_CHARACTERISTIC) {
            let subscribe = peripheral.subscribe(STATUS_CHARACTERISTIC);
            let subscribed = tokio::select! {
                _ = cancel.cancelled() => return,
                subscribed = subscribe => subscribed,
            };
            match subscribed {
                Ok(()) => debug!(address = %address, "Status notifications enabled"),
                Err(e) => {
                    warn!(address = %address, error = %e, "Failed to enable status notifications")
                }
            }
        }

        let mut session = lock(&self.session);
        if session.epoch != epoch {
            return;
        }
        session.command_char = Some(COMMAND_CHARACTERISTIC);
        self.status.publish(STATUS_READY);
        info!(address = %address, "Device ready for commands");
    }

    async fn run_events(
        self: Arc<Self>,
        epoch: u64,
        mut events: GattEventStream,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return,
                event = events.next() => event,
            };
            match event {
                Some(GattEvent::Notification {
                    characteristic,
                    value,
                }) => {
                    let message = String::from_utf8_lossy(&value).into_owned();
                    debug!(
                        address = %self.device.address,
                        characteristic = %characteristic,
                        "Notification: {}",
                        message
                    );
                    self.publish_status(epoch, message);
                }
                Some(GattEvent::Disconnected) | None => {
                    self.link_lost(epoch);
                    return;
                }
            }
        }
    }
}

/// Best-effort peripheral disconnect on the current runtime, if there is one.
fn spawn_release(peripheral: Arc<dyn GattPeripheral>, address: String) {
    if let Ok(handle) = Handle::try_current() {
        handle.spawn(async move {
            if let Err(e) = peripheral.disconnect().await {
                debug!(
                    address = %address,
                    error = %e,
                    "Best-effort disconnect failed (device may already be disconnected)"
                );
            } else {
                debug!(address = %address, "Best-effort disconnect completed");
            }
        });
    }
}

#[async_trait]
impl Connection for GattConnection {
    fn address(&self) -> &str {
        &self.shared.device.address
    }

    fn transport(&self) -> TransportKind {
        self.shared.device.transport
    }

    fn connect(&self) {
        let shared = &self.shared;
        let Ok(runtime) = Handle::try_current() else {
            warn!(address = %shared.device.address, "connect() called outside a Tokio runtime");
            let _session = lock(&shared.session);
            shared.state.set(ConnectionState::Error);
            shared.status.publish("Error: no async runtime");
            return;
        };

        let mut session = lock(&shared.session);
        let current = shared.state.get();
        if !current.can_connect() {
            debug!(address = %shared.device.address, state = %current, "Ignoring connect");
            return;
        }
        session.epoch += 1;
        session.cancel = CancellationToken::new();
        shared.state.set(ConnectionState::Connecting);
        info!(address = %shared.device.address, "Connecting over GATT");

        let attempt = runtime.spawn(Arc::clone(shared).run_attempt(session.epoch, session.cancel.clone()));
        session.tasks.push(attempt);
    }

    async fn send_command(&self, command: &str) -> bool {
        let shared = &self.shared;
        let ready = |session: &Session| match (&session.peripheral, session.command_char) {
            (Some(peripheral), Some(characteristic))
                if shared.state.get() == ConnectionState::Connected =>
            {
                Some((Arc::clone(peripheral), characteristic, session.epoch))
            }
            _ => None,
        };

        let precheck = {
            let session = lock(&shared.session);
            ready(&session)
        };
        if precheck.is_none() {
            warn!(address = %shared.device.address, "Cannot send command: not ready");
            shared.status.publish(STATUS_NO_CONNECTION);
            return false;
        }

        let _write = shared.write_lock.lock().await;
        // The session may have changed while waiting for the previous write.
        let target = {
            let session = lock(&shared.session);
            ready(&session)
        };
        let Some((peripheral, characteristic, epoch)) = target else {
            warn!(address = %shared.device.address, "Cannot send command: connection went away");
            shared.status.publish(STATUS_NO_CONNECTION);
            return false;
        };

        let write = peripheral.write(characteristic, command.as_bytes());
        match tokio::time::timeout(shared.config.write_timeout, write).await {
            Ok(Ok(())) => {
                debug!(address = %shared.device.address, "Command sent: {}", command);
                shared.publish_status(epoch, STATUS_COMMAND_SENT);
                true
            }
            Ok(Err(e)) => {
                warn!(address = %shared.device.address, error = %e, "Command write failed");
                shared.publish_status(epoch, STATUS_WRITE_FAILED);
                false
            }
            Err(_) => {
                warn!(
                    address = %shared.device.address,
                    timeout = ?shared.config.write_timeout,
                    "Command write timed out"
                );
                shared.publish_status(epoch, STATUS_WRITE_FAILED);
                false
            }
        }
    }

    fn disconnect(&self) {
        let shared = &self.shared;
        let mut session = lock(&shared.session);
        match shared.state.get() {
            ConnectionState::Disconnected | ConnectionState::Disconnecting => return,
            ConnectionState::Error => {
                drop(session.teardown());
                shared.state.set(ConnectionState::Disconnected);
                return;
            }
            ConnectionState::Connecting | ConnectionState::Connected => {}
        }

        let peripheral = session.teardown();
        let epoch = session.epoch;
        shared.state.set(ConnectionState::Disconnecting);
        info!(address = %shared.device.address, "Disconnecting");

        let Ok(runtime) = Handle::try_current() else {
            shared.state.set(ConnectionState::Disconnected);
            return;
        };
        drop(session);

        let shared = Arc::clone(shared);
        runtime.spawn(async move {
            if let Some(peripheral) = peripheral {
                if let Err(e) = peripheral.disconnect().await {
                    debug!(address = %shared.device.address, error = %e, "Peripheral disconnect failed");
                }
            }
            let session = lock(&shared.session);
            // close() or a newer attempt may have taken over in the meantime.
            if session.epoch == epoch {
                shared.state.set(ConnectionState::Disconnected);
                info!(address = %shared.device.address, "Disconnected");
            }
        });
    }

    fn close(&self) {
        let shared = &self.shared;
        let peripheral = {
            let mut session = lock(&shared.session);
            let peripheral = session.teardown();
            shared.state.set_if_changed(ConnectionState::Disconnected);
            peripheral
        };
        if let Some(peripheral) = peripheral {
            debug!(address = %shared.device.address, "Closing GATT connection");
            spawn_release(peripheral, shared.device.address.clone());
        }
    }

    fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    fn status_message(&self) -> Option<String> {
        self.shared.status.get()
    }

    fn is_ready(&self) -> bool {
        let session = lock(&self.shared.session);
        session.peripheral.is_some()
            && session.command_char.is_some()
            && self.shared.state.get() == ConnectionState::Connected
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    fn watch_status(&self) -> watch::Receiver<Option<String>> {
        self.shared.status.watch()
    }

    fn subscribe_messages(&self) -> broadcast::Receiver<String> {
        self.shared.status.subscribe()
    }
}

impl Drop for GattConnection {
    fn drop(&mut self) {
        self.close();
    }
}
