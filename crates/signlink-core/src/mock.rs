//! In-memory transports for testing.
//!
//! These mocks stand in for the native Bluetooth stacks so the connection
//! state machines, the scanners and the registry can be exercised without
//! hardware.
//!
//! - [`MockPeripheral`] / [`MockGattConnector`]: a scripted GATT peripheral
//!   with failure injection, latency simulation and notification injection.
//! - [`MockSerialConnector`]: serial sockets backed by [`tokio::io::duplex`];
//!   the test holds the sign's end of the pipe.
//! - [`MockScanBackend`]: a scanner backend fed by hand.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use uuid::Uuid;

use signlink_types::uuids::{COMMAND_CHARACTERISTIC, SIGN_SERVICE, STATUS_CHARACTERISTIC};
use signlink_types::{DeviceDescriptor, TransportKind};

use crate::error::{ConnectionFailureReason, DeviceNotFoundReason, Error, Result};
use crate::gatt::{GattConnector, GattEvent, GattEventStream, GattPeripheral, GattService};
use crate::scan::{DeviceStream, ScanBackend};
use crate::serial::{SerialConnector, SerialStream};
use crate::util::lock;

fn receiver_stream<T: Send + 'static>(
    rx: mpsc::UnboundedReceiver<T>,
) -> futures::stream::BoxStream<'static, T> {
    futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
        .boxed()
}

async fn simulate_latency(ms: &AtomicU64) {
    let ms = ms.load(Ordering::Relaxed);
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

/// A mock BLE traffic sign.
///
/// By default it exposes the sign service with both characteristics and
/// accepts every operation.
///
/// ```
/// use std::sync::Arc;
/// use signlink_core::mock::{MockGattConnector, MockPeripheral};
///
/// let sign = Arc::new(MockPeripheral::new("AA:BB:CC:DD:EE:FF"));
/// let connector = MockGattConnector::new();
/// connector.add(Arc::clone(&sign));
/// assert_eq!(sign.address(), "AA:BB:CC:DD:EE:FF");
/// ```
pub struct MockPeripheral {
    address: String,
    services: Mutex<Vec<GattService>>,
    connected: AtomicBool,
    fail_connect: AtomicBool,
    hang_connect: AtomicBool,
    fail_discovery: AtomicBool,
    fail_writes: AtomicBool,
    connect_latency_ms: AtomicU64,
    discovery_latency_ms: AtomicU64,
    write_latency_ms: AtomicU64,
    connect_calls: AtomicU32,
    disconnect_calls: AtomicU32,
    write_calls: AtomicU32,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    writes: Mutex<Vec<(Uuid, Vec<u8>)>>,
    subscriptions: Mutex<Vec<Uuid>>,
    events: Mutex<Option<mpsc::UnboundedSender<GattEvent>>>,
}

impl std::fmt::Debug for MockPeripheral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPeripheral")
            .field("address", &self.address)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish()
    }
}

impl MockPeripheral {
    /// Create a mock sign exposing the full sign service.
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            services: Mutex::new(vec![Self::sign_service()]),
            connected: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            hang_connect: AtomicBool::new(false),
            fail_discovery: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            connect_latency_ms: AtomicU64::new(0),
            discovery_latency_ms: AtomicU64::new(0),
            write_latency_ms: AtomicU64::new(0),
            connect_calls: AtomicU32::new(0),
            disconnect_calls: AtomicU32::new(0),
            write_calls: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
            writes: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            events: Mutex::new(None),
        }
    }

    /// The sign service with command and status characteristics.
    pub fn sign_service() -> GattService {
        GattService {
            uuid: SIGN_SERVICE,
            characteristics: vec![COMMAND_CHARACTERISTIC, STATUS_CHARACTERISTIC],
        }
    }

    /// Device address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Replace the services reported by discovery.
    pub fn set_services(&self, services: Vec<GattService>) {
        *lock(&self.services) = services;
    }

    /// Make `connect` fail.
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make `connect` never complete.
    pub fn set_hang_connect(&self, hang: bool) {
        self.hang_connect.store(hang, Ordering::SeqCst);
    }

    /// Make service discovery fail.
    pub fn set_fail_discovery(&self, fail: bool) {
        self.fail_discovery.store(fail, Ordering::SeqCst);
    }

    /// Make writes fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Simulated connect latency.
    pub fn set_connect_latency(&self, latency: Duration) {
        self.connect_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Simulated discovery latency.
    pub fn set_discovery_latency(&self, latency: Duration) {
        self.discovery_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Simulated write latency.
    pub fn set_write_latency(&self, latency: Duration) {
        self.write_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Whether the link is up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of `connect` calls.
    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Number of `disconnect` calls.
    pub fn disconnect_calls(&self) -> u32 {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    /// Number of `write` calls, successful or not.
    pub fn write_calls(&self) -> u32 {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// Highest number of writes that were in flight at the same time.
    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Values accepted by successful writes, in order.
    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        lock(&self.writes).clone()
    }

    /// Accepted writes decoded as UTF-8.
    pub fn written_commands(&self) -> Vec<String> {
        lock(&self.writes)
            .iter()
            .map(|(_, value)| String::from_utf8_lossy(value).into_owned())
            .collect()
    }

    /// Characteristics notifications were enabled on.
    pub fn subscriptions(&self) -> Vec<Uuid> {
        lock(&self.subscriptions).clone()
    }

    /// Send a status notification. Returns `false` if nobody is listening.
    pub fn notify(&self, message: &str) -> bool {
        self.emit(GattEvent::Notification {
            characteristic: STATUS_CHARACTERISTIC,
            value: message.as_bytes().to_vec(),
        })
    }

    /// Simulate the sign dropping the link.
    pub fn drop_link(&self) -> bool {
        self.connected.store(false, Ordering::SeqCst);
        self.emit(GattEvent::Disconnected)
    }

    fn emit(&self, event: GattEvent) -> bool {
        lock(&self.events)
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }
}

#[async_trait]
impl GattPeripheral for MockPeripheral {
    async fn connect(&self) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        simulate_latency(&self.connect_latency_ms).await;
        if self.hang_connect.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::connection_failed(
                Some(self.address.clone()),
                ConnectionFailureReason::Rejected,
            ));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn discover_services(&self) -> Result<Vec<GattService>> {
        simulate_latency(&self.discovery_latency_ms).await;
        if self.fail_discovery.load(Ordering::SeqCst) {
            return Err(Error::connection_failed_str(
                Some(self.address.clone()),
                "GATT error 0x85",
            ));
        }
        Ok(lock(&self.services).clone())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<()> {
        lock(&self.subscriptions).push(characteristic);
        Ok(())
    }

    async fn write(&self, characteristic: Uuid, value: &[u8]) -> Result<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        simulate_latency(&self.write_latency_ms).await;
        let result = if self.fail_writes.load(Ordering::SeqCst) {
            Err(Error::write_failed(characteristic.to_string(), "mock write failure"))
        } else {
            lock(&self.writes).push((characteristic, value.to_vec()));
            Ok(())
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn events(&self) -> Result<GattEventStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.events) = Some(tx);
        Ok(receiver_stream(rx))
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        lock(&self.events).take();
        Ok(())
    }
}

/// Resolves addresses to registered [`MockPeripheral`]s.
#[derive(Default)]
pub struct MockGattConnector {
    peripherals: Mutex<HashMap<String, Arc<MockPeripheral>>>,
    open_calls: AtomicU32,
}

impl MockGattConnector {
    /// Create an empty connector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peripheral under its address.
    pub fn add(&self, peripheral: Arc<MockPeripheral>) {
        lock(&self.peripherals).insert(peripheral.address().to_string(), peripheral);
    }

    /// Number of `open` calls.
    pub fn open_calls(&self) -> u32 {
        self.open_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GattConnector for MockGattConnector {
    async fn open(&self, device: &DeviceDescriptor) -> Result<Arc<dyn GattPeripheral>> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let peripheral = lock(&self.peripherals)
            .get(&device.address)
            .cloned()
            .ok_or_else(|| Error::device_not_found(device.address.clone()))?;
        Ok(peripheral)
    }
}

/// Opens in-memory serial sockets.
///
/// Every successful `open` creates a [`tokio::io::duplex`] pipe; the sign's
/// end is kept until a test takes it with [`MockSerialConnector::take_peer`].
#[derive(Default)]
pub struct MockSerialConnector {
    failures: Mutex<HashMap<String, String>>,
    peers: Mutex<HashMap<String, DuplexStream>>,
    open_latency_ms: AtomicU64,
    open_calls: AtomicU32,
}

impl MockSerialConnector {
    /// Create a connector that accepts every open.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make opens to `address` fail with `message`.
    pub fn fail(&self, address: &str, message: &str) {
        lock(&self.failures).insert(address.to_string(), message.to_string());
    }

    /// Stop failing opens to `address`.
    pub fn heal(&self, address: &str) {
        lock(&self.failures).remove(address);
    }

    /// Simulated open latency.
    pub fn set_open_latency(&self, latency: Duration) {
        self.open_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Take the sign's end of the most recent socket to `address`.
    pub fn take_peer(&self, address: &str) -> Option<DuplexStream> {
        lock(&self.peers).remove(address)
    }

    /// Number of `open` calls.
    pub fn open_calls(&self) -> u32 {
        self.open_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SerialConnector for MockSerialConnector {
    async fn open(&self, device: &DeviceDescriptor) -> Result<SerialStream> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        simulate_latency(&self.open_latency_ms).await;
        if let Some(message) = lock(&self.failures).get(&device.address).cloned() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                message,
            )));
        }
        let (local, remote) = tokio::io::duplex(4096);
        lock(&self.peers).insert(device.address.clone(), remote);
        Ok(Box::pin(local))
    }
}

/// A scan backend fed by hand.
pub struct MockScanBackend {
    transport: TransportKind,
    sender: Mutex<Option<mpsc::UnboundedSender<DeviceDescriptor>>>,
    fail_start: AtomicBool,
    start_calls: AtomicU32,
    stop_calls: AtomicU32,
}

impl MockScanBackend {
    /// Create a backend for `transport`.
    pub fn new(transport: TransportKind) -> Self {
        Self {
            transport,
            sender: Mutex::new(None),
            fail_start: AtomicBool::new(false),
            start_calls: AtomicU32::new(0),
            stop_calls: AtomicU32::new(0),
        }
    }

    /// Report a device. Returns `false` when no scan is running.
    pub fn push(&self, device: DeviceDescriptor) -> bool {
        lock(&self.sender)
            .as_ref()
            .is_some_and(|tx| tx.send(device).is_ok())
    }

    /// End the current scan stream as if discovery finished on its own.
    pub fn finish(&self) {
        lock(&self.sender).take();
    }

    /// Make `start` fail.
    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `start` calls.
    pub fn start_count(&self) -> u32 {
        self.start_calls.load(Ordering::SeqCst)
    }

    /// Number of `stop` calls.
    pub fn stop_count(&self) -> u32 {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScanBackend for MockScanBackend {
    fn transport(&self) -> TransportKind {
        self.transport
    }

    async fn start(&self) -> Result<DeviceStream> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter));
        }
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.sender) = Some(tx);
        Ok(receiver_stream(rx))
    }

    async fn stop(&self) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.sender).take();
        Ok(())
    }
}
