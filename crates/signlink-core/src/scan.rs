//! Device discovery for one transport.
//!
//! A [`DeviceScanner`] drives a [`ScanBackend`] (btleplug for BLE, BlueZ for
//! classic Bluetooth, or a mock) and keeps an observable, duplicate-free list
//! of what it has seen.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use signlink_types::{DeviceDescriptor, TransportKind};

use crate::config::ScanOptions;
use crate::error::Result;
use crate::observable::Observable;

/// Stream of devices reported by a backend while it scans.
pub type DeviceStream = Pin<Box<dyn Stream<Item = DeviceDescriptor> + Send>>;

/// A native discovery mechanism.
#[async_trait]
pub trait ScanBackend: Send + Sync {
    /// Transport this backend discovers devices on.
    fn transport(&self) -> TransportKind;

    /// Start discovery. Devices arrive on the returned stream until
    /// [`ScanBackend::stop`] is called or the stream ends on its own.
    async fn start(&self) -> Result<DeviceStream>;

    /// Stop discovery.
    async fn stop(&self) -> Result<()>;
}

struct ScanTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Scanner for one transport.
pub struct DeviceScanner {
    backend: Arc<dyn ScanBackend>,
    options: ScanOptions,
    devices: Arc<Observable<Vec<DeviceDescriptor>>>,
    scanning: Arc<Observable<bool>>,
    generation: Arc<AtomicU64>,
    task: tokio::sync::Mutex<Option<ScanTask>>,
}

impl std::fmt::Debug for DeviceScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceScanner")
            .field("transport", &self.backend.transport())
            .field("options", &self.options)
            .field("devices", &self.devices.get().len())
            .field("scanning", &self.scanning.get())
            .finish()
    }
}

impl DeviceScanner {
    /// Create a scanner with default options.
    pub fn new(backend: Arc<dyn ScanBackend>) -> Self {
        Self::with_options(backend, ScanOptions::default())
    }

    /// Create a scanner with custom options.
    pub fn with_options(backend: Arc<dyn ScanBackend>, options: ScanOptions) -> Self {
        Self {
            backend,
            options,
            devices: Arc::new(Observable::new(Vec::new())),
            scanning: Arc::new(Observable::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Transport this scanner discovers devices on.
    pub fn transport(&self) -> TransportKind {
        self.backend.transport()
    }

    /// Start scanning. Does nothing if a scan is already running.
    ///
    /// With [`ScanOptions::clear_on_start`] set, results from earlier scans
    /// are dropped first.
    pub async fn start_scan(&self) -> Result<()> {
        let mut task = self.task.lock().await;
        if task.is_some() && self.scanning.get() {
            debug!(transport = %self.transport(), "Scan already running");
            return Ok(());
        }
        if let Some(stale) = task.take() {
            stale.cancel.cancel();
            stale.handle.abort();
        }

        if self.options.clear_on_start {
            self.devices.set_if_changed(Vec::new());
        }

        let stream = self.backend.start().await?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.scanning.set(true);
        info!(transport = %self.transport(), "Scan started");

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(collect(
            stream,
            Arc::clone(&self.devices),
            Arc::clone(&self.scanning),
            Arc::clone(&self.generation),
            generation,
            cancel.clone(),
        ));
        *task = Some(ScanTask { cancel, handle });
        Ok(())
    }

    /// Stop scanning. Safe to call when idle.
    pub async fn stop_scan(&self) -> Result<()> {
        let mut task = self.task.lock().await;
        let Some(running) = task.take() else {
            return Ok(());
        };
        running.cancel.cancel();
        running.handle.abort();
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.scanning.set_if_changed(false);
        info!(transport = %self.transport(), "Scan stopped");
        self.backend.stop().await
    }

    /// Whether a scan is running.
    pub fn is_scanning(&self) -> bool {
        self.scanning.get()
    }

    /// Devices discovered so far, in discovery order.
    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.devices.get()
    }

    /// Subscribe to the discovered-device list.
    pub fn watch_devices(&self) -> watch::Receiver<Vec<DeviceDescriptor>> {
        self.devices.subscribe()
    }

    /// Subscribe to the scanning flag.
    pub fn watch_scanning(&self) -> watch::Receiver<bool> {
        self.scanning.subscribe()
    }
}

/// Add a device unless its address is already listed.
///
/// Returns `true` if the list changed.
pub(crate) fn insert_unique(list: &mut Vec<DeviceDescriptor>, device: DeviceDescriptor) -> bool {
    if list.iter().any(|known| known.address == device.address) {
        false
    } else {
        list.push(device);
        true
    }
}

async fn collect(
    mut stream: DeviceStream,
    devices: Arc<Observable<Vec<DeviceDescriptor>>>,
    scanning: Arc<Observable<bool>>,
    generation: Arc<AtomicU64>,
    current: u64,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = stream.next() => next,
        };
        match next {
            Some(device) => {
                // The watch sender's lock serializes concurrent updates.
                let added = devices.modify_if(|list| insert_unique(list, device.clone()));
                if added {
                    debug!(address = %device.address, name = ?device.name, "Discovered device");
                }
            }
            None => {
                if generation.load(Ordering::SeqCst) == current {
                    scanning.set_if_changed(false);
                    warn!("Scan stream ended");
                }
                return;
            }
        }
    }
}
