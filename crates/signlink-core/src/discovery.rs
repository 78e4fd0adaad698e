//! Merging discovery results from several scanners.
//!
//! BLE and classic scanners often report the same dual-mode sign. The merged
//! list keeps one entry per address, taken from whichever scanner reported it
//! first, and is sorted by display name.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use signlink_types::DeviceDescriptor;

use crate::error::Result;
use crate::events::{ConnectionEvent, EventDispatcher};
use crate::observable::Observable;
use crate::scan::{DeviceScanner, insert_unique};
use crate::util::lock;

/// Merge device lists, keeping the first entry seen for every address.
///
/// Lists are consumed in order, so earlier lists win. The result is sorted by
/// [`DeviceDescriptor::display_name`]; ties keep their merge order.
///
/// ```
/// use signlink_core::discovery::merge_devices;
/// use signlink_types::{DeviceDescriptor, TransportKind};
///
/// let ble = vec![DeviceDescriptor::named("AA:BB:CC:DD:EE:01", "Yield", TransportKind::Ble)];
/// let classic = vec![
///     DeviceDescriptor::named("AA:BB:CC:DD:EE:01", "Yield (SPP)", TransportKind::Classic),
///     DeviceDescriptor::named("AA:BB:CC:DD:EE:02", "Stop", TransportKind::Classic),
/// ];
///
/// let merged = merge_devices([ble, classic]);
/// assert_eq!(merged.len(), 2);
/// assert_eq!(merged[0].display_name(), "Stop");
/// assert_eq!(merged[1].transport, TransportKind::Ble);
/// ```
pub fn merge_devices<I>(lists: I) -> Vec<DeviceDescriptor>
where
    I: IntoIterator<Item = Vec<DeviceDescriptor>>,
{
    let mut merged = Vec::new();
    for list in lists {
        for device in list {
            insert_unique(&mut merged, device);
        }
    }
    sort_for_display(&mut merged);
    merged
}

fn sort_for_display(devices: &mut [DeviceDescriptor]) {
    devices.sort_by(|a, b| a.display_name().cmp(b.display_name()));
}

struct MergeState {
    lists: Vec<Vec<DeviceDescriptor>>,
    /// Every currently listed device, in the order it was first reported.
    seen: Vec<DeviceDescriptor>,
}

struct HubShared {
    merged: Observable<Vec<DeviceDescriptor>>,
    state: Mutex<MergeState>,
    events: Option<EventDispatcher>,
}

impl HubShared {
    fn update(&self, index: usize, list: Vec<DeviceDescriptor>) {
        let mut added = Vec::new();
        {
            let mut state = lock(&self.state);
            for device in &list {
                if insert_unique(&mut state.seen, device.clone()) {
                    added.push(device.clone());
                }
            }
            state.lists[index] = list;

            let MergeState { lists, seen } = &mut *state;
            seen.retain(|device| {
                lists
                    .iter()
                    .any(|list| list.iter().any(|d| d.address == device.address))
            });

            let mut merged = seen.clone();
            sort_for_display(&mut merged);
            self.merged.set_if_changed(merged);
        }

        if let Some(events) = &self.events {
            for device in added {
                events.send(ConnectionEvent::Discovered { device });
            }
        }
    }
}

/// Runs several scanners together and keeps their merged device list.
///
/// The live list gives precedence to whichever scanner reported an address
/// first. An entry leaves the list once no scanner lists it any more.
pub struct DiscoveryHub {
    scanners: Vec<DeviceScanner>,
    shared: Arc<HubShared>,
    watchers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for DiscoveryHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryHub")
            .field("scanners", &self.scanners)
            .field("devices", &self.shared.merged.get().len())
            .finish()
    }
}

impl DiscoveryHub {
    /// Create a hub over `scanners`.
    pub fn new(scanners: Vec<DeviceScanner>) -> Self {
        Self::build(scanners, None)
    }

    /// Create a hub that also emits [`ConnectionEvent::Discovered`] for every
    /// address that enters the merged list.
    pub fn with_events(scanners: Vec<DeviceScanner>, events: EventDispatcher) -> Self {
        Self::build(scanners, Some(events))
    }

    fn build(scanners: Vec<DeviceScanner>, events: Option<EventDispatcher>) -> Self {
        let lists = vec![Vec::new(); scanners.len()];
        Self {
            scanners,
            shared: Arc::new(HubShared {
                merged: Observable::new(Vec::new()),
                state: Mutex::new(MergeState {
                    lists,
                    seen: Vec::new(),
                }),
                events,
            }),
            watchers: Mutex::new(Vec::new()),
        }
    }

    /// The scanners this hub drives.
    pub fn scanners(&self) -> &[DeviceScanner] {
        &self.scanners
    }

    fn ensure_watchers(&self) {
        let mut watchers = lock(&self.watchers);
        if !watchers.is_empty() {
            return;
        }
        for (index, scanner) in self.scanners.iter().enumerate() {
            let mut rx = scanner.watch_devices();
            let shared = Arc::clone(&self.shared);
            watchers.push(tokio::spawn(async move {
                loop {
                    let list = rx.borrow_and_update().clone();
                    shared.update(index, list);
                    if rx.changed().await.is_err() {
                        return;
                    }
                }
            }));
        }
    }

    /// Start every scanner.
    ///
    /// A scanner that fails to start is logged and skipped; an error is only
    /// returned when none of them could start.
    pub async fn start_scan(&self) -> Result<()> {
        self.ensure_watchers();
        let mut first_error = None;
        let mut started = 0;
        for scanner in &self.scanners {
            match scanner.start_scan().await {
                Ok(()) => started += 1,
                Err(e) => {
                    warn!(transport = %scanner.transport(), error = %e, "Scanner failed to start");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) if started == 0 => Err(e),
            _ => Ok(()),
        }
    }

    /// Stop every scanner. Safe to call when idle.
    pub async fn stop_scan(&self) -> Result<()> {
        let mut first_error = None;
        for scanner in &self.scanners {
            if let Err(e) = scanner.stop_scan().await {
                debug!(transport = %scanner.transport(), error = %e, "Scanner failed to stop");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Whether any scanner is running.
    pub fn is_scanning(&self) -> bool {
        self.scanners.iter().any(DeviceScanner::is_scanning)
    }

    /// The merged, sorted device list.
    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.shared.merged.get()
    }

    /// Subscribe to the merged device list.
    pub fn watch_devices(&self) -> watch::Receiver<Vec<DeviceDescriptor>> {
        self.shared.merged.subscribe()
    }
}

impl Drop for DiscoveryHub {
    fn drop(&mut self) {
        for watcher in lock(&self.watchers).drain(..) {
            watcher.abort();
        }
    }
}
