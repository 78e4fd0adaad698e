//! Connection event system.
//!
//! The registry and the discovery hub publish [`ConnectionEvent`]s on a
//! broadcast channel so front ends can react to state changes, status
//! messages and accident alerts without polling.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use signlink_types::{ConnectionState, DeviceDescriptor};

/// Events emitted for discovered devices and registered connections.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ConnectionEvent {
    /// A device appeared in the merged discovery list.
    Discovered { device: DeviceDescriptor },
    /// A connection changed state.
    StateChanged {
        address: String,
        state: ConnectionState,
    },
    /// A connection published a new status message.
    StatusMessage { address: String, message: String },
    /// A status message reported an accident.
    AccidentDetected { address: String, message: String },
    /// The accident mark for a device was cleared.
    AccidentCleared { address: String },
    /// A connection was removed from the registry.
    Removed { address: String },
}

impl ConnectionEvent {
    /// Address of the device the event is about.
    pub fn address(&self) -> &str {
        match self {
            Self::Discovered { device } => &device.address,
            Self::StateChanged { address, .. }
            | Self::StatusMessage { address, .. }
            | Self::AccidentDetected { address, .. }
            | Self::AccidentCleared { address }
            | Self::Removed { address } => address,
        }
    }
}

/// Sender for connection events.
pub type EventSender = broadcast::Sender<ConnectionEvent>;

/// Receiver for connection events.
pub type EventReceiver = broadcast::Receiver<ConnectionEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: ConnectionEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
