//! Current-value cells that can be watched for changes.
//!
//! Every per-connection field a UI reads (state, status message, device
//! lists, alert summary) lives in an [`Observable`]. Writers publish through
//! the watch sender, so readers always see a whole value and late subscribers
//! start from the current one.
//!
//! Status messages are also events: a [`StatusFeed`] keeps the latest one for
//! current-value readers and broadcasts each one to stream subscribers.

use tokio::sync::{broadcast, watch};

/// Messages a stream subscriber may fall behind before it lags.
pub const STATUS_BACKLOG: usize = 64;

/// A value that can be watched for changes.
#[derive(Debug)]
pub struct Observable<T> {
    sender: watch::Sender<T>,
}

impl<T: Clone + Send + Sync + 'static> Observable<T> {
    /// Create a new observable with an initial value.
    pub fn new(value: T) -> Self {
        let (sender, _) = watch::channel(value);
        Self { sender }
    }

    /// Get the current value.
    pub fn get(&self) -> T {
        self.sender.borrow().clone()
    }

    /// Replace the value, notifying all watchers.
    ///
    /// The value is stored even when nobody is subscribed.
    pub fn set(&self, value: T) {
        self.sender.send_replace(value);
    }

    /// Modify the value in place and notify watchers.
    pub fn modify<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
    {
        self.sender.send_modify(f);
    }

    /// Modify the value in place, notifying watchers only if `f` returns `true`.
    pub fn modify_if<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut T) -> bool,
    {
        self.sender.send_if_modified(f)
    }

    /// Subscribe to changes. The receiver starts at the current value.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.sender.subscribe()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Observable<T> {
    /// Set the value only if it differs from the current one.
    ///
    /// Returns `true` when watchers were notified.
    pub fn set_if_changed(&self, value: T) -> bool {
        self.sender.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }
}

impl<T: Clone + Default + Send + Sync + 'static> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Latest status message plus an ordered stream of every message published.
#[derive(Debug)]
pub struct StatusFeed {
    current: Observable<Option<String>>,
    messages: broadcast::Sender<String>,
}

impl StatusFeed {
    pub fn new() -> Self {
        let (messages, _) = broadcast::channel(STATUS_BACKLOG);
        Self {
            current: Observable::new(None),
            messages,
        }
    }

    /// Store `message` as the current status and deliver it to every stream
    /// subscriber, even when it repeats the previous one.
    pub fn publish(&self, message: impl Into<String>) {
        let message = message.into();
        self.current.set(Some(message.clone()));
        // No subscribers is fine; the current value is still kept.
        let _ = self.messages.send(message);
    }

    /// The most recent message.
    pub fn get(&self) -> Option<String> {
        self.current.get()
    }

    /// Watch the current message. Intermediate values may be skipped.
    pub fn watch(&self) -> watch::Receiver<Option<String>> {
        self.current.subscribe()
    }

    /// Receive every message published after this call, in order.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.messages.subscribe()
    }
}

impl Default for StatusFeed {
    fn default() -> Self {
        Self::new()
    }
}
