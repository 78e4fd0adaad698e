//! The [`Connection`] capability shared by both transports.
//!
//! A connection is a long-lived object for one device address. Its operations
//! never fail across this boundary: establishment problems end in the `Error`
//! state with a status message, write problems only update the status
//! message, and a peer disconnect is observed as `Disconnected`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use signlink_types::{ConnectionState, TransportKind};

use crate::error::{ConnectionFailureReason, Error, Result};

/// One device connection, over GATT or the serial port profile.
///
/// # Example
///
/// ```ignore
/// use signlink_core::{Connection, wait_until_ready};
/// use std::time::Duration;
///
/// async fn stop(conn: &dyn Connection) -> bool {
///     conn.connect();
///     if wait_until_ready(conn, Duration::from_secs(20)).await.is_err() {
///         return false;
///     }
///     conn.send_command("STOP").await
/// }
/// ```
#[async_trait]
pub trait Connection: Send + Sync {
    /// Device address this connection is bound to.
    fn address(&self) -> &str;

    /// Transport the connection runs over.
    fn transport(&self) -> TransportKind;

    /// Start a connection attempt in the background.
    ///
    /// From `Disconnected` or `Error` the state becomes `Connecting` before
    /// this returns. Calls made while `Connecting`, `Connected` or
    /// `Disconnecting` are ignored.
    fn connect(&self);

    /// Send one command payload.
    ///
    /// Returns `true` when the transport accepted the write. Returns `false`
    /// without touching the transport when the connection is not ready.
    async fn send_command(&self, command: &str) -> bool;

    /// Head toward `Disconnected` without blocking. Idempotent.
    fn disconnect(&self);

    /// Release every resource now and force `Disconnected`. Idempotent.
    ///
    /// Interrupts an in-flight connection attempt and any read loop.
    fn close(&self);

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Most recent status message.
    fn status_message(&self) -> Option<String>;

    /// Whether a command can be written right now.
    fn is_ready(&self) -> bool;

    /// Subscribe to state changes, starting from the current state.
    fn watch_state(&self) -> watch::Receiver<ConnectionState>;

    /// Subscribe to status message changes, starting from the current message.
    ///
    /// Only the latest message is kept; a burst may be observed as its last
    /// line. Use [`Connection::subscribe_messages`] to see every message.
    fn watch_status(&self) -> watch::Receiver<Option<String>>;

    /// Receive every status message published after this call, in order.
    fn subscribe_messages(&self) -> broadcast::Receiver<String>;
}

/// Wait until the connection's state satisfies `predicate`.
///
/// Returns the matching state, or [`Error::Timeout`] if `timeout` elapses
/// first.
pub async fn wait_for_state<F>(
    conn: &dyn Connection,
    predicate: F,
    timeout: Duration,
) -> Result<ConnectionState>
where
    F: Fn(ConnectionState) -> bool,
{
    let mut rx = conn.watch_state();
    let wait = async {
        rx.wait_for(|state| predicate(*state))
            .await
            .map(|state| *state)
            .map_err(|_| Error::Cancelled)
    };
    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| Error::timeout("wait_for_state", timeout))?
}

/// Wait until the connection can accept commands.
///
/// Fails early when the attempt ends in `Error` or falls back to
/// `Disconnected`. Call [`Connection::connect`] first.
pub async fn wait_until_ready(conn: &dyn Connection, timeout: Duration) -> Result<()> {
    let mut state_rx = conn.watch_state();
    let mut status_rx = conn.watch_status();

    let wait = async {
        loop {
            // Mark both channels seen before checking, so an update racing the
            // check still wakes the select below.
            let state = *state_rx.borrow_and_update();
            status_rx.borrow_and_update();
            if conn.is_ready() {
                return Ok(());
            }
            match state {
                ConnectionState::Error => {
                    let reason = conn
                        .status_message()
                        .unwrap_or_else(|| "connection failed".to_string());
                    return Err(Error::connection_failed(
                        Some(conn.address().to_string()),
                        ConnectionFailureReason::Other(reason),
                    ));
                }
                ConnectionState::Disconnected => return Err(Error::NotConnected),
                _ => {}
            }

            tokio::select! {
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return Err(Error::Cancelled);
                    }
                }
                changed = status_rx.changed() => {
                    if changed.is_err() {
                        return Err(Error::Cancelled);
                    }
                }
            }
        }
    };

    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| Error::timeout("wait_until_ready", timeout))?
}
