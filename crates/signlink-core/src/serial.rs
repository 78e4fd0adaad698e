//! Classic Bluetooth (serial port profile) connections to traffic signs.
//!
//! ```text
//! Disconnected --connect--> Connecting --socket open--> Connected
//!                           Connecting --open failure/timeout--> Error
//! ```
//!
//! While connected, one reader task turns every `\n`-terminated line from the
//! sign into the connection's status message. End of stream or a read error
//! drops the connection to `Disconnected`. There is no draining phase, so the
//! serial transport never reports `Disconnecting`.

use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use signlink_types::{ConnectionState, DeviceDescriptor, TransportKind};

use crate::config::ConnectionConfig;
use crate::error::{ConnectionFailureReason, Error, Result};
use crate::observable::{Observable, StatusFeed};
use crate::traits::Connection;
use crate::util::lock;

/// Byte stream of an open serial socket.
pub trait SerialIo: AsyncRead + AsyncWrite + Send {}

impl<T: AsyncRead + AsyncWrite + Send> SerialIo for T {}

/// An open serial socket.
pub type SerialStream = Pin<Box<dyn SerialIo>>;

/// Opens serial sockets to devices.
#[async_trait]
pub trait SerialConnector: Send + Sync {
    /// Open a socket to `device`.
    async fn open(&self, device: &DeviceDescriptor) -> Result<SerialStream>;
}

type Writer = Arc<tokio::sync::Mutex<WriteHalf<SerialStream>>>;

#[derive(Default)]
struct Session {
    epoch: u64,
    cancel: CancellationToken,
    writer: Option<Writer>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    fn teardown(&mut self) {
        self.epoch += 1;
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.writer = None;
    }
}

struct Shared {
    device: DeviceDescriptor,
    connector: Arc<dyn SerialConnector>,
    config: ConnectionConfig,
    state: Observable<ConnectionState>,
    status: StatusFeed,
    session: Mutex<Session>,
}

/// A connection to one classic Bluetooth traffic sign.
pub struct SerialConnection {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SerialConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialConnection")
            .field("address", &self.shared.device.address)
            .field("name", &self.shared.device.name)
            .field("state", &self.shared.state.get())
            .finish()
    }
}

impl SerialConnection {
    /// Create a disconnected connection for `device`.
    pub fn new(
        device: DeviceDescriptor,
        connector: Arc<dyn SerialConnector>,
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

    fn fail_attempt(&self, epoch: u64, message: String) {
        let mut session = lock(&self.session);
        if session.epoch != epoch {
            return;
        }
        session.teardown();
        self.state.set(ConnectionState::Error);
        self.status.publish(message.clone());
        warn!(address = %self.device.address, "Serial connection failed: {}", message);
    }

    fn link_lost(&self, epoch: u64) {
        let mut session = lock(&self.session);
        if session.epoch != epoch {
            return;
        }
        session.teardown();
        self.state.set(ConnectionState::Disconnected);
        info!(address = %self.device.address, "Serial link closed");
    }

    async fn run_attempt(self: Arc<Self>, epoch: u64, cancel: CancellationToken) {
        debug!(address = %self.device.address, "Opening serial socket");

        let open = tokio::time::timeout(self.config.connect_timeout, self.connector.open(&self.device));
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return,
            outcome = open => outcome,
        };
        let stream = match outcome {
            Ok(Ok(stream)) => stream,
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

        let (reader, writer) = tokio::io::split(stream);
        let mut session = lock(&self.session);
        if session.epoch != epoch {
            // Superseded while opening; dropping both halves closes the socket.
            return;
        }
        session.writer = Some(Arc::new(tokio::sync::Mutex::new(writer)));
        let task = tokio::spawn(Arc::clone(&self).run_reader(epoch, reader, cancel));
        session.tasks.push(task);
        self.state.set(ConnectionState::Connected);
        info!(address = %self.device.address, "Serial socket open");
    }

    async fn run_reader(
        self: Arc<Self>,
        epoch: u64,
        reader: ReadHalf<SerialStream>,
        cancel: CancellationToken,
    ) {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = tokio::select! {
                _ = cancel.cancelled() => return,
                read = reader.read_until(b'\n', &mut buf) => read,
            };
            match read {
                Ok(0) => {
                    debug!(address = %self.device.address, "Serial stream ended");
                    self.link_lost(epoch);
                    return;
                }
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches('\n').trim_end_matches('\r');
                    debug!(address = %self.device.address, "RX: {}", line);
                    self.publish_status(epoch, line);
                }
                Err(e) => {
                    warn!(address = %self.device.address, error = %e, "Serial read failed");
                    self.link_lost(epoch);
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl Connection for SerialConnection {
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
        info!(address = %shared.device.address, "Connecting over RFCOMM");

        let attempt = runtime.spawn(Arc::clone(shared).run_attempt(session.epoch, session.cancel.clone()));
        session.tasks.push(attempt);
    }

    async fn send_command(&self, command: &str) -> bool {
        let shared = &self.shared;
        let target = {
            let session = lock(&shared.session);
            if shared.state.get() == ConnectionState::Connected {
                session.writer.clone().map(|writer| (writer, session.epoch))
            } else {
                None
            }
        };
        let Some((writer, epoch)) = target else {
            debug!(address = %shared.device.address, "Not connected, dropping command");
            return false;
        };

        let mut line = String::with_capacity(command.len() + 1);
        line.push_str(command);
        line.push('\n');

        let mut writer = writer.lock().await;
        let write = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };
        match tokio::time::timeout(shared.config.write_timeout, write).await {
            Ok(Ok(())) => {
                debug!(address = %shared.device.address, "TX: {}", command);
                true
            }
            Ok(Err(e)) => {
                warn!(address = %shared.device.address, error = %e, "Serial write failed");
                shared.publish_status(epoch, format!("Error: {}", e));
                false
            }
            Err(_) => {
                warn!(address = %shared.device.address, "Serial write timed out");
                shared.publish_status(epoch, "Error: write timed out");
                false
            }
        }
    }

    fn disconnect(&self) {
        self.close();
    }

    fn close(&self) {
        let shared = &self.shared;
        let mut session = lock(&shared.session);
        session.teardown();
        if shared.state.set_if_changed(ConnectionState::Disconnected) {
            info!(address = %shared.device.address, "Serial connection closed");
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
        session.writer.is_some() && self.shared.state.get() == ConnectionState::Connected
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

impl Drop for SerialConnection {
    fn drop(&mut self) {
        self.close();
    }
}
