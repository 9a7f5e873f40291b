//! Relay client used by device agents and terminals.
//!
//! One TCP connection carries both request/reply traffic and server pushes.
//! A reader task routes replies to the waiting request by frame id and
//! forwards [`Event`]s to the receiver returned by [`RelayClient::connect`].
//!
//! # Example
//!
//! ```no_run
//! use scanrelay_core::TerminalId;
//! use scanrelay_network::{RelayClient, RelayClientConfig};
//! use scanrelay_protocol::Event;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (client, mut events) = RelayClient::connect(RelayClientConfig::default()).await?;
//! let terminal = TerminalId::new("DESK-1")?;
//! client.join_terminal(&terminal).await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let Event::RecordReceived { record } = event {
//!         println!("{}", record.record.document_number);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use scanrelay_core::constants::{DEFAULT_RELAY_PORT, DEFAULT_REQUEST_TIMEOUT_MS};
use scanrelay_core::{DeviceId, RelayRecord, TerminalId};
use scanrelay_protocol::{
    ClientCodec, ClientFrame, DeviceInfo, Event, Reply, Request, ServerFrame, SubmitOutcome,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};

use crate::error::ClientError;

/// Depth of the event queue handed to the caller.
pub const EVENT_QUEUE_DEPTH: usize = 256;

type FrameSink = SplitSink<Framed<TcpStream, ClientCodec>, ClientFrame>;
type FrameStream = SplitStream<Framed<TcpStream, ClientCodec>>;
type Pending = Arc<DashMap<u64, oneshot::Sender<Reply>>>;

/// Client connection settings.
///
/// # Example
///
/// ```
/// use scanrelay_network::RelayClientConfig;
/// use std::time::Duration;
///
/// let config = RelayClientConfig {
///     server_addr: "192.168.0.10:5050".parse().unwrap(),
///     timeout: Duration::from_secs(1),
/// };
/// ```
#[derive(Debug, Clone)]
pub struct RelayClientConfig {
    pub server_addr: SocketAddr,

    /// Applies to connecting, each write and each reply.
    pub timeout: Duration,
}

impl Default for RelayClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_RELAY_PORT),
            timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

/// Outcome of a record submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub outcome: SubmitOutcome,
    /// Terminal connections the record reached.
    pub recipients: usize,
}

impl SubmitReceipt {
    pub fn delivered(&self) -> bool {
        self.outcome == SubmitOutcome::Delivered
    }
}

pub struct RelayClient {
    server_addr: SocketAddr,
    timeout: Duration,
    sink: Mutex<FrameSink>,
    pending: Pending,
    next_id: AtomicU64,
    connected: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("server_addr", &self.server_addr)
            .field("connected", &self.is_connected())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl RelayClient {
    /// Connect and start routing incoming frames.
    ///
    /// Returns the client and the receiver for server pushes. Dropping the
    /// receiver discards further events without affecting requests.
    ///
    /// # Errors
    ///
    /// `ClientError::ConnectionTimeout` when the server does not accept in
    /// time, `ClientError::Io` when it refuses.
    pub async fn connect(
        config: RelayClientConfig,
    ) -> Result<(Self, mpsc::Receiver<Event>), ClientError> {
        debug!(server = %config.server_addr, "Connecting to relay server");

        let stream =
            match tokio::time::timeout(config.timeout, TcpStream::connect(config.server_addr))
                .await
            {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    debug!(server = %config.server_addr, error = %e, "Connection failed");
                    return Err(e.into());
                }
                Err(_) => {
                    warn!(server = %config.server_addr, "Connection timeout");
                    return Err(ClientError::ConnectionTimeout(millis(config.timeout)));
                }
            };

        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "Failed to set TCP_NODELAY");
        }

        let (sink, frames) = Framed::new(stream, ClientCodec::new()).split();
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let pending: Pending = Arc::new(DashMap::new());
        let connected = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(read_frames(
            frames,
            Arc::clone(&pending),
            events_tx,
            Arc::clone(&connected),
        ));

        info!(server = %config.server_addr, "Connected to relay server");
        Ok((
            Self {
                server_addr: config.server_addr,
                timeout: config.timeout,
                sink: Mutex::new(sink),
                pending,
                next_id: AtomicU64::new(1),
                connected,
                reader,
            },
            events_rx,
        ))
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// `false` once the server has closed the connection or sent garbage.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Announce a reader on this connection and get its device id.
    pub async fn register_device(&self, name: &str) -> Result<DeviceId, ClientError> {
        let request = Request::RegisterDevice {
            name: name.to_string(),
        };
        match self.request(request).await? {
            Reply::DeviceRegistered { device_id } => Ok(device_id),
            other => Err(unexpected("register_device", &other)),
        }
    }

    pub async fn reserve(
        &self,
        device_id: DeviceId,
        terminal_id: &TerminalId,
    ) -> Result<bool, ClientError> {
        let request = Request::Reserve {
            device_id,
            terminal_id: terminal_id.clone(),
        };
        match self.request(request).await? {
            Reply::Reservation { accepted } => Ok(accepted),
            other => Err(unexpected("reserve", &other)),
        }
    }

    pub async fn release(
        &self,
        device_id: DeviceId,
        terminal_id: &TerminalId,
    ) -> Result<bool, ClientError> {
        let request = Request::Release {
            device_id,
            terminal_id: terminal_id.clone(),
        };
        match self.request(request).await? {
            Reply::Release { accepted } => Ok(accepted),
            other => Err(unexpected("release", &other)),
        }
    }

    pub async fn submit_record(&self, record: RelayRecord) -> Result<SubmitReceipt, ClientError> {
        match self.request(Request::SubmitRecord { record }).await? {
            Reply::Submit {
                outcome,
                recipients,
            } => Ok(SubmitReceipt {
                outcome,
                recipients,
            }),
            other => Err(unexpected("submit_record", &other)),
        }
    }

    /// Receive records and disconnect notices addressed to `terminal_id`.
    pub async fn join_terminal(&self, terminal_id: &TerminalId) -> Result<(), ClientError> {
        let request = Request::JoinTerminal {
            terminal_id: terminal_id.clone(),
        };
        self.expect_ack("join_terminal", request).await
    }

    pub async fn leave_terminal(&self, terminal_id: &TerminalId) -> Result<(), ClientError> {
        let request = Request::LeaveTerminal {
            terminal_id: terminal_id.clone(),
        };
        self.expect_ack("leave_terminal", request).await
    }

    /// Ask a device held by `terminal_id` to scan.
    ///
    /// # Errors
    ///
    /// `ClientError::Rejected` when the device is not held by the terminal
    /// or not connected.
    pub async fn wakeup(
        &self,
        device_id: DeviceId,
        terminal_id: &TerminalId,
    ) -> Result<(), ClientError> {
        let request = Request::Wakeup {
            device_id,
            terminal_id: terminal_id.clone(),
        };
        self.expect_ack("wakeup", request).await
    }

    pub async fn list_devices(&self, available_only: bool) -> Result<Vec<DeviceInfo>, ClientError> {
        match self.request(Request::ListDevices { available_only }).await? {
            Reply::Devices { devices } => Ok(devices),
            other => Err(unexpected("list_devices", &other)),
        }
    }

    pub async fn get_device(&self, device_id: DeviceId) -> Result<Option<DeviceInfo>, ClientError> {
        match self.request(Request::GetDevice { device_id }).await? {
            Reply::Device { device } => Ok(device),
            other => Err(unexpected("get_device", &other)),
        }
    }

    pub async fn heartbeat(&self) -> Result<(), ClientError> {
        self.expect_ack("heartbeat", Request::Heartbeat).await
    }

    /// Close the connection. Pending requests fail with `ConnectionLost`.
    pub async fn close(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            info!(server = %self.server_addr, "Closing relay connection");
        }
        let mut sink = self.sink.lock().await;
        if let Err(e) = tokio::time::timeout(self.timeout, sink.close()).await {
            debug!(error = %e, "Close timed out");
        }
        drop(sink);
        self.reader.abort();
        self.pending.clear();
    }

    async fn expect_ack(&self, name: &'static str, request: Request) -> Result<(), ClientError> {
        match self.request(request).await? {
            Reply::Ack => Ok(()),
            other => Err(unexpected(name, &other)),
        }
    }

    /// Send one request and wait for its reply.
    async fn request(&self, request: Request) -> Result<Reply, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = request.name();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(id, reply_tx);
        trace!(id, request = name, "Sending request");

        let sent = {
            let mut sink = self.sink.lock().await;
            tokio::time::timeout(self.timeout, sink.send(ClientFrame::new(id, request))).await
        };
        match sent {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.pending.remove(&id);
                error!(request = name, error = %e, "Failed to send request");
                return Err(e.into());
            }
            Err(_) => {
                self.pending.remove(&id);
                warn!(request = name, "Send timeout");
                return Err(ClientError::WriteTimeout(millis(self.timeout)));
            }
        }

        let reply = match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(ClientError::connection_lost("connection closed")),
            Err(_) => {
                self.pending.remove(&id);
                warn!(id, request = name, "No reply in time");
                return Err(ClientError::ReadTimeout(millis(self.timeout)));
            }
        };

        match reply {
            Reply::Error { message } => {
                debug!(request = name, %message, "Request rejected");
                Err(ClientError::Rejected(message))
            }
            reply => Ok(reply),
        }
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_frames(
    mut frames: FrameStream,
    pending: Pending,
    events: mpsc::Sender<Event>,
    connected: Arc<AtomicBool>,
) {
    while let Some(item) = frames.next().await {
        match item {
            Ok(ServerFrame::Reply { id, reply }) => match pending.remove(&id) {
                Some((_, waiter)) => {
                    let _ = waiter.send(reply);
                }
                None => debug!(id, "Reply for unknown or expired request"),
            },
            Ok(ServerFrame::Event { event }) => {
                trace!(?event, "Event received");
                // Replies share this task, so a slow consumer must not stall it.
                match events.try_send(event) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => warn!("Event queue full, event dropped"),
                    // Nobody listens for pushes.
                    Err(TrySendError::Closed(_)) => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Protocol error from server, closing");
                break;
            }
        }
    }

    if connected.swap(false, Ordering::AcqRel) {
        info!("Relay server closed the connection");
    }
    // Wake every waiter with a closed channel.
    pending.clear();
}

fn unexpected(request: &'static str, reply: &Reply) -> ClientError {
    ClientError::UnexpectedReply {
        request,
        reply: format!("{reply:?}"),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
