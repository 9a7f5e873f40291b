//! Device side of the relay.
//!
//! The agent keeps one connection to the relay server per reader: it
//! registers, tracks which terminal holds the reader, sends heartbeats and
//! reconnects after the server goes away. As a [`RecordSink`] it stamps
//! each parsed record with the current reservation and submits it.
//!
//! `Wakeup` pushes come out of the [`ScanRequest`] receiver returned by
//! [`DeviceAgent::start`]; whoever owns the reader turns them into scans.
//!
//! ```no_run
//! use scanrelay_network::{AgentSettings, DeviceAgent};
//!
//! # async fn example() -> scanrelay_core::Result<()> {
//! let (agent, mut scans) = DeviceAgent::start(AgentSettings::default())?;
//! tokio::spawn(async move {
//!     while scans.recv().await.is_some() {
//!         // trigger the reader here
//!     }
//! });
//! # agent.shutdown().await;
//! # Ok(())
//! # }
//! ```

use parking_lot::{Mutex, RwLock};
use scanrelay_core::{DeviceId, MrzRecord, RecordSink, RelayRecord, TerminalId};
use scanrelay_protocol::Event;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::client::{RelayClient, RelayClientConfig};
use crate::config::AgentSettings;

/// How long [`DeviceAgent::shutdown`] waits for the connection task.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// A terminal asked for an active scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRequest;

#[derive(Debug)]
struct Link {
    client: Arc<RelayClient>,
    device_id: DeviceId,
}

#[derive(Debug)]
struct AgentShared {
    settings: AgentSettings,
    link: RwLock<Option<Link>>,
    reserved_by: RwLock<Option<TerminalId>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AgentShared {
    fn current(&self) -> Option<(Arc<RelayClient>, DeviceId)> {
        self.link
            .read()
            .as_ref()
            .filter(|link| link.client.is_connected())
            .map(|link| (Arc::clone(&link.client), link.device_id))
    }

    fn attach(&self, client: Arc<RelayClient>, device_id: DeviceId) {
        *self.link.write() = Some(Link { client, device_id });
        *self.reserved_by.write() = None;
    }

    fn detach(&self) {
        *self.link.write() = None;
        *self.reserved_by.write() = None;
    }
}

/// Cheap to clone; every clone drives the same connection.
#[derive(Debug, Clone)]
pub struct DeviceAgent {
    shared: Arc<AgentShared>,
}

impl DeviceAgent {
    /// Validate `settings` and start connecting in the background.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(
        settings: AgentSettings,
    ) -> scanrelay_core::Result<(Self, mpsc::Receiver<ScanRequest>)> {
        settings.validate()?;

        let shared = Arc::new(AgentShared {
            settings,
            link: RwLock::new(None),
            reserved_by: RwLock::new(None),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        });
        // One pending scan is enough; more wakeups coalesce.
        let (scans_tx, scans_rx) = mpsc::channel(1);

        let task = tokio::spawn(run(Arc::clone(&shared), scans_tx));
        *shared.task.lock() = Some(task);

        Ok((Self { shared }, scans_rx))
    }

    /// Id issued at the latest registration, while connected.
    pub fn device_id(&self) -> Option<DeviceId> {
        self.shared.current().map(|(_, device_id)| device_id)
    }

    /// Terminal currently holding this reader.
    pub fn reserved_by(&self) -> Option<TerminalId> {
        self.shared.reserved_by.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.current().is_some()
    }

    /// Submit a record for the terminal holding this reader.
    ///
    /// Returns `false`, with a log line, when disconnected, unreserved, or
    /// when the broker drops the record.
    pub async fn submit(&self, record: MrzRecord) -> bool {
        let Some((client, device_id)) = self.shared.current() else {
            warn!(
                document_number = %record.document_number,
                "Not connected to relay server, record dropped"
            );
            return false;
        };
        let Some(terminal_id) = self.reserved_by() else {
            info!(%device_id, "Device not reserved, record not submitted");
            return false;
        };

        let relay = RelayRecord::new(device_id, terminal_id.clone(), record);
        match client.submit_record(relay).await {
            Ok(receipt) if receipt.delivered() => {
                info!(%device_id, %terminal_id, recipients = receipt.recipients, "Record submitted");
                true
            }
            Ok(_) => {
                warn!(%device_id, %terminal_id, "Relay dropped the record");
                false
            }
            Err(e) => {
                warn!(%device_id, %terminal_id, error = %e, "Record submission failed");
                false
            }
        }
    }

    /// Stop reconnecting and close the connection. Safe to call twice.
    pub async fn shutdown(&self) {
        self.shared.cancel.cancel();

        let task = self.shared.task.lock().take();
        if let Some(task) = task {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await {
                Ok(Ok(())) => debug!("Device agent stopped"),
                Ok(Err(e)) if e.is_panic() => error!(error = %e, "Device agent task panicked"),
                Ok(Err(_)) => debug!("Device agent task cancelled"),
                Err(_) => warn!("Device agent did not stop in time"),
            }
        }

        let link = self.shared.link.write().take();
        if let Some(link) = link {
            link.client.close().await;
        }
        *self.shared.reserved_by.write() = None;
    }
}

impl RecordSink for DeviceAgent {
    fn submit(&self, record: MrzRecord) -> impl Future<Output = bool> + Send {
        DeviceAgent::submit(self, record)
    }
}

async fn run(shared: Arc<AgentShared>, scans: mpsc::Sender<ScanRequest>) {
    let settings = shared.settings.clone();
    let config = RelayClientConfig {
        server_addr: settings.server_addr,
        timeout: settings.request_timeout,
    };

    while !shared.cancel.is_cancelled() {
        match RelayClient::connect(config.clone()).await {
            Ok((client, events)) => {
                let client = Arc::new(client);
                match client.register_device(&settings.device_name).await {
                    Ok(device_id) => {
                        info!(%device_id, name = %settings.device_name, "Registered with relay server");
                        shared.attach(Arc::clone(&client), device_id);
                        serve(&shared, &client, events, &scans).await;
                        shared.detach();
                    }
                    Err(e) => warn!(error = %e, "Registration failed"),
                }
                client.close().await;
            }
            Err(e) => {
                warn!(server = %settings.server_addr, error = %e, "Relay server unreachable");
            }
        }

        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = tokio::time::sleep(settings.reconnect_interval) => {
                debug!(server = %settings.server_addr, "Reconnecting to relay server");
            }
        }
    }
}

/// Handle pushes and heartbeats until the connection drops or the agent
/// is cancelled.
async fn serve(
    shared: &AgentShared,
    client: &RelayClient,
    mut events: mpsc::Receiver<Event>,
    scans: &mpsc::Sender<ScanRequest>,
) {
    let period = shared.settings.heartbeat_interval;
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => return,
            event = events.recv() => match event {
                Some(Event::Reserved { terminal_id }) => {
                    info!(%terminal_id, "Reserved by terminal");
                    *shared.reserved_by.write() = Some(terminal_id);
                }
                Some(Event::Released) => {
                    let previous = shared.reserved_by.write().take();
                    info!(terminal_id = ?previous.as_ref().map(TerminalId::as_str), "Released");
                }
                Some(Event::Wakeup) => match scans.try_send(ScanRequest) {
                    Ok(()) => debug!("Wakeup received, scan requested"),
                    Err(TrySendError::Full(_)) => debug!("Wakeup received, scan already pending"),
                    Err(TrySendError::Closed(_)) => warn!("Wakeup received but no reader is attached"),
                },
                Some(Event::DeviceRegistered { device_id }) => {
                    debug!(%device_id, "Registration confirmed");
                }
                Some(other) => trace!(event = ?other, "Ignoring event"),
                None => {
                    warn!("Connection to relay server lost");
                    return;
                }
            },
            _ = heartbeat.tick() => {
                if let Err(e) = client.heartbeat().await {
                    warn!(error = %e, "Heartbeat failed");
                    if e.is_fatal() {
                        return;
                    }
                }
            }
        }
    }
}
