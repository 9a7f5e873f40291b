//! Serial/COM document reader.
//!
//! Connect tries each configured baud rate in order: open, assert DTR,
//! discard stale bytes and ask for the firmware version. The first rate that
//! answers wins. In push mode the reader is switched to continuous scanning
//! and a blocking read loop polls the port; in pull mode scans only happen on
//! [`trigger_scan`](ReaderBackend::trigger_scan).

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::packet::{PacketAssembler, SerialPacket, command};
use crate::config::{ReaderSettings, SerialMode};
use crate::error::{HardwareError, Result};
use crate::traits::{ReaderBackend, SerialConnector, SerialLink};
use crate::types::{BackendKind, ReaderEvent, ReaderInfo};

type SharedLink = Arc<Mutex<Box<dyn SerialLink>>>;

const READ_CHUNK: usize = 1024;
const RESPONSE_POLL: Duration = Duration::from_millis(10);
const STOP_WAIT: Duration = Duration::from_millis(250);

/// Timing and probing parameters of the serial backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rates: Vec<u32>,
    pub mode: SerialMode,
    /// How long to wait for the answer to a request.
    pub response_timeout: Duration,
    /// Read loop polling period.
    pub poll_interval: Duration,
    /// Pause after a failed read.
    pub error_backoff: Duration,
    /// Consecutive failed reads before the link is declared lost.
    pub max_consecutive_errors: u32,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rates: vec![9600, 115_200],
            mode: SerialMode::Push,
            response_timeout: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(50),
            error_backoff: Duration::from_secs(1),
            max_consecutive_errors: 5,
        }
    }
}

impl From<&ReaderSettings> for SerialSettings {
    fn from(settings: &ReaderSettings) -> Self {
        Self {
            port: settings.serial_port.trim().to_string(),
            baud_rates: settings.baud_rates.clone(),
            mode: settings.serial_mode,
            ..Self::default()
        }
    }
}

struct ReadLoop {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct SerialReader {
    connector: Arc<dyn SerialConnector>,
    settings: SerialSettings,
    link: Option<SharedLink>,
    connected: Arc<AtomicBool>,
    events: Option<mpsc::Sender<ReaderEvent>>,
    read_loop: Option<ReadLoop>,
    baud_rate: Option<u32>,
    version: Option<String>,
    serial_number: Option<String>,
}

impl std::fmt::Debug for SerialReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialReader")
            .field("port", &self.settings.port)
            .field("mode", &self.settings.mode)
            .field("baud_rate", &self.baud_rate)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl SerialReader {
    pub fn new(connector: Arc<dyn SerialConnector>, settings: SerialSettings) -> Self {
        Self {
            connector,
            settings,
            link: None,
            connected: Arc::new(AtomicBool::new(false)),
            events: None,
            read_loop: None,
            baud_rate: None,
            version: None,
            serial_number: None,
        }
    }

    pub fn port(&self) -> &str {
        &self.settings.port
    }

    /// Baud rate the device answered at.
    pub fn baud_rate(&self) -> Option<u32> {
        self.baud_rate
    }

    /// Firmware version reported during connect.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }

    fn link(&self) -> Result<SharedLink> {
        self.link
            .clone()
            .filter(|_| self.is_connected())
            .ok_or_else(|| HardwareError::disconnected(self.settings.port.clone()))
    }

    async fn open_and_identify(&self) -> Option<Identified> {
        let connector = Arc::clone(&self.connector);
        let settings = self.settings.clone();
        tokio::task::spawn_blocking(move || identify_any(connector.as_ref(), &settings))
            .await
            .unwrap_or_else(|e| {
                error!(error = %e, "Serial identify task failed");
                None
            })
    }

    fn start_read_loop(&mut self, link: SharedLink, events: mpsc::Sender<ReaderEvent>) {
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let connected = Arc::clone(&self.connected);
        let settings = self.settings.clone();

        let task = tokio::task::spawn_blocking(move || {
            run_read_loop(&link, &events, &loop_cancel, &connected, &settings);
        });
        self.read_loop = Some(ReadLoop { cancel, task });
    }

    async fn stop_read_loop(&mut self) {
        let Some(read_loop) = self.read_loop.take() else {
            return;
        };
        read_loop.cancel.cancel();
        match tokio::time::timeout(STOP_WAIT, read_loop.task).await {
            Ok(Ok(())) => debug!(port = %self.settings.port, "Read loop stopped"),
            Ok(Err(e)) => warn!(port = %self.settings.port, error = %e, "Read loop ended abnormally"),
            Err(_) => warn!(port = %self.settings.port, "Read loop did not stop in time"),
        }
    }
}

struct Identified {
    link: Box<dyn SerialLink>,
    baud_rate: u32,
    version: String,
    serial_number: Option<String>,
}

impl ReaderBackend for SerialReader {
    fn kind(&self) -> BackendKind {
        BackendKind::Serial
    }

    async fn connect(&mut self, events: mpsc::Sender<ReaderEvent>) -> bool {
        if self.is_connected() {
            return true;
        }
        // Leftovers from a lost link.
        self.disconnect().await;

        let port = self.settings.port.clone();
        if port.trim().is_empty() {
            warn!("No serial port configured");
            return false;
        }
        if !self.connector.port_exists(&port) {
            warn!(port = %port, "Serial port not present");
            return false;
        }

        let Some(identified) = self.open_and_identify().await else {
            warn!(port = %port, bauds = ?self.settings.baud_rates, "Reader did not answer at any baud rate");
            return false;
        };

        info!(
            port = %port,
            baud_rate = identified.baud_rate,
            version = %identified.version,
            "Serial reader connected"
        );

        let link: SharedLink = Arc::new(Mutex::new(identified.link));
        self.baud_rate = Some(identified.baud_rate);
        self.version = Some(identified.version);
        self.serial_number = identified.serial_number;
        self.link = Some(Arc::clone(&link));
        self.events = Some(events.clone());
        self.connected.store(true, Ordering::SeqCst);

        if self.settings.mode == SerialMode::Push {
            if let Err(e) = self.set_scanning(true).await {
                warn!(port = %port, error = %e, "Failed to enable continuous reading");
                self.disconnect().await;
                return false;
            }
            self.start_read_loop(link, events);
        }
        true
    }

    async fn disconnect(&mut self) {
        self.stop_read_loop().await;

        if let Some(link) = self.link.take() {
            let port = self.settings.port.clone();
            let result = tokio::task::spawn_blocking(move || {
                let mut link = link.lock();
                // Best effort; the port may already be gone.
                let _ = link.write_all(&SerialPacket::continuous(false).encode());
            })
            .await;
            if let Err(e) = result {
                warn!(port = %port, error = %e, "Serial close task failed");
            }
            info!(port = %port, "Serial reader disconnected");
        }

        self.connected.store(false, Ordering::SeqCst);
        self.events = None;
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn set_scanning(&mut self, enable: bool) -> Result<()> {
        let link = self.link()?;
        tokio::task::spawn_blocking(move || {
            link.lock()
                .write_all(&SerialPacket::continuous(enable).encode())
        })
        .await
        .map_err(|e| HardwareError::communication(e.to_string()))??;

        info!(port = %self.settings.port, enabled = enable, "Continuous reading toggled");
        Ok(())
    }

    async fn trigger_scan(&mut self) -> Result<()> {
        let link = self.link()?;

        if self.settings.mode == SerialMode::Push {
            // The read loop picks up the answer.
            tokio::task::spawn_blocking(move || {
                link.lock()
                    .write_all(&SerialPacket::request(command::INQUIRY).encode())
            })
            .await
            .map_err(|e| HardwareError::communication(e.to_string()))??;
            info!(port = %self.settings.port, "Inquiry sent");
            return Ok(());
        }

        let timeout = self.settings.response_timeout;
        let response = tokio::task::spawn_blocking(move || {
            let mut link = link.lock();
            query(&mut **link, command::INQUIRY, timeout)
        })
        .await
        .map_err(|e| HardwareError::communication(e.to_string()))??;

        match response.and_then(|packet| packet.text()) {
            Some(text) if !text.is_empty() => {
                if let Some(events) = &self.events
                    && events.try_send(ReaderEvent::RawData(text)).is_err()
                {
                    warn!(port = %self.settings.port, "Event queue full, scan dropped");
                }
            }
            _ => debug!(port = %self.settings.port, "Inquiry returned no data"),
        }
        Ok(())
    }

    async fn info(&self) -> Result<ReaderInfo> {
        if !self.is_connected() {
            return Err(HardwareError::disconnected(self.settings.port.clone()));
        }
        let mut info = ReaderInfo::new(format!("Serial reader on {}", self.settings.port), BackendKind::Serial);
        if let Some(version) = &self.version {
            info = info.with_firmware_version(version.clone());
        }
        if let Some(serial) = &self.serial_number {
            info = info.with_serial_number(serial.clone());
        }
        Ok(info)
    }
}

fn identify_any(connector: &dyn SerialConnector, settings: &SerialSettings) -> Option<Identified> {
    for &baud_rate in &settings.baud_rates {
        match identify_at(connector, &settings.port, baud_rate, settings.response_timeout) {
            Ok(identified) => return Some(identified),
            Err(e) => debug!(port = %settings.port, baud_rate, error = %e, "Identify attempt failed"),
        }
    }
    None
}

fn identify_at(
    connector: &dyn SerialConnector,
    port: &str,
    baud_rate: u32,
    timeout: Duration,
) -> Result<Identified> {
    let mut link = connector.open(port, baud_rate)?;
    link.set_dtr(true)?;
    link.clear_buffers()?;

    let version = query(link.as_mut(), command::VERSION, timeout)?
        .and_then(|packet| packet.text())
        .ok_or_else(|| HardwareError::timeout(timeout.as_millis() as u64))?;

    let serial_number = query(link.as_mut(), command::SERIAL_NUMBER, timeout)
        .ok()
        .flatten()
        .and_then(|packet| packet.text())
        .filter(|s| !s.is_empty());

    Ok(Identified {
        link,
        baud_rate,
        version,
        serial_number,
    })
}

/// Send a bare request and wait up to `timeout` for the packet answering it.
fn query(link: &mut dyn SerialLink, cmd: u8, timeout: Duration) -> Result<Option<SerialPacket>> {
    link.write_all(&SerialPacket::request(cmd).encode())?;

    let deadline = Instant::now() + timeout;
    let mut assembler = PacketAssembler::new();
    let mut buf = [0u8; READ_CHUNK];
    loop {
        let available = link.bytes_available()?;
        if available > 0 {
            let n = link.read(&mut buf[..available.min(READ_CHUNK)])?;
            assembler.push(&buf[..n]);
            while let Some(packet) = assembler.next_packet() {
                if packet.command == cmd {
                    return Ok(Some(packet));
                }
            }
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        std::thread::sleep(RESPONSE_POLL);
    }
}

fn run_read_loop(
    link: &SharedLink,
    events: &mpsc::Sender<ReaderEvent>,
    cancel: &CancellationToken,
    connected: &AtomicBool,
    settings: &SerialSettings,
) {
    info!(port = %settings.port, "Continuous reading started");
    let mut assembler = PacketAssembler::new();
    let mut buf = [0u8; READ_CHUNK];
    let mut consecutive_errors = 0u32;

    while !cancel.is_cancelled() {
        match read_available(link, &mut buf) {
            Ok(n) => {
                consecutive_errors = 0;
                if n > 0 {
                    assembler.push(&buf[..n]);
                    while let Some(packet) = assembler.next_packet() {
                        deliver(&packet, events, &settings.port);
                    }
                }
                sleep_unless_cancelled(settings.poll_interval, cancel);
            }
            Err(e) => {
                consecutive_errors += 1;
                error!(port = %settings.port, error = %e, consecutive_errors, "Error reading from serial reader");
                if consecutive_errors >= settings.max_consecutive_errors {
                    warn!(port = %settings.port, "Too many read errors, reporting connection loss");
                    connected.store(false, Ordering::SeqCst);
                    let _ = events.blocking_send(ReaderEvent::ConnectionChanged(false));
                    break;
                }
                assembler.clear();
                sleep_unless_cancelled(settings.error_backoff, cancel);
            }
        }
    }
    info!(port = %settings.port, "Continuous reading ended");
}

fn read_available(link: &SharedLink, buf: &mut [u8]) -> Result<usize> {
    let mut link = link.lock();
    let available = link.bytes_available()?;
    if available == 0 {
        return Ok(0);
    }
    let len = available.min(buf.len());
    link.read(&mut buf[..len])
}

fn deliver(packet: &SerialPacket, events: &mpsc::Sender<ReaderEvent>, port: &str) {
    if !packet.is_mrz() {
        debug!(port = %port, command = %char::from(packet.command), "Ignoring non-MRZ packet");
        return;
    }
    let Some(text) = packet.text().filter(|t| !t.is_empty()) else {
        return;
    };
    if events.try_send(ReaderEvent::RawData(text)).is_err() {
        warn!(port = %port, "Event queue full, scan dropped");
    }
}

/// Sleep in short slices so cancellation is observed promptly.
fn sleep_unless_cancelled(total: Duration, cancel: &CancellationToken) {
    const SLICE: Duration = Duration::from_millis(50);
    let deadline = Instant::now() + total;
    while !cancel.is_cancelled() {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep(SLICE.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockSerialConnector;

    fn fast_settings(port: &str, mode: SerialMode) -> SerialSettings {
        SerialSettings {
            port: port.to_string(),
            mode,
            response_timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
            error_backoff: Duration::from_millis(20),
            ..SerialSettings::default()
        }
    }

    async fn next_event(rx: &mut mpsc::Receiver<ReaderEvent>) -> ReaderEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for reader event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_missing_port_returns_false() {
        let (connector, _handle) = MockSerialConnector::new();
        let mut reader = SerialReader::new(Arc::new(connector), fast_settings("COM9", SerialMode::Push));
        let (tx, _rx) = mpsc::channel(8);

        assert!(!reader.connect(tx).await);
        assert!(!reader.is_connected());
    }

    #[tokio::test]
    async fn test_tries_lower_baud_first_then_higher() {
        let (connector, handle) = MockSerialConnector::new();
        handle.add_port("COM3");
        handle.set_device_baud(115_200);

        let mut reader = SerialReader::new(Arc::new(connector), fast_settings("COM3", SerialMode::Pull));
        let (tx, _rx) = mpsc::channel(8);

        assert!(reader.connect(tx).await);
        assert_eq!(reader.baud_rate(), Some(115_200));
        assert_eq!(handle.opened_bauds(), vec![9600, 115_200]);
        assert_eq!(reader.version(), Some("MOCK-1.0"));
        assert!(handle.dtr());
        reader.disconnect().await;
    }

    #[tokio::test]
    async fn test_no_answer_at_any_baud_returns_false() {
        let (connector, handle) = MockSerialConnector::new();
        handle.add_port("COM3");
        handle.set_device_baud(57_600);

        let mut reader = SerialReader::new(Arc::new(connector), fast_settings("COM3", SerialMode::Push));
        let (tx, _rx) = mpsc::channel(8);
        assert!(!reader.connect(tx).await);
    }

    #[tokio::test]
    async fn test_push_mode_delivers_only_mrz_frames() {
        let (connector, handle) = MockSerialConnector::new();
        handle.add_port("COM3");

        let mut reader = SerialReader::new(Arc::new(connector), fast_settings("COM3", SerialMode::Push));
        let (tx, mut rx) = mpsc::channel(8);
        assert!(reader.connect(tx).await);
        assert!(handle.continuous_enabled());

        handle.push_packet(SerialPacket::new(command::PRODUCT_INFO, b"noise".to_vec()));
        handle.push_mrz("ROW1\rROW2\r\r");

        assert_eq!(
            next_event(&mut rx).await,
            ReaderEvent::RawData("ROW1\r\nROW2".to_string())
        );

        reader.disconnect().await;
        assert!(!handle.continuous_enabled());
        assert!(!reader.is_connected());
    }

    #[tokio::test]
    async fn test_read_errors_back_off_then_recover() {
        let (connector, handle) = MockSerialConnector::new();
        handle.add_port("COM3");

        let mut reader = SerialReader::new(Arc::new(connector), fast_settings("COM3", SerialMode::Push));
        let (tx, mut rx) = mpsc::channel(8);
        assert!(reader.connect(tx).await);

        handle.inject_read_errors(3);
        handle.push_mrz("AFTER\r");

        assert_eq!(next_event(&mut rx).await, ReaderEvent::RawData("AFTER\r\n".to_string()));
        assert!(reader.is_connected());
        reader.disconnect().await;
    }

    #[tokio::test]
    async fn test_persistent_errors_report_connection_loss() {
        let (connector, handle) = MockSerialConnector::new();
        handle.add_port("COM3");

        let mut reader = SerialReader::new(Arc::new(connector), fast_settings("COM3", SerialMode::Push));
        let (tx, mut rx) = mpsc::channel(8);
        assert!(reader.connect(tx).await);

        handle.inject_read_errors(5);
        assert_eq!(next_event(&mut rx).await, ReaderEvent::ConnectionChanged(false));
        assert!(!reader.is_connected());
        reader.disconnect().await;
    }

    #[tokio::test]
    async fn test_pull_mode_inquiry() {
        let (connector, handle) = MockSerialConnector::new();
        handle.add_port("COM3");
        handle.set_inquiry_response("LINE1\rLINE2\r\r");

        let mut reader = SerialReader::new(Arc::new(connector), fast_settings("COM3", SerialMode::Pull));
        let (tx, mut rx) = mpsc::channel(8);
        assert!(reader.connect(tx).await);
        assert!(!handle.continuous_enabled());

        reader.trigger_scan().await.unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            ReaderEvent::RawData("LINE1\r\nLINE2".to_string())
        );
        assert!(handle.written_commands().contains(&command::INQUIRY));
    }

    #[tokio::test]
    async fn test_pull_mode_inquiry_timeout_is_empty() {
        let (connector, handle) = MockSerialConnector::new();
        handle.add_port("COM3");

        let mut reader = SerialReader::new(Arc::new(connector), fast_settings("COM3", SerialMode::Pull));
        let (tx, mut rx) = mpsc::channel(8);
        assert!(reader.connect(tx).await);

        reader.trigger_scan().await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_trigger_when_disconnected_errors() {
        let (connector, _handle) = MockSerialConnector::new();
        let mut reader = SerialReader::new(Arc::new(connector), fast_settings("COM3", SerialMode::Pull));
        assert!(matches!(
            reader.trigger_scan().await,
            Err(HardwareError::Disconnected { .. })
        ));
    }

    #[tokio::test]
    async fn test_info_reports_version_and_serial() {
        let (connector, handle) = MockSerialConnector::new();
        handle.add_port("COM3");
        let mut reader = SerialReader::new(Arc::new(connector), fast_settings("COM3", SerialMode::Pull));
        let (tx, _rx) = mpsc::channel(8);
        assert!(reader.connect(tx).await);

        let info = reader.info().await.unwrap();
        assert_eq!(info.backend, BackendKind::Serial);
        assert_eq!(info.firmware_version.as_deref(), Some("MOCK-1.0"));
        assert_eq!(info.serial_number.as_deref(), Some("MOCK-SN-0001"));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (connector, handle) = MockSerialConnector::new();
        handle.add_port("COM3");
        let mut reader = SerialReader::new(Arc::new(connector), fast_settings("COM3", SerialMode::Push));
        let (tx, _rx) = mpsc::channel(8);
        assert!(reader.connect(tx).await);

        reader.disconnect().await;
        reader.disconnect().await;
        assert!(!reader.is_connected());
    }
}
