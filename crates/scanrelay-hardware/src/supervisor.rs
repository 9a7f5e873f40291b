//! Reader supervisor.
//!
//! Owns one [`AnyReader`], keeps it connected and turns its raw scans into
//! [`MrzRecord`]s for a [`RecordSink`].
//!
//! # Architecture
//!
//! ```text
//!  driver thread / read loop           supervisor task                 parse task
//! ┌──────────────────────────┐  mpsc  ┌────────────────────────┐ spawn ┌──────────────┐
//! │ RawData / Connection(..) │───────►│ select! {              │──────►│ parse + sink │
//! └──────────────────────────┘        │   cancel, events,      │       └──────────────┘
//!          SupervisorHandle ─────────►│   commands, liveness } │
//!          (commands, submit_raw)     └────────────────────────┘
//! ```
//!
//! At most one parse runs at a time. A scan that arrives while one is running
//! is dropped, not queued, since readers routinely report the same document
//! more than once.
//!
//! # State machine
//!
//! ```text
//! Uninitialized ─► Connecting ─► Connected ◄─┐
//!                      │  ▲          │       │
//!                      ▼  │          ▼       │
//!                   Disconnected ◄───┘       │
//!                      └─────────────────────┘ (via Connecting)
//!
//! any state ─► Disposed
//! ```
//!
//! The supervisor never reconnects inline. Loss of connection only moves it
//! to `Disconnected`; the next liveness tick cleans up and reconnects.
//!
//! # Examples
//!
//! ```no_run
//! use scanrelay_hardware::{ReaderDrivers, ReaderSettings, ReaderSupervisor};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> scanrelay_hardware::Result<()> {
//!     let (records, mut rx) = mpsc::channel(16);
//!     let supervisor =
//!         ReaderSupervisor::from_settings(&ReaderSettings::default(), &ReaderDrivers::system(), records)?;
//!     let mut handle = supervisor.start();
//!
//!     if let Some(record) = rx.recv().await {
//!         println!("{} {}", record.last_name, record.first_name);
//!     }
//!
//!     handle.shutdown().await?;
//!     Ok(())
//! }
//! ```

use scanrelay_core::{MrzRecord, RecordSink};
use scanrelay_mrz::{MrzParser, RowSeparator, TemplateStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ReaderSettings;
use crate::devices::{AnyReader, ReaderDrivers, select_backend};
use crate::error::{HardwareError, Result};
use crate::traits::ReaderBackend;
use crate::types::{BackendKind, ReaderEvent, ReaderInfo};

const EVENT_CAPACITY: usize = 32;
const COMMAND_CAPACITY: usize = 8;

/// How long teardown waits for a running parse to hand off its record.
const PARSE_DRAIN_WAIT: Duration = Duration::from_millis(250);

/// Lifecycle state of a [`ReaderSupervisor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Uninitialized,
    Connecting,
    Connected,
    Disconnected,
    Disposed,
}

impl SupervisorState {
    /// Check if a transition follows the supervisor state machine.
    ///
    /// # Examples
    ///
    /// ```
    /// use scanrelay_hardware::SupervisorState;
    ///
    /// assert!(SupervisorState::Connecting.can_transition_to(SupervisorState::Connected));
    /// assert!(SupervisorState::Connected.can_transition_to(SupervisorState::Disposed));
    /// assert!(!SupervisorState::Disconnected.can_transition_to(SupervisorState::Connected));
    /// assert!(!SupervisorState::Disposed.can_transition_to(SupervisorState::Connecting));
    /// ```
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Uninitialized, Self::Connecting)
                | (Self::Connecting, Self::Connected | Self::Disconnected)
                | (Self::Connected, Self::Disconnected)
                | (Self::Disconnected, Self::Connecting)
                | (
                    Self::Uninitialized | Self::Connecting | Self::Connected | Self::Disconnected,
                    Self::Disposed
                )
        )
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Disposed
    }
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "Uninitialized"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Disposed => write!(f, "Disposed"),
        }
    }
}

enum Command {
    TriggerScan(oneshot::Sender<Result<()>>),
    Info(oneshot::Sender<Result<ReaderInfo>>),
}

/// Clears the in-flight flag when a parse ends, however it ends.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Keeps one reader connected and parses what it scans.
pub struct ReaderSupervisor<S> {
    reader: AnyReader,
    parser: MrzParser,
    separator: RowSeparator,
    reconnect_interval: Duration,
    max_reconnect_attempts: u32,
    sink: Arc<S>,
}

impl<S> std::fmt::Debug for ReaderSupervisor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderSupervisor")
            .field("reader", &self.reader)
            .field("separator", &self.separator)
            .field("reconnect_interval", &self.reconnect_interval)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .finish_non_exhaustive()
    }
}

impl<S: RecordSink> ReaderSupervisor<S> {
    pub fn new(settings: &ReaderSettings, reader: AnyReader, parser: MrzParser, sink: S) -> Self {
        Self {
            reader,
            parser,
            separator: settings.row_separator,
            reconnect_interval: settings.reconnect_interval,
            max_reconnect_attempts: settings.max_reconnect_attempts,
            sink: Arc::new(sink),
        }
    }

    /// Load templates and pick the backend as `settings` describe.
    ///
    /// # Errors
    /// Template loading failures and invalid settings. Neither is retried.
    pub fn from_settings(settings: &ReaderSettings, drivers: &ReaderDrivers, sink: S) -> Result<Self> {
        let templates = match &settings.template_file {
            Some(path) => TemplateStore::load(path)?,
            None => TemplateStore::builtin()?,
        };
        info!(templates = templates.len(), "Document templates loaded");

        let reader = select_backend(settings, drivers)?;
        let parser = MrzParser::new(Arc::new(templates));
        Ok(Self::new(settings, reader, parser, sink))
    }

    pub fn backend(&self) -> BackendKind {
        self.reader.backend()
    }

    /// Spawn the supervisor task.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(self) -> SupervisorHandle {
        let backend = self.reader.backend();
        let (state_tx, state_rx) = watch::channel(SupervisorState::Uninitialized);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let cancel = CancellationToken::new();

        let task = SupervisorTask {
            reader: self.reader,
            parser: self.parser,
            separator: self.separator,
            reconnect_interval: self.reconnect_interval,
            max_reconnect_attempts: self.max_reconnect_attempts,
            sink: self.sink,
            state: state_tx,
            events_tx: events_tx.clone(),
            in_flight: Arc::new(AtomicBool::new(false)),
            processing: JoinSet::new(),
        };
        let task = tokio::spawn(task.run(events_rx, commands_rx, cancel.clone()));

        SupervisorHandle {
            backend,
            state: state_rx,
            commands: commands_tx,
            events: events_tx,
            cancel,
            task: Some(task),
        }
    }
}

struct SupervisorTask<S> {
    reader: AnyReader,
    parser: MrzParser,
    separator: RowSeparator,
    reconnect_interval: Duration,
    max_reconnect_attempts: u32,
    sink: Arc<S>,
    state: watch::Sender<SupervisorState>,
    events_tx: mpsc::Sender<ReaderEvent>,
    in_flight: Arc<AtomicBool>,
    processing: JoinSet<()>,
}

impl<S: RecordSink> SupervisorTask<S> {
    async fn run(
        mut self,
        mut events: mpsc::Receiver<ReaderEvent>,
        mut commands: mpsc::Receiver<Command>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let backend = self.reader.backend();
        info!(backend = %backend, "Reader supervisor started");

        self.transition(SupervisorState::Connecting);
        self.connect().await;

        let mut liveness = tokio::time::interval_at(
            Instant::now() + self.reconnect_interval,
            self.reconnect_interval,
        );
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failed_attempts = 0u32;

        let outcome = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break Ok(()),

                Some(command) = commands.recv() => self.handle_command(command).await,

                Some(event) = events.recv() => self.handle_event(event),

                _ = liveness.tick() => {
                    if self.current() == SupervisorState::Connected && !self.reader.is_connected() {
                        warn!(backend = %backend, "Reader lost without notification");
                        self.transition(SupervisorState::Disconnected);
                    }
                    if self.current() != SupervisorState::Disconnected {
                        continue;
                    }
                    if self.max_reconnect_attempts > 0 && failed_attempts >= self.max_reconnect_attempts {
                        error!(backend = %backend, attempts = failed_attempts, "Giving up on reader");
                        break Err(HardwareError::initialization_failed(format!(
                            "{backend} reader did not reconnect after {failed_attempts} attempts"
                        )));
                    }

                    self.transition(SupervisorState::Connecting);
                    if self.connect().await {
                        failed_attempts = 0;
                    } else {
                        failed_attempts += 1;
                        debug!(backend = %backend, attempts = failed_attempts, "Reconnect attempt failed");
                    }
                }
            }

            while self.processing.try_join_next().is_some() {}
        };

        self.teardown().await;
        outcome
    }

    fn current(&self) -> SupervisorState {
        *self.state.borrow()
    }

    fn transition(&self, next: SupervisorState) {
        let current = self.current();
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            warn!(from = %current, to = %next, "Ignoring invalid supervisor transition");
            return;
        }
        info!(from = %current, to = %next, "Supervisor state changed");
        self.state.send_replace(next);
    }

    /// Clean up whatever the previous attempt left, then connect once.
    async fn connect(&mut self) -> bool {
        self.reader.disconnect().await;
        if self.reader.connect(self.events_tx.clone()).await {
            self.transition(SupervisorState::Connected);
            true
        } else {
            debug!(backend = %self.reader.backend(), "Reader not available");
            self.transition(SupervisorState::Disconnected);
            false
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::TriggerScan(reply) => {
                let result = if self.current() == SupervisorState::Connected {
                    self.reader.trigger_scan().await
                } else {
                    Err(HardwareError::disconnected(self.reader.backend().to_string()))
                };
                if let Err(e) = &result {
                    warn!(error = %e, "Active scan not started");
                }
                let _ = reply.send(result);
            }
            Command::Info(reply) => {
                let _ = reply.send(self.reader.info().await);
            }
        }
    }

    fn handle_event(&mut self, event: ReaderEvent) {
        match event {
            ReaderEvent::RawData(text) => self.process(text),
            ReaderEvent::ConnectionChanged(false) => {
                if self.current() == SupervisorState::Connected {
                    warn!(backend = %self.reader.backend(), "Reader connection lost");
                    self.transition(SupervisorState::Disconnected);
                }
            }
            ReaderEvent::ConnectionChanged(true) => {
                debug!(backend = %self.reader.backend(), "Reader reported connection");
            }
        }
    }

    fn process(&mut self, text: String) {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!(bytes = text.len(), "Scan already being processed, dropping duplicate");
            return;
        }
        let guard = InFlightGuard(Arc::clone(&self.in_flight));
        let parser = self.parser.clone();
        let separator = self.separator;
        let sink = Arc::clone(&self.sink);

        self.processing.spawn(async move {
            let _guard = guard;
            let Some(record) = parser.parse(&text, separator) else {
                info!(bytes = text.len(), "No document template matches scan, discarded");
                return;
            };
            deliver(sink.as_ref(), record).await;
        });
    }

    async fn teardown(&mut self) {
        if !self.processing.is_empty() {
            let drain = async { while self.processing.join_next().await.is_some() {} };
            if tokio::time::timeout(PARSE_DRAIN_WAIT, drain).await.is_err() {
                warn!("Abandoning scan still being processed at shutdown");
                self.processing.shutdown().await;
            }
        }
        self.reader.disconnect().await;
        self.transition(SupervisorState::Disposed);
        info!(backend = %self.reader.backend(), "Reader supervisor stopped");
    }
}

async fn deliver<S: RecordSink>(sink: &S, record: MrzRecord) {
    let document_type = record.document_type.clone();
    if sink.submit(record).await {
        info!(document_type = %document_type, "Scan parsed and handed off");
    } else {
        warn!(document_type = %document_type, "Record sink rejected parsed scan");
    }
}

/// Control surface of a running [`ReaderSupervisor`].
///
/// Dropping the handle cancels the supervisor; call
/// [`shutdown`](Self::shutdown) to also wait for its teardown.
pub struct SupervisorHandle {
    backend: BackendKind,
    state: watch::Receiver<SupervisorState>,
    commands: mpsc::Sender<Command>,
    events: mpsc::Sender<ReaderEvent>,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<()>>>,
}

impl std::fmt::Debug for SupervisorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorHandle")
            .field("backend", &self.backend)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SupervisorHandle {
    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SupervisorState> {
        self.state.clone()
    }

    /// Wait until the supervisor reaches `target`, up to `timeout`.
    pub async fn wait_for_state(&self, target: SupervisorState, timeout: Duration) -> bool {
        let mut state = self.state.clone();
        tokio::time::timeout(timeout, state.wait_for(|s| *s == target))
            .await
            .is_ok_and(|r| r.is_ok())
    }

    /// Ask the reader for an active scan.
    ///
    /// # Errors
    /// `Disconnected` when the reader is not connected or the supervisor has
    /// stopped; `Unsupported` when the backend has no active scan.
    pub async fn trigger_scan(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::TriggerScan(tx)).await?;
        rx.await.map_err(|_| stopped())?
    }

    pub async fn info(&self) -> Result<ReaderInfo> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Info(tx)).await?;
        rx.await.map_err(|_| stopped())?
    }

    /// Feed raw MRZ text through the same path as a hardware scan.
    ///
    /// Returns `false` once the supervisor has stopped.
    pub async fn submit_raw(&self, text: impl Into<String>) -> bool {
        self.events
            .send(ReaderEvent::RawData(text.into()))
            .await
            .is_ok()
    }

    /// Stop the supervisor and wait for teardown. Idempotent.
    ///
    /// Task failures are logged, not returned; shutdown itself cannot fail.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.cancel.cancel();
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        match classify_task_result(task.await) {
            TaskTermination::Success | TaskTermination::Cancelled => {}
            TaskTermination::Error(e) => warn!(error = %e, "Reader supervisor ended with error"),
            TaskTermination::Panic => error!("Reader supervisor task panicked"),
        }
        Ok(())
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).await.map_err(|_| stopped())
    }
}

impl Drop for SupervisorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn stopped() -> HardwareError {
    HardwareError::disconnected("reader supervisor stopped")
}

/// How the supervisor task ended.
#[derive(Debug)]
enum TaskTermination {
    Success,
    Error(HardwareError),
    Cancelled,
    Panic,
}

fn classify_task_result(
    result: std::result::Result<Result<()>, tokio::task::JoinError>,
) -> TaskTermination {
    match result {
        Ok(Ok(())) => TaskTermination::Success,
        Ok(Err(e)) => TaskTermination::Error(e),
        Err(e) if e.is_cancelled() => TaskTermination::Cancelled,
        Err(_) => TaskTermination::Panic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SerialMode;
    use crate::hid::{HidReader, HidSettings};
    use crate::mock::{MockSerialConnector, MockVendorSdk};
    use crate::serial::{SerialReader, SerialSettings};

    const PASSPORT: &str = "P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<<<<\r\n\
                            L898902C36UTO7408122F1204159ZE184226B<<<<<10";

    fn parser() -> MrzParser {
        MrzParser::new(Arc::new(TemplateStore::builtin().unwrap()))
    }

    fn fast_settings() -> ReaderSettings {
        ReaderSettings {
            reconnect_interval: Duration::from_millis(50),
            ..ReaderSettings::default()
        }
    }

    fn hid_reader() -> (AnyReader, crate::mock::MockVendorSdkHandle) {
        let (sdk, handle) = MockVendorSdk::new();
        let reader = HidReader::new(
            Arc::new(sdk),
            HidSettings {
                vendor_id: 0x0DB5,
                product_id: 0x013E,
                response_timeout: Duration::from_secs(1),
            },
        );
        (AnyReader::Hid(reader), handle)
    }

    #[test]
    fn test_state_transitions() {
        use SupervisorState::*;
        assert!(Uninitialized.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Disconnected));
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(!Uninitialized.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Connecting));
        for state in [Uninitialized, Connecting, Connected, Disconnected] {
            assert!(state.can_transition_to(Disposed));
        }
        assert!(!Disposed.can_transition_to(Disposed));
        assert!(Disposed.is_terminal());
    }

    #[test]
    fn test_state_display_and_serde() {
        assert_eq!(SupervisorState::Disconnected.to_string(), "Disconnected");
        assert_eq!(
            serde_json::to_string(&SupervisorState::Connected).unwrap(),
            "\"connected\""
        );
    }

    #[tokio::test]
    async fn test_connects_and_parses_hid_scan() {
        let (reader, hid) = hid_reader();
        hid.attach_device("IDBox");
        let (tx, mut rx) = mpsc::channel(4);

        let mut handle = ReaderSupervisor::new(&fast_settings(), reader, parser(), tx).start();
        assert!(handle.wait_for_state(SupervisorState::Connected, Duration::from_secs(1)).await);

        hid.scan(PASSPORT);
        let record = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.last_name, "ERIKSSON");
        assert_eq!(record.raw_mrz_data, PASSPORT);

        handle.shutdown().await.unwrap();
        assert_eq!(handle.state(), SupervisorState::Disposed);
    }

    #[tokio::test]
    async fn test_unmatched_scan_is_discarded() {
        let (reader, hid) = hid_reader();
        hid.attach_device("IDBox");
        let (tx, mut rx) = mpsc::channel(4);

        let mut handle = ReaderSupervisor::new(&fast_settings(), reader, parser(), tx).start();
        assert!(handle.submit_raw("NOT AN MRZ").await);
        assert!(handle.submit_raw(PASSPORT).await);

        let record = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.document_number, "L898902C36");
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_device_reconnects_on_liveness_tick() {
        let (reader, hid) = hid_reader();
        let (tx, _rx) = mpsc::channel(4);

        let mut handle = ReaderSupervisor::new(&fast_settings(), reader, parser(), tx).start();
        assert!(handle.wait_for_state(SupervisorState::Disconnected, Duration::from_secs(1)).await);

        hid.attach_device("IDBox");
        assert!(handle.wait_for_state(SupervisorState::Connected, Duration::from_secs(2)).await);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_loss_then_recovery() {
        let (reader, hid) = hid_reader();
        hid.attach_device("IDBox");
        let (tx, _rx) = mpsc::channel(4);

        let mut handle = ReaderSupervisor::new(&fast_settings(), reader, parser(), tx).start();
        assert!(handle.wait_for_state(SupervisorState::Connected, Duration::from_secs(1)).await);

        let mut states = handle.subscribe_state();
        hid.detach_device();
        states
            .wait_for(|s| *s == SupervisorState::Disconnected)
            .await
            .unwrap();

        hid.attach_device("IDBox");
        assert!(handle.wait_for_state(SupervisorState::Connected, Duration::from_secs(2)).await);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let (reader, _hid) = hid_reader();
        let (tx, _rx) = mpsc::channel(4);
        let settings = ReaderSettings {
            max_reconnect_attempts: 2,
            ..fast_settings()
        };

        let mut handle = ReaderSupervisor::new(&settings, reader, parser(), tx).start();
        assert!(handle.wait_for_state(SupervisorState::Disposed, Duration::from_secs(2)).await);
        assert!(matches!(
            handle.trigger_scan().await,
            Err(HardwareError::Disconnected { .. })
        ));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_trigger_scan_serial_pull() {
        let (connector, serial) = MockSerialConnector::new();
        serial.add_port("COM3");
        serial.set_inquiry_response("P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<<<<\rL898902C36UTO7408122F1204159ZE184226B<<<<<10\r\r");
        let reader = SerialReader::new(
            Arc::new(connector),
            SerialSettings {
                port: "COM3".to_string(),
                mode: SerialMode::Pull,
                response_timeout: Duration::from_millis(200),
                ..SerialSettings::default()
            },
        );
        let (tx, mut rx) = mpsc::channel(4);

        let mut handle =
            ReaderSupervisor::new(&fast_settings(), AnyReader::Serial(reader), parser(), tx).start();
        assert!(handle.wait_for_state(SupervisorState::Connected, Duration::from_secs(1)).await);

        handle.trigger_scan().await.unwrap();
        let record = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.nationality, "UTO");
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_trigger_scan_unsupported_on_hid() {
        let (reader, hid) = hid_reader();
        hid.attach_device("IDBox");
        let (tx, _rx) = mpsc::channel(4);

        let mut handle = ReaderSupervisor::new(&fast_settings(), reader, parser(), tx).start();
        assert!(handle.wait_for_state(SupervisorState::Connected, Duration::from_secs(1)).await);
        assert!(matches!(
            handle.trigger_scan().await,
            Err(HardwareError::Unsupported { .. })
        ));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_releases_reader() {
        let (reader, hid) = hid_reader();
        hid.attach_device("IDBox");
        let (tx, _rx) = mpsc::channel(4);

        let mut handle = ReaderSupervisor::new(&fast_settings(), reader, parser(), tx).start();
        assert!(handle.wait_for_state(SupervisorState::Connected, Duration::from_secs(1)).await);

        handle.shutdown().await.unwrap();
        handle.shutdown().await.unwrap();
        assert!(!hid.callbacks_registered());
        assert!(!handle.submit_raw(PASSPORT).await);
    }

    #[test]
    fn test_classify_task_result() {
        assert!(matches!(classify_task_result(Ok(Ok(()))), TaskTermination::Success));
        assert!(matches!(
            classify_task_result(Ok(Err(HardwareError::timeout(5)))),
            TaskTermination::Error(_)
        ));
    }
}
