//! Request handling and fan-out for the relay server.
//!
//! Every connection is a session with a bounded outbound queue; the server
//! drains it onto the socket. The broker only ever `try_send`s into those
//! queues, so a slow peer loses events instead of stalling other sessions.
//!
//! Terminals subscribe to their own group with `JoinTerminal`. Relayed records
//! and forced-release notices go to every connection in the group.

use dashmap::DashMap;
use scanrelay_core::constants::DEFAULT_DEVICE_NAME;
use scanrelay_core::{ConnectionId, DeviceId, RelayRecord, TerminalId};
use scanrelay_protocol::{Event, Reply, Request, ServerFrame, SubmitOutcome};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::registry::{ClosedDevice, DeviceRegistry};

/// Depth of each session's outbound queue.
pub const SESSION_QUEUE_DEPTH: usize = 256;

#[derive(Debug)]
struct Session {
    outbound: mpsc::Sender<ServerFrame>,
    terminals: HashSet<TerminalId>,
}

#[derive(Debug, Default)]
pub struct RelayBroker {
    registry: Arc<DeviceRegistry>,
    sessions: DashMap<ConnectionId, Session>,
    groups: DashMap<TerminalId, HashSet<ConnectionId>>,
    next_connection: AtomicU64,
}

impl RelayBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(registry: Arc<DeviceRegistry>) -> Self {
        Self {
            registry,
            ..Self::default()
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Start tracking a connection whose outbound frames go to `outbound`.
    pub fn open_session(&self, outbound: mpsc::Sender<ServerFrame>) -> ConnectionId {
        let connection = ConnectionId::new(self.next_connection.fetch_add(1, Ordering::Relaxed) + 1);
        self.sessions.insert(
            connection,
            Session {
                outbound,
                terminals: HashSet::new(),
            },
        );
        debug!(%connection, "Session opened");
        connection
    }

    /// Forget a connection: leave its groups, free its device and tell the
    /// terminal that held it. Closing twice is a no-op.
    pub fn close_session(&self, connection: ConnectionId) -> Option<ClosedDevice> {
        if let Some((_, session)) = self.sessions.remove(&connection) {
            for terminal_id in &session.terminals {
                self.remove_member(terminal_id, connection);
            }
            debug!(%connection, "Session closed");
        }

        let closed = self.registry.on_connection_closed(connection)?;
        if let Some(terminal_id) = &closed.released_from {
            let notified = self.notify_group(
                terminal_id,
                Event::DeviceDisconnected {
                    device_id: closed.device_id,
                },
            );
            info!(
                device_id = %closed.device_id,
                %terminal_id,
                notified,
                "Terminal notified of device disconnect"
            );
        }
        Some(closed)
    }

    /// Answer one request from `connection`.
    pub fn handle_request(&self, connection: ConnectionId, request: Request) -> Reply {
        trace!(%connection, request = request.name(), "Handling request");
        self.registry.touch(connection);

        match request {
            Request::RegisterDevice { name } => {
                let name = match name.trim() {
                    "" => DEFAULT_DEVICE_NAME,
                    trimmed => trimmed,
                };
                let device = self.registry.register_device(name, connection);
                self.push(
                    connection,
                    Event::DeviceRegistered {
                        device_id: device.id,
                    },
                );
                Reply::DeviceRegistered {
                    device_id: device.id,
                }
            }
            Request::Reserve {
                device_id,
                terminal_id,
            } => {
                let accepted = self.registry.reserve_device(device_id, &terminal_id);
                if accepted {
                    self.push_to_device(device_id, Event::Reserved { terminal_id });
                }
                Reply::Reservation { accepted }
            }
            Request::Release {
                device_id,
                terminal_id,
            } => {
                let accepted = self.registry.release_device(device_id, &terminal_id);
                if accepted {
                    self.push_to_device(device_id, Event::Released);
                }
                Reply::Release { accepted }
            }
            Request::SubmitRecord { record } => {
                let (outcome, recipients) = self.relay_record(connection, record);
                Reply::Submit {
                    outcome,
                    recipients,
                }
            }
            Request::JoinTerminal { terminal_id } => {
                self.join(connection, terminal_id);
                Reply::Ack
            }
            Request::LeaveTerminal { terminal_id } => {
                self.leave(connection, &terminal_id);
                Reply::Ack
            }
            Request::Wakeup {
                device_id,
                terminal_id,
            } => {
                if self.wakeup(device_id, &terminal_id) {
                    Reply::Ack
                } else {
                    Reply::error(format!(
                        "device {device_id} is not connected or not held by {terminal_id}"
                    ))
                }
            }
            Request::ListDevices { available_only } => {
                let devices = if available_only {
                    self.registry.get_available()
                } else {
                    self.registry.get_all()
                };
                Reply::Devices {
                    devices: devices.iter().map(|d| d.info()).collect(),
                }
            }
            Request::GetDevice { device_id } => Reply::Device {
                device: self.registry.get(device_id).map(|d| d.info()),
            },
            Request::Heartbeat => Reply::Ack,
        }
    }

    /// Relay a record submitted by `connection` to its terminal's group.
    ///
    /// The submitting connection must own the device, and the device must be
    /// held by the record's terminal. Anything else is dropped silently.
    pub fn relay_record(
        &self,
        connection: ConnectionId,
        record: RelayRecord,
    ) -> (SubmitOutcome, usize) {
        let device_id = record.device_id;
        let terminal_id = record.terminal_id.clone();

        let accepted = self.registry.get(device_id).is_some_and(|device| {
            device.connection == Some(connection)
                && device.reserved_by.as_ref() == Some(&terminal_id)
        });
        if !accepted {
            info!(%device_id, %terminal_id, %connection, "Record dropped: device not held by terminal");
            return (SubmitOutcome::Dropped, 0);
        }

        let recipients = self.notify_group(&terminal_id, Event::RecordReceived { record });
        info!(%device_id, %terminal_id, recipients, "Record relayed");
        (SubmitOutcome::Delivered, recipients)
    }

    /// Ask a held, connected device to scan.
    pub fn wakeup(&self, device_id: DeviceId, terminal_id: &TerminalId) -> bool {
        let Some(device) = self.registry.get(device_id) else {
            debug!(%device_id, %terminal_id, "Wakeup for unknown device");
            return false;
        };
        let Some(connection) = device.connection else {
            debug!(%device_id, %terminal_id, "Wakeup for disconnected device");
            return false;
        };
        if device.reserved_by.as_ref() != Some(terminal_id) {
            info!(%device_id, %terminal_id, "Wakeup refused: device not held by terminal");
            return false;
        }
        let sent = self.push(connection, Event::Wakeup);
        debug!(%device_id, %terminal_id, sent, "Wakeup sent");
        sent
    }

    /// Periodically remove devices idle for longer than `timeout`.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let broker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => broker.sweep(timeout),
                }
            }
            debug!("Registry sweeper stopped");
        })
    }

    fn sweep(&self, timeout: Duration) {
        let removed = self.registry.sweep_inactive(timeout);
        for device in &removed {
            if let Some(terminal_id) = &device.reserved_by {
                self.notify_group(
                    terminal_id,
                    Event::DeviceDisconnected {
                        device_id: device.id,
                    },
                );
            }
        }
        if !removed.is_empty() {
            info!(removed = removed.len(), remaining = self.registry.len(), "Registry swept");
        }
    }

    fn join(&self, connection: ConnectionId, terminal_id: TerminalId) {
        let Some(mut session) = self.sessions.get_mut(&connection) else {
            return;
        };
        session.terminals.insert(terminal_id.clone());
        drop(session);

        self.groups
            .entry(terminal_id.clone())
            .or_default()
            .insert(connection);
        debug!(%connection, %terminal_id, "Joined terminal group");
    }

    fn leave(&self, connection: ConnectionId, terminal_id: &TerminalId) {
        if let Some(mut session) = self.sessions.get_mut(&connection) {
            session.terminals.remove(terminal_id);
        }
        self.remove_member(terminal_id, connection);
        debug!(%connection, %terminal_id, "Left terminal group");
    }

    fn remove_member(&self, terminal_id: &TerminalId, connection: ConnectionId) {
        if let Some(mut members) = self.groups.get_mut(terminal_id) {
            members.remove(&connection);
        }
        self.groups
            .remove_if(terminal_id, |_, members| members.is_empty());
    }

    /// Push `event` to every member of a terminal group. Returns how many
    /// connections accepted it.
    fn notify_group(&self, terminal_id: &TerminalId, event: Event) -> usize {
        let members: Vec<ConnectionId> = self
            .groups
            .get(terminal_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default();

        members
            .into_iter()
            .filter(|connection| self.push(*connection, event.clone()))
            .count()
    }

    fn push_to_device(&self, device_id: DeviceId, event: Event) -> bool {
        match self.registry.get(device_id).and_then(|d| d.connection) {
            Some(connection) => self.push(connection, event),
            None => false,
        }
    }

    fn push(&self, connection: ConnectionId, event: Event) -> bool {
        let Some(outbound) = self.sessions.get(&connection).map(|s| s.outbound.clone()) else {
            return false;
        };
        match outbound.try_send(ServerFrame::event(event)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(%connection, "Outbound queue full, event dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(%connection, "Session closing, event dropped");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanrelay_core::MrzRecord;

    fn terminal(id: &str) -> TerminalId {
        TerminalId::new(id).unwrap()
    }

    fn session(broker: &RelayBroker) -> (ConnectionId, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(SESSION_QUEUE_DEPTH);
        (broker.open_session(tx), rx)
    }

    fn events(rx: &mut mpsc::Receiver<ServerFrame>) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let ServerFrame::Event { event } = frame {
                out.push(event);
            }
        }
        out
    }

    fn register(broker: &RelayBroker, connection: ConnectionId) -> DeviceId {
        match broker.handle_request(
            connection,
            Request::RegisterDevice {
                name: "Desk".into(),
            },
        ) {
            Reply::DeviceRegistered { device_id } => device_id,
            other => panic!("unexpected reply {other:?}"),
        }
    }

    fn record(device_id: DeviceId, terminal_id: &str) -> RelayRecord {
        RelayRecord::new(
            device_id,
            terminal(terminal_id),
            MrzRecord {
                document_number: "L898902C3".into(),
                ..MrzRecord::default()
            },
        )
    }

    #[test]
    fn test_register_pushes_event() {
        let broker = RelayBroker::new();
        let (device_conn, mut device_rx) = session(&broker);
        let device_id = register(&broker, device_conn);

        assert_eq!(events(&mut device_rx), vec![Event::DeviceRegistered { device_id }]);
    }

    #[test]
    fn test_blank_name_gets_default() {
        let broker = RelayBroker::new();
        let (conn, _rx) = session(&broker);
        broker.handle_request(conn, Request::RegisterDevice { name: "  ".into() });
        let device = broker.registry().get_by_connection(conn).unwrap();
        assert_eq!(device.name, DEFAULT_DEVICE_NAME);
    }

    #[test]
    fn test_reserve_release_push_to_device() {
        let broker = RelayBroker::new();
        let (device_conn, mut device_rx) = session(&broker);
        let (terminal_conn, _terminal_rx) = session(&broker);
        let device_id = register(&broker, device_conn);
        events(&mut device_rx);

        let reply = broker.handle_request(
            terminal_conn,
            Request::Reserve {
                device_id,
                terminal_id: terminal("T1"),
            },
        );
        assert_eq!(reply, Reply::Reservation { accepted: true });

        let reply = broker.handle_request(
            terminal_conn,
            Request::Reserve {
                device_id,
                terminal_id: terminal("T2"),
            },
        );
        assert_eq!(reply, Reply::Reservation { accepted: false });

        let reply = broker.handle_request(
            terminal_conn,
            Request::Release {
                device_id,
                terminal_id: terminal("T1"),
            },
        );
        assert_eq!(reply, Reply::Release { accepted: true });

        assert_eq!(
            events(&mut device_rx),
            vec![
                Event::Reserved {
                    terminal_id: terminal("T1")
                },
                Event::Released
            ]
        );
    }

    #[test]
    fn test_relay_reaches_group_only_when_held() {
        let broker = RelayBroker::new();
        let (device_conn, _device_rx) = session(&broker);
        let (t1_conn, mut t1_rx) = session(&broker);
        let (t2_conn, mut t2_rx) = session(&broker);
        let device_id = register(&broker, device_conn);

        broker.handle_request(t1_conn, Request::JoinTerminal { terminal_id: terminal("T1") });
        broker.handle_request(t2_conn, Request::JoinTerminal { terminal_id: terminal("T2") });

        // Not reserved yet.
        assert_eq!(
            broker.relay_record(device_conn, record(device_id, "T1")),
            (SubmitOutcome::Dropped, 0)
        );

        assert!(broker.registry().reserve_device(device_id, &terminal("T1")));
        assert_eq!(
            broker.relay_record(device_conn, record(device_id, "T1")),
            (SubmitOutcome::Delivered, 1)
        );
        // Stamped with the wrong terminal.
        assert_eq!(
            broker.relay_record(device_conn, record(device_id, "T2")),
            (SubmitOutcome::Dropped, 0)
        );
        // Submitted from a connection that does not own the device.
        assert_eq!(
            broker.relay_record(t2_conn, record(device_id, "T1")),
            (SubmitOutcome::Dropped, 0)
        );

        let received = events(&mut t1_rx);
        assert_eq!(received.len(), 1);
        assert!(matches!(
            &received[0],
            Event::RecordReceived { record } if record.record.document_number == "L898902C3"
        ));
        assert!(events(&mut t2_rx).is_empty());
    }

    #[test]
    fn test_close_session_notifies_holder() {
        let broker = RelayBroker::new();
        let (device_conn, _device_rx) = session(&broker);
        let (terminal_conn, mut terminal_rx) = session(&broker);
        let device_id = register(&broker, device_conn);
        broker.handle_request(
            terminal_conn,
            Request::JoinTerminal {
                terminal_id: terminal("T1"),
            },
        );
        broker.registry().reserve_device(device_id, &terminal("T1"));

        let closed = broker.close_session(device_conn).unwrap();
        assert_eq!(closed.released_from, Some(terminal("T1")));
        assert_eq!(
            events(&mut terminal_rx),
            vec![Event::DeviceDisconnected { device_id }]
        );
        assert!(broker.close_session(device_conn).is_none());

        // Another terminal can now take it.
        assert!(broker.registry().reserve_device(device_id, &terminal("T2")));
    }

    #[test]
    fn test_leave_and_close_remove_group_membership() {
        let broker = RelayBroker::new();
        let (device_conn, _device_rx) = session(&broker);
        let (terminal_conn, mut terminal_rx) = session(&broker);
        let device_id = register(&broker, device_conn);
        broker.registry().reserve_device(device_id, &terminal("T1"));

        broker.handle_request(terminal_conn, Request::JoinTerminal { terminal_id: terminal("T1") });
        broker.handle_request(terminal_conn, Request::LeaveTerminal { terminal_id: terminal("T1") });
        assert_eq!(
            broker.relay_record(device_conn, record(device_id, "T1")),
            (SubmitOutcome::Delivered, 0)
        );
        assert!(events(&mut terminal_rx).is_empty());

        broker.handle_request(terminal_conn, Request::JoinTerminal { terminal_id: terminal("T1") });
        broker.close_session(terminal_conn);
        assert_eq!(broker.session_count(), 1);
        assert_eq!(
            broker.relay_record(device_conn, record(device_id, "T1")),
            (SubmitOutcome::Delivered, 0)
        );
    }

    #[test]
    fn test_wakeup_requires_holder() {
        let broker = RelayBroker::new();
        let (device_conn, mut device_rx) = session(&broker);
        let (terminal_conn, _terminal_rx) = session(&broker);
        let device_id = register(&broker, device_conn);
        events(&mut device_rx);

        let refused = broker.handle_request(
            terminal_conn,
            Request::Wakeup {
                device_id,
                terminal_id: terminal("T1"),
            },
        );
        assert!(matches!(refused, Reply::Error { .. }));

        broker.registry().reserve_device(device_id, &terminal("T1"));
        assert!(broker.wakeup(device_id, &terminal("T1")));
        assert!(!broker.wakeup(device_id, &terminal("T2")));
        assert_eq!(events(&mut device_rx), vec![Event::Wakeup]);

        broker.close_session(device_conn);
        broker.registry().reserve_device(device_id, &terminal("T1"));
        assert!(!broker.wakeup(device_id, &terminal("T1")));
    }

    #[test]
    fn test_listing_and_lookup() {
        let broker = RelayBroker::new();
        let (a, _a_rx) = session(&broker);
        let (b, _b_rx) = session(&broker);
        let first = register(&broker, a);
        register(&broker, b);
        broker.registry().reserve_device(first, &terminal("T1"));

        match broker.handle_request(a, Request::ListDevices { available_only: true }) {
            Reply::Devices { devices } => {
                assert_eq!(devices.len(), 1);
                assert_ne!(devices[0].id, first);
            }
            other => panic!("unexpected reply {other:?}"),
        }
        match broker.handle_request(a, Request::GetDevice { device_id: first }) {
            Reply::Device { device: Some(info) } => {
                assert_eq!(info.reserved_by, Some(terminal("T1")));
            }
            other => panic!("unexpected reply {other:?}"),
        }
        assert_eq!(
            broker.handle_request(
                a,
                Request::GetDevice {
                    device_id: DeviceId::generate()
                }
            ),
            Reply::Device { device: None }
        );
    }

    #[test]
    fn test_full_queue_drops_event() {
        let broker = RelayBroker::new();
        let (tx, _rx) = mpsc::channel(1);
        let conn = broker.open_session(tx);
        register(&broker, conn);
        // Queue already holds the DeviceRegistered push.
        assert!(!broker.push(conn, Event::Wakeup));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_idle_devices() {
        let broker = Arc::new(RelayBroker::new());
        let (device_conn, _device_rx) = session(&broker);
        let (terminal_conn, mut terminal_rx) = session(&broker);
        let device_id = register(&broker, device_conn);
        broker.handle_request(terminal_conn, Request::JoinTerminal { terminal_id: terminal("T1") });
        broker.registry().reserve_device(device_id, &terminal("T1"));

        let cancel = CancellationToken::new();
        let sweeper =
            broker.spawn_sweeper(Duration::from_secs(60), Duration::ZERO, cancel.clone());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(broker.registry().is_empty());
        assert_eq!(
            events(&mut terminal_rx),
            vec![Event::DeviceDisconnected { device_id }]
        );

        cancel.cancel();
        sweeper.await.unwrap();
    }
}
