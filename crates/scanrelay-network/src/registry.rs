//! Registered readers and who holds them.
//!
//! A device can be reserved by at most one terminal. Every state change
//! happens under the device's map entry lock, so two terminals racing for the
//! same reader see exactly one success.
//!
//! Devices are keyed by their durable id; a second index maps the owning
//! connection to its device. Lock order is connection index first, then
//! device map, and neither is held across an `.await`.

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use scanrelay_core::{ConnectionId, DeviceId, TerminalId};
use scanrelay_protocol::DeviceInfo;
use std::time::Duration;
use tracing::{debug, info};

/// A registered reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub available: bool,
    pub reserved_by: Option<TerminalId>,
    pub last_seen: DateTime<Utc>,
    /// `None` once the owning connection has closed.
    pub connection: Option<ConnectionId>,
}

impl Device {
    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            id: self.id,
            name: self.name.clone(),
            available: self.available,
            reserved_by: self.reserved_by.clone(),
            last_seen: self.last_seen,
        }
    }
}

/// What [`DeviceRegistry::on_connection_closed`] released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedDevice {
    pub device_id: DeviceId,
    /// Terminal that held the device when its connection dropped.
    pub released_from: Option<TerminalId>,
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: DashMap<DeviceId, Device>,
    by_connection: DashMap<ConnectionId, DeviceId>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the reader behind `connection`.
    ///
    /// A connection that registers again keeps its device id and any
    /// reservation on it; a new connection always gets a fresh id.
    pub fn register_device(&self, name: &str, connection: ConnectionId) -> Device {
        let now = Utc::now();
        match self.by_connection.entry(connection) {
            Entry::Occupied(mut entry) => {
                if let Some(mut device) = self.devices.get_mut(entry.get()) {
                    device.name = name.to_string();
                    device.available = device.reserved_by.is_none();
                    device.last_seen = now;
                    debug!(
                        device_id = %device.id,
                        %connection,
                        reserved_by = ?device.reserved_by,
                        "Device re-registered"
                    );
                    return device.clone();
                }
                // Swept while the connection stayed open.
                let device = Self::new_device(name, connection, now);
                entry.insert(device.id);
                self.devices.insert(device.id, device.clone());
                info!(device_id = %device.id, %connection, name, "Device registered");
                device
            }
            Entry::Vacant(entry) => {
                let device = Self::new_device(name, connection, now);
                entry.insert(device.id);
                self.devices.insert(device.id, device.clone());
                info!(device_id = %device.id, %connection, name, "Device registered");
                device
            }
        }
    }

    fn new_device(name: &str, connection: ConnectionId, now: DateTime<Utc>) -> Device {
        Device {
            id: DeviceId::generate(),
            name: name.to_string(),
            available: true,
            reserved_by: None,
            last_seen: now,
            connection: Some(connection),
        }
    }

    /// Reserve `device_id` for `terminal_id` if it is free.
    pub fn reserve_device(&self, device_id: DeviceId, terminal_id: &TerminalId) -> bool {
        let Some(mut device) = self.devices.get_mut(&device_id) else {
            info!(%device_id, %terminal_id, "Reservation refused: unknown device");
            return false;
        };
        if !device.available {
            info!(
                %device_id,
                %terminal_id,
                held_by = ?device.reserved_by.as_ref().map(TerminalId::as_str),
                "Reservation refused: device busy"
            );
            return false;
        }
        device.available = false;
        device.reserved_by = Some(terminal_id.clone());
        device.last_seen = Utc::now();
        info!(%device_id, %terminal_id, "Device reserved");
        true
    }

    /// Release `device_id` if `terminal_id` holds it.
    pub fn release_device(&self, device_id: DeviceId, terminal_id: &TerminalId) -> bool {
        let Some(mut device) = self.devices.get_mut(&device_id) else {
            info!(%device_id, %terminal_id, "Release refused: unknown device");
            return false;
        };
        if device.reserved_by.as_ref() != Some(terminal_id) {
            info!(%device_id, %terminal_id, "Release refused: not the holder");
            return false;
        }
        device.available = true;
        device.reserved_by = None;
        device.last_seen = Utc::now();
        info!(%device_id, %terminal_id, "Device released");
        true
    }

    /// Free the device owned by a closed connection.
    ///
    /// The entry stays registered, without a connection, until it is swept.
    pub fn on_connection_closed(&self, connection: ConnectionId) -> Option<ClosedDevice> {
        let (_, device_id) = self.by_connection.remove(&connection)?;
        let mut device = self.devices.get_mut(&device_id)?;

        let released_from = device.reserved_by.take();
        device.available = true;
        device.connection = None;
        match &released_from {
            Some(terminal_id) => {
                info!(%device_id, %terminal_id, %connection, "Forced release on disconnect")
            }
            None => debug!(%device_id, %connection, "Device connection closed"),
        }

        Some(ClosedDevice {
            device_id,
            released_from,
        })
    }

    /// Remove devices not seen for longer than `timeout`.
    pub fn sweep_inactive(&self, timeout: Duration) -> Vec<Device> {
        let timeout = TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(timeout)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.sweep_seen_before(cutoff)
    }

    /// Remove devices last seen before `cutoff`.
    pub fn sweep_seen_before(&self, cutoff: DateTime<Utc>) -> Vec<Device> {
        let mut removed = Vec::new();
        self.devices.retain(|_, device| {
            if device.last_seen < cutoff {
                removed.push(device.clone());
                false
            } else {
                true
            }
        });

        for device in &removed {
            if let Some(connection) = device.connection {
                self.by_connection
                    .remove_if(&connection, |_, owned| *owned == device.id);
            }
            info!(
                device_id = %device.id,
                name = %device.name,
                last_seen = %device.last_seen,
                "Inactive device removed"
            );
        }
        removed
    }

    /// Refresh last-seen for the device owned by `connection`.
    pub fn touch(&self, connection: ConnectionId) -> bool {
        let Some(device_id) = self.by_connection.get(&connection).map(|id| *id) else {
            return false;
        };
        match self.devices.get_mut(&device_id) {
            Some(mut device) => {
                device.last_seen = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn get_all(&self) -> Vec<Device> {
        self.devices.iter().map(|d| d.value().clone()).collect()
    }

    pub fn get_available(&self) -> Vec<Device> {
        self.devices
            .iter()
            .filter(|d| d.available)
            .map(|d| d.value().clone())
            .collect()
    }

    pub fn get(&self, device_id: DeviceId) -> Option<Device> {
        self.devices.get(&device_id).map(|d| d.value().clone())
    }

    pub fn get_by_connection(&self, connection: ConnectionId) -> Option<Device> {
        let device_id = *self.by_connection.get(&connection)?;
        self.get(device_id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
