//! Network side of the scanrelay system.
//!
//! - [`DeviceRegistry`]: registered readers and their reservations.
//! - [`RelayBroker`]: answers requests, routes records to terminal groups.
//! - [`RelayServer`]: TCP front end for the broker.
//! - [`RelayClient`]: request/reply client with a push channel, used by
//!   terminals and by [`DeviceAgent`].
//! - [`DeviceAgent`]: keeps a reader registered and forwards its records.
//!
//! All traffic uses the STX/JSON/ETX framing from `scanrelay-protocol`.

pub mod agent;
pub mod broker;
pub mod client;
pub mod config;
pub mod error;
pub mod registry;
pub mod server;

pub use agent::{DeviceAgent, ScanRequest};
pub use broker::RelayBroker;
pub use client::{RelayClient, RelayClientConfig, SubmitReceipt};
pub use config::{AgentSettings, BrokerSettings};
pub use error::{ClientError, ServerError};
pub use registry::{ClosedDevice, Device, DeviceRegistry};
pub use server::RelayServer;
