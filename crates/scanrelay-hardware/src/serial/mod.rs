//! Serial/COM reader backend.

pub mod packet;
#[cfg(feature = "hardware-serial")]
pub mod port;
pub mod reader;

pub use packet::{PacketAssembler, SerialPacket, command};
#[cfg(feature = "hardware-serial")]
pub use port::SystemSerialConnector;
pub use reader::{SerialReader, SerialSettings};
