//! Relay protocol between the broker, device agents and terminals.
//!
//! One JSON document per STX/ETX frame; see [`message`] for the shapes.

pub mod codec;
pub mod frame;
pub mod message;
pub mod stream_parser;

pub use codec::{ClientCodec, RelayCodec, ServerCodec};
pub use frame::Frame;
pub use message::{ClientFrame, DeviceInfo, Event, Reply, Request, ServerFrame, SubmitOutcome};
pub use stream_parser::{DrainFrames, ParserState, StreamParser};
