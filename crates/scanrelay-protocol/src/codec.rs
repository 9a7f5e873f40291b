//! Tokio codec for the relay protocol.
//!
//! [`RelayCodec`] wraps the [`StreamParser`] and moves one JSON document per
//! STX/ETX frame. It is generic over the decoded and encoded message types so
//! the same framing serves both ends of a connection:
//!
//! ```text
//! server:  Framed<TcpStream, ServerCodec>   decodes ClientFrame, encodes ServerFrame
//! client:  Framed<TcpStream, ClientCodec>   decodes ServerFrame, encodes ClientFrame
//! ```
//!
//! ```rust,no_run
//! use futures::{SinkExt, StreamExt};
//! use scanrelay_protocol::{ClientCodec, ClientFrame, Request};
//! use tokio::net::TcpStream;
//! use tokio_util::codec::Framed;
//!
//! # async fn example() -> scanrelay_core::Result<()> {
//! let stream = TcpStream::connect("127.0.0.1:5050").await?;
//! let mut framed = Framed::new(stream, ClientCodec::new());
//!
//! framed.send(ClientFrame::new(1, Request::Heartbeat)).await?;
//! if let Some(Ok(frame)) = framed.next().await {
//!     println!("{frame:?}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Decoding fails on frames that exceed the size limit or do not hold the
//! expected JSON shape. Callers treat a decode error as a protocol violation
//! and drop the connection.

use bytes::BytesMut;
use scanrelay_core::constants::DEFAULT_MAX_FRAME_SIZE;
use scanrelay_core::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder};

use crate::message::{ClientFrame, ServerFrame};
use crate::{Frame, StreamParser};

/// Codec used by the relay server.
pub type ServerCodec = RelayCodec<ClientFrame, ServerFrame>;

/// Codec used by relay clients.
pub type ClientCodec = RelayCodec<ServerFrame, ClientFrame>;

/// STX/ETX + JSON codec decoding `In` and encoding `Out`.
#[derive(Debug)]
pub struct RelayCodec<In, Out> {
    parser: StreamParser,
    max_frame_size: usize,
    oversized_seen: u64,
    _marker: PhantomData<fn(Out) -> In>,
}

impl<In, Out> RelayCodec<In, Out> {
    /// Create a codec with the default 64 KiB frame limit.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            parser: StreamParser::with_max_payload(max_frame_size),
            max_frame_size,
            oversized_seen: 0,
            _marker: PhantomData,
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl<In, Out> Default for RelayCodec<In, Out> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In: DeserializeOwned, Out> Decoder for RelayCodec<In, Out> {
    type Item = In;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<In>> {
        if !src.is_empty() {
            // The parser now owns these bytes.
            self.parser.feed(src);
            src.clear();
        }

        if self.parser.oversized_dropped() > self.oversized_seen {
            self.oversized_seen = self.parser.oversized_dropped();
            return Err(Error::FrameTooLarge {
                size: self.max_frame_size + 1,
                max_size: self.max_frame_size,
            });
        }

        match self.parser.next_frame() {
            Some(frame) => serde_json::from_slice(frame.as_bytes())
                .map(Some)
                .map_err(|e| Error::InvalidMessageFormat(format!("Invalid relay frame: {e}"))),
            None => Ok(None),
        }
    }
}

impl<In, Out: Serialize> Encoder<Out> for RelayCodec<In, Out> {
    type Error = Error;

    fn encode(&mut self, item: Out, dst: &mut BytesMut) -> Result<()> {
        let json = serde_json::to_vec(&item)
            .map_err(|e| Error::InvalidMessageFormat(format!("Unserializable frame: {e}")))?;

        if json.len() > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                size: json.len(),
                max_size: self.max_frame_size,
            });
        }

        let frame = Frame::new(json.into());
        dst.extend_from_slice(&frame.with_framing());
        Ok(())
    }
}
