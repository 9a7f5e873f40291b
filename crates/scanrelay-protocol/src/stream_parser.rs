//! Stream parser for STX/ETX framed relay messages.
//!
//! TCP has no message boundaries: one read may hold part of a frame, several
//! frames, or noise. [`StreamParser`] buffers incoming bytes and extracts
//! complete payloads with a two-state machine.
//!
//! ```text
//! STX  <UTF-8 JSON>  ETX
//! 0x02 {"id":1,...}  0x03
//! ```
//!
//! ```
//! use scanrelay_protocol::StreamParser;
//!
//! let mut parser = StreamParser::new();
//! parser.feed(&[0x02, b'{']);
//! parser.feed(b"\"id\":7");
//! parser.feed(&[b'}', 0x03]);
//!
//! let frame = parser.next_frame().unwrap();
//! assert_eq!(frame.to_string().unwrap(), "{\"id\":7}");
//! ```

use bytes::BytesMut;
use scanrelay_core::constants::{DEFAULT_MAX_FRAME_SIZE, END_BYTE, START_BYTE};
use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::frame::Frame;

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;
const INITIAL_PAYLOAD_CAPACITY: usize = 1024;
const INITIAL_FRAME_QUEUE_CAPACITY: usize = 4;

/// Parser state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Scanning for STX. Bytes before it are discarded.
    WaitingStart,

    /// Accumulating payload until ETX.
    ReadingPayload,
}

/// Stateful parser for framed relay messages.
///
/// ```text
/// ┌─────────────┐  STX   ┌───────────────┐  ETX   ┌─────────────┐
/// │WaitingStart │───────>│ReadingPayload │───────>│Frame queued │
/// └─────────────┘        └───────────────┘        └─────────────┘
///       ^                        │ payload > max_payload      │
///       └────────────────────────┴────────────────────────────┘
/// ```
///
/// Payloads that are not valid UTF-8 are dropped. A payload that grows past
/// the limit without an ETX resets the parser.
#[derive(Debug)]
pub struct StreamParser {
    buffer: BytesMut,
    state: ParserState,
    payload: Vec<u8>,
    frames: VecDeque<Frame>,
    max_payload: usize,
    oversized_dropped: u64,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a parser that drops payloads longer than `max_payload` bytes.
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            state: ParserState::WaitingStart,
            payload: Vec::with_capacity(INITIAL_PAYLOAD_CAPACITY),
            frames: VecDeque::with_capacity(INITIAL_FRAME_QUEUE_CAPACITY),
            max_payload,
            oversized_dropped: 0,
        }
    }

    /// Feed bytes read from the stream.
    ///
    /// Every frame completed by these bytes is queued.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
        while self.try_extract_frame() {}
    }

    /// Pop the next complete frame.
    pub fn next_frame(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn frames_available(&self) -> usize {
        self.frames.len()
    }

    /// Number of partial payloads discarded for exceeding the limit.
    pub fn oversized_dropped(&self) -> u64 {
        self.oversized_dropped
    }

    /// Discard buffered bytes, partial payload and queued frames.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.payload.clear();
        self.frames.clear();
        self.state = ParserState::WaitingStart;
    }

    /// Iterate over the frames queued so far.
    ///
    /// ```
    /// use scanrelay_protocol::StreamParser;
    ///
    /// let mut parser = StreamParser::new();
    /// parser.feed(b"\x02{\"a\":1}\x03\x02{\"b\":2}\x03");
    /// assert_eq!(parser.drain_frames().count(), 2);
    /// ```
    pub fn drain_frames(&mut self) -> DrainFrames<'_> {
        DrainFrames { parser: self }
    }

    /// Returns `true` if a frame was queued.
    fn try_extract_frame(&mut self) -> bool {
        loop {
            match self.state {
                ParserState::WaitingStart => {
                    let Some(stx_pos) = self.buffer.iter().position(|&b| b == START_BYTE) else {
                        if !self.buffer.is_empty() {
                            debug!(bytes = self.buffer.len(), "Discarding bytes outside a frame");
                        }
                        self.buffer.clear();
                        return false;
                    };
                    if stx_pos > 0 {
                        debug!(bytes = stx_pos, "Discarding bytes before STX");
                    }
                    // Skip noise and the STX itself.
                    let _ = self.buffer.split_to(stx_pos + 1);
                    self.payload.clear();
                    self.state = ParserState::ReadingPayload;
                }
                ParserState::ReadingPayload => return self.handle_reading_payload(),
            }
        }
    }

    fn handle_reading_payload(&mut self) -> bool {
        match self.buffer.iter().position(|&b| b == END_BYTE) {
            Some(etx_pos) => {
                let bytes = self.buffer.split_to(etx_pos);
                let _ = self.buffer.split_to(1);
                self.payload.extend_from_slice(&bytes);

                if self.payload.len() > self.max_payload {
                    self.oversized_dropped += 1;
                    warn!(
                        size = self.payload.len(),
                        max_size = self.max_payload,
                        "Dropping oversized frame"
                    );
                } else if std::str::from_utf8(&self.payload).is_ok() {
                    self.frames.push_back(Frame::from_bytes(&self.payload));
                } else {
                    warn!(size = self.payload.len(), "Dropping frame with invalid UTF-8");
                }

                self.state = ParserState::WaitingStart;
                self.payload.clear();
                true
            }
            None => {
                self.payload.extend_from_slice(&self.buffer);
                self.buffer.clear();
                if self.payload.len() > self.max_payload {
                    self.oversized_dropped += 1;
                    warn!(max_size = self.max_payload, "Frame exceeds limit before ETX, resetting");
                    self.payload.clear();
                    self.state = ParserState::WaitingStart;
                }
                false
            }
        }
    }
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator returned by [`StreamParser::drain_frames`].
pub struct DrainFrames<'a> {
    parser: &'a mut StreamParser,
}

impl Iterator for DrainFrames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Self::Item> {
        self.parser.next_frame()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.parser.frames_available();
        (len, Some(len))
    }
}

impl ExactSizeIterator for DrainFrames<'_> {}
