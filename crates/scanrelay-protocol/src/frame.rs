use bytes::{BufMut, Bytes, BytesMut};
use scanrelay_core::{Error, Result, constants::*};
use std::fmt;

/// Raw bytes of one relay message as they appear between STX and ETX.
///
/// A frame is payload-agnostic; the codec puts one JSON document in each.
///
/// ```
/// use scanrelay_protocol::Frame;
///
/// let frame = Frame::from_string(r#"{"id":1}"#);
/// let wire = frame.with_framing();
/// assert_eq!(wire[0], 0x02);
/// assert_eq!(wire[wire.len() - 1], 0x03);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Bytes,
}

impl Frame {
    pub fn new(payload: Bytes) -> Self {
        Frame { payload }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(bytes))
    }

    pub fn from_string(s: &str) -> Self {
        Self::from_bytes(s.as_bytes())
    }

    /// Payload bytes, without framing.
    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Size on the wire including STX and ETX.
    pub fn framed_size(&self) -> usize {
        self.payload.len() + FRAME_OVERHEAD
    }

    /// Wrap the payload in STX/ETX for transmission.
    pub fn with_framing(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.framed_size());
        buf.put_u8(START_BYTE);
        buf.put_slice(&self.payload);
        buf.put_u8(END_BYTE);
        buf.freeze()
    }

    /// Decode the payload as UTF-8.
    ///
    /// # Errors
    /// Returns `Error::InvalidMessageFormat` if the payload is not UTF-8.
    pub fn to_string(&self) -> Result<String> {
        std::str::from_utf8(&self.payload)
            .map(str::to_owned)
            .map_err(|e| Error::InvalidMessageFormat(format!("Invalid UTF-8: {e}")))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.payload))
    }
}
