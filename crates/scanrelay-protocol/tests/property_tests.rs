//! Property-based tests for relay framing.

use bytes::BytesMut;
use proptest::prelude::*;
use scanrelay_core::TerminalId;
use scanrelay_protocol::{ClientCodec, ClientFrame, Request, ServerCodec, StreamParser};
use tokio_util::codec::{Decoder, Encoder};

/// Terminal identifiers: any printable text with at least one visible char.
fn valid_terminal_id() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z0-9][A-Za-z0-9 _.:-]{0,30}")
        .expect("terminal id regex")
}

/// Device names, including non-ASCII and control characters.
fn device_name() -> impl Strategy<Value = String> {
    any::<String>()
}

fn encode(frame: ClientFrame) -> BytesMut {
    let mut codec = ClientCodec::new();
    let mut buf = BytesMut::new();
    codec.encode(frame, &mut buf).unwrap();
    buf
}

proptest! {
    /// JSON escaping keeps STX/ETX out of any payload, so any name survives.
    #[test]
    fn prop_register_name_survives_framing(id in any::<u64>(), name in device_name()) {
        let mut buf = encode(ClientFrame::new(id, Request::RegisterDevice { name: name.clone() }));

        let inner = &buf[1..buf.len() - 1];
        prop_assert!(!inner.contains(&0x02));
        prop_assert!(!inner.contains(&0x03));

        let mut codec = ServerCodec::new();
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        prop_assert_eq!(frame.id, id);
        prop_assert_eq!(frame.request, Request::RegisterDevice { name });
    }

    /// Splitting the byte stream at any point yields the same frame.
    #[test]
    fn prop_split_point_does_not_matter(terminal in valid_terminal_id(), split in 0usize..64) {
        let terminal_id = TerminalId::new(terminal).unwrap();
        let expected = ClientFrame::new(7, Request::JoinTerminal { terminal_id });
        let bytes = encode(expected.clone());
        let split = split.min(bytes.len());

        let mut codec = ServerCodec::new();
        let mut buf = BytesMut::from(&bytes[..split]);
        let first = codec.decode(&mut buf).unwrap();

        let decoded = match first {
            Some(frame) => frame,
            None => {
                buf.extend_from_slice(&bytes[split..]);
                codec.decode(&mut buf).unwrap().unwrap()
            }
        };
        prop_assert_eq!(decoded, expected);
    }

    /// Arbitrary bytes never panic the stream parser.
    #[test]
    fn prop_parser_never_panics(chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..256), 0..16)) {
        let mut parser = StreamParser::with_max_payload(512);
        for chunk in &chunks {
            parser.feed(chunk);
        }
        for frame in parser.drain_frames() {
            prop_assert!(frame.size() <= 512);
            prop_assert!(frame.to_string().is_ok());
        }
    }
}
