//! Incremental frame decoding.
//!
//! The parser accepts bytes in arbitrarily sized chunks and emits a frame as
//! soon as its last byte arrives. Fragmented data messages are buffered until
//! the final continuation frame and handed out as one [`Frame`]. Control
//! frames may be interleaved with the fragments of a data message.

use bytes::{Buf, BytesMut};

use crate::{
    close::CloseInfo,
    errors::{ProtocolError, Result},
    flags::FrameFlags,
    frame::{Frame, FrameBody},
    generator::MAX_CONTROL_PAYLOAD,
    mask::{MaskKey, apply_mask},
    opcodes::Opcode,
    policy::{Behavior, WebSocketPolicy},
};

const MASK_BIT: u8 = 0b1000_0000;
const LENGTH_MASK: u8 = 0b0111_1111;
const OPCODE_MASK: u8 = 0b0000_1111;

#[derive(Debug, Clone, Copy)]
struct Header {
    flags: FrameFlags,
    opcode: Opcode,
    mask: Option<MaskKey>,
    header_len: usize,
    payload_len: usize,
}

#[derive(Debug)]
struct Fragment {
    opcode: Opcode,
    data: BytesMut,
}

/// Decodes wire bytes into frames.
#[derive(Debug)]
pub struct Parser {
    policy: WebSocketPolicy,
    buffer: BytesMut,
    fragment: Option<Fragment>,
}

impl Parser {
    /// Create a parser enforcing `policy`.
    pub fn new(policy: WebSocketPolicy) -> Self {
        Self { policy, buffer: BytesMut::new(), fragment: None }
    }

    /// Policy this parser enforces
    pub fn policy(&self) -> &WebSocketPolicy {
        &self.policy
    }

    /// Bytes received but not yet part of a complete frame
    pub fn buffered(&self) -> usize {
        self.buffer.len() + self.fragment.as_ref().map_or(0, |f| f.data.len())
    }

    /// Feed `data` and append every completed frame to `frames`.
    ///
    /// Frames completed before an error are still appended. After an error
    /// the parser discards its buffered state; the connection is expected to
    /// close.
    pub fn parse(&mut self, data: &[u8], frames: &mut Vec<Frame>) -> Result<()> {
        self.buffer.extend_from_slice(data);
        let result = self.drain(frames);
        if result.is_err() {
            self.buffer.clear();
            self.fragment = None;
        }
        result
    }

    fn drain(&mut self, frames: &mut Vec<Frame>) -> Result<()> {
        while let Some(header) = self.parse_header()? {
            let frame_len = header.header_len + header.payload_len;
            if self.buffer.len() < frame_len {
                break;
            }

            self.buffer.advance(header.header_len);
            let mut payload = self.buffer.split_to(header.payload_len);
            if let Some(key) = header.mask {
                apply_mask(&mut payload, key);
            }

            if let Some(frame) = self.on_frame(header, payload)? {
                frames.push(frame);
            }
        }
        Ok(())
    }

    /// Decode the header at the front of the buffer without consuming it.
    ///
    /// Returns `None` until the whole header has arrived. Every limit that
    /// can be checked from the header alone is checked here, before the
    /// payload is buffered.
    fn parse_header(&self) -> Result<Option<Header>> {
        let [first, second, ..] = self.buffer[..] else {
            return Ok(None);
        };

        let flags = FrameFlags::from_header_byte(first);
        if flags.has_reserved() {
            return Err(ProtocolError::ReservedBitsSet(flags.intersection(FrameFlags::RESERVED).bits()));
        }
        let opcode = Opcode::from_u8(first & OPCODE_MASK)?;

        let masked = second & MASK_BIT != 0;
        match (self.policy.behavior, masked) {
            (Behavior::Server, false) => return Err(ProtocolError::UnmaskedClientFrame),
            (Behavior::Client, true) => return Err(ProtocolError::MaskedServerFrame),
            _ => {},
        }

        let (length_bytes, short_len) = match second & LENGTH_MASK {
            126 => (2, None),
            127 => (8, None),
            len => (0, Some(u64::from(len))),
        };
        let header_len = 2 + length_bytes + if masked { 4 } else { 0 };
        if self.buffer.len() < header_len {
            return Ok(None);
        }

        let mut cursor = &self.buffer[2..header_len];
        let payload_len = match short_len {
            Some(len) => len,
            None if length_bytes == 2 => u64::from(cursor.get_u16()),
            None => {
                let len = cursor.get_u64();
                if len & (1 << 63) != 0 {
                    return Err(ProtocolError::InvalidPayloadLength);
                }
                len
            },
        };
        let mask = masked.then(|| {
            let mut key = [0u8; 4];
            cursor.copy_to_slice(&mut key);
            key
        });

        self.check_limits(flags, opcode, payload_len)?;

        Ok(Some(Header { flags, opcode, mask, header_len, payload_len: payload_len as usize }))
    }

    fn check_limits(&self, flags: FrameFlags, opcode: Opcode, payload_len: u64) -> Result<()> {
        if opcode.is_control() {
            if !flags.is_final() {
                return Err(ProtocolError::FragmentedControlFrame(opcode));
            }
            if payload_len > MAX_CONTROL_PAYLOAD as u64 {
                return Err(ProtocolError::ControlFrameTooLarge { opcode, size: payload_len });
            }
            return Ok(());
        }

        let (message_opcode, buffered) = match (opcode, &self.fragment) {
            (Opcode::Continuation, None) => return Err(ProtocolError::UnexpectedContinuation),
            (Opcode::Continuation, Some(fragment)) => (fragment.opcode, fragment.data.len()),
            (_, Some(_)) => return Err(ProtocolError::ExpectedContinuation(opcode)),
            (_, None) => (opcode, 0),
        };
        let limit = match message_opcode {
            Opcode::Text => self.policy.max_text_message_size,
            _ => self.policy.max_binary_message_size,
        };
        let size = buffered as u64 + payload_len;
        if size > limit as u64 {
            return Err(ProtocolError::MessageTooLarge { size, limit });
        }
        Ok(())
    }

    fn on_frame(&mut self, header: Header, payload: BytesMut) -> Result<Option<Frame>> {
        let mask = header.mask;
        let body = match header.opcode {
            Opcode::Ping => FrameBody::Ping(payload.freeze()),
            Opcode::Pong => FrameBody::Pong(payload.freeze()),
            Opcode::Close => FrameBody::Close(CloseInfo::from_payload(&payload)?),
            Opcode::Text | Opcode::Binary if header.flags.is_final() => {
                message_body(header.opcode, payload)?
            },
            Opcode::Text | Opcode::Binary => {
                self.fragment = Some(Fragment { opcode: header.opcode, data: payload });
                return Ok(None);
            },
            Opcode::Continuation => {
                let Some(fragment) = self.fragment.as_mut() else {
                    return Err(ProtocolError::UnexpectedContinuation);
                };
                fragment.data.extend_from_slice(&payload);
                if !header.flags.is_final() {
                    return Ok(None);
                }
                let Some(Fragment { opcode, data }) = self.fragment.take() else {
                    return Err(ProtocolError::UnexpectedContinuation);
                };
                message_body(opcode, data)?
            },
        };
        Ok(Some(Frame { body, mask }))
    }
}

fn message_body(opcode: Opcode, payload: BytesMut) -> Result<FrameBody> {
    if opcode == Opcode::Text {
        let text = String::from_utf8(payload.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)?;
        Ok(FrameBody::Text(text))
    } else {
        Ok(FrameBody::Binary(payload.freeze()))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use hex_literal::hex;
    use proptest::prelude::*;

    use super::*;
    use crate::{close::StatusCode, generator::Generator};

    fn parse_all(parser: &mut Parser, data: &[u8]) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        parser.parse(data, &mut frames)?;
        Ok(frames)
    }

    fn encode(frame: &Frame) -> Vec<u8> {
        let mut buf = BytesMut::new();
        Generator::new().generate_whole_frame(frame, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn client_reads_unmasked_text() {
        let mut parser = Parser::new(WebSocketPolicy::client());
        let frames = parse_all(&mut parser, &hex!("81 05 48 65 6c 6c 6f")).unwrap();
        assert_eq!(frames, vec![Frame::text("Hello")]);
    }

    #[test]
    fn server_reads_masked_text() {
        let mut parser = Parser::new(WebSocketPolicy::server());
        let frames =
            parse_all(&mut parser, &hex!("81 85 37 fa 21 3d 7f 9f 4d 51 58")).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].body, FrameBody::Text("Hello".into()));
        assert_eq!(frames[0].mask, Some(hex!("37 fa 21 3d")));
    }

    #[test]
    fn rfc_fragmented_text() {
        let mut parser = Parser::new(WebSocketPolicy::client());
        let frames = parse_all(&mut parser, &hex!("01 03 48 65 6c 80 02 6c 6f")).unwrap();
        assert_eq!(frames, vec![Frame::text("Hello")]);
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn control_frame_between_fragments() {
        let mut parser = Parser::new(WebSocketPolicy::client());
        let mut bytes = hex!("01 03 48 65 6c").to_vec();
        bytes.extend_from_slice(&hex!("89 00"));
        bytes.extend_from_slice(&hex!("80 02 6c 6f"));
        let frames = parse_all(&mut parser, &bytes).unwrap();
        assert_eq!(frames, vec![Frame::ping(Bytes::new()), Frame::text("Hello")]);
    }

    #[test]
    fn partial_input_waits_for_more() {
        let mut parser = Parser::new(WebSocketPolicy::client());
        let bytes = encode(&Frame::binary(vec![7u8; 300]));
        assert!(parse_all(&mut parser, &bytes[..1]).unwrap().is_empty());
        assert!(parse_all(&mut parser, &bytes[1..3]).unwrap().is_empty());
        assert!(parse_all(&mut parser, &bytes[3..200]).unwrap().is_empty());
        let frames = parse_all(&mut parser, &bytes[200..]).unwrap();
        assert_eq!(frames, vec![Frame::binary(vec![7u8; 300])]);
    }

    #[test]
    fn server_rejects_unmasked_frame() {
        let mut parser = Parser::new(WebSocketPolicy::server());
        let err = parse_all(&mut parser, &hex!("81 05 48 65 6c 6c 6f")).unwrap_err();
        assert_eq!(err, ProtocolError::UnmaskedClientFrame);
    }

    #[test]
    fn client_rejects_masked_frame() {
        let mut parser = Parser::new(WebSocketPolicy::client());
        let err = parse_all(&mut parser, &hex!("81 85 37 fa 21 3d 7f 9f 4d 51 58")).unwrap_err();
        assert_eq!(err, ProtocolError::MaskedServerFrame);
    }

    #[test]
    fn reserved_bits_rejected() {
        let mut parser = Parser::new(WebSocketPolicy::client());
        let err = parse_all(&mut parser, &hex!("c1 00")).unwrap_err();
        assert_eq!(err, ProtocolError::ReservedBitsSet(0x40));
    }

    #[test]
    fn fragmented_ping_rejected() {
        let mut parser = Parser::new(WebSocketPolicy::client());
        let err = parse_all(&mut parser, &hex!("09 00")).unwrap_err();
        assert_eq!(err, ProtocolError::FragmentedControlFrame(Opcode::Ping));
    }

    #[test]
    fn oversized_control_rejected_from_header() {
        let mut parser = Parser::new(WebSocketPolicy::client());
        let err = parse_all(&mut parser, &hex!("89 7e 00 7e")).unwrap_err();
        assert_eq!(err, ProtocolError::ControlFrameTooLarge { opcode: Opcode::Ping, size: 126 });
    }

    #[test]
    fn orphan_continuation_rejected() {
        let mut parser = Parser::new(WebSocketPolicy::client());
        let err = parse_all(&mut parser, &hex!("80 00")).unwrap_err();
        assert_eq!(err, ProtocolError::UnexpectedContinuation);
    }

    #[test]
    fn interleaved_data_frame_rejected() {
        let mut parser = Parser::new(WebSocketPolicy::client());
        let err = parse_all(&mut parser, &hex!("01 01 41 81 01 42")).unwrap_err();
        assert_eq!(err, ProtocolError::ExpectedContinuation(Opcode::Text));
    }

    #[test]
    fn message_size_limit_checked_before_buffering() {
        let mut policy = WebSocketPolicy::client();
        policy.max_binary_message_size = 100;
        let mut parser = Parser::new(policy);
        // Header only: declares 200 bytes, none of them present.
        let err = parse_all(&mut parser, &hex!("82 7e 00 c8")).unwrap_err();
        assert_eq!(err, ProtocolError::MessageTooLarge { size: 200, limit: 100 });
        assert_eq!(err.close_code(), StatusCode::MESSAGE_TOO_LARGE);
    }

    #[test]
    fn fragmented_message_size_limit() {
        let mut policy = WebSocketPolicy::client();
        policy.max_text_message_size = 4;
        let mut parser = Parser::new(policy);
        let err = parse_all(&mut parser, &hex!("01 03 41 41 41 80 02 41 41")).unwrap_err();
        assert_eq!(err, ProtocolError::MessageTooLarge { size: 5, limit: 4 });
    }

    #[test]
    fn invalid_utf8_text_rejected() {
        let mut parser = Parser::new(WebSocketPolicy::client());
        let err = parse_all(&mut parser, &hex!("81 02 ff fe")).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidUtf8);
    }

    #[test]
    fn invalid_64_bit_length_rejected() {
        let mut parser = Parser::new(WebSocketPolicy::client());
        let err = parse_all(&mut parser, &hex!("82 7f 80 00 00 00 00 00 00 00")).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidPayloadLength);
    }

    #[test]
    fn close_frame_decoded() {
        let mut parser = Parser::new(WebSocketPolicy::client());
        let frames = parse_all(&mut parser, &hex!("88 04 03 e8 6f 6b")).unwrap();
        assert_eq!(frames, vec![Frame::close(CloseInfo::new(StatusCode::NORMAL, Some("ok".into())))]);
    }

    #[test]
    fn frames_before_error_are_kept() {
        let mut parser = Parser::new(WebSocketPolicy::client());
        let mut frames = Vec::new();
        let result = parser.parse(&hex!("89 00 80 00"), &mut frames);
        assert_eq!(result, Err(ProtocolError::UnexpectedContinuation));
        assert_eq!(frames, vec![Frame::ping(Bytes::new())]);
        assert_eq!(parser.buffered(), 0);
    }

    fn arb_body() -> impl Strategy<Value = FrameBody> {
        prop_oneof![
            ".{0,200}".prop_map(FrameBody::Text),
            proptest::collection::vec(any::<u8>(), 0..70_000)
                .prop_map(|v| FrameBody::Binary(Bytes::from(v))),
            proptest::collection::vec(any::<u8>(), 0..=125)
                .prop_map(|v| FrameBody::Ping(Bytes::from(v))),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn chunking_does_not_change_result(
            body in arb_body(),
            key in any::<[u8; 4]>(),
            chunk in 1usize..4096,
        ) {
            let mut frame = Frame::new(body);
            frame.set_mask(key);
            let bytes = encode(&frame);

            let mut policy = WebSocketPolicy::server();
            policy.max_binary_message_size = 1 << 20;
            let mut parser = Parser::new(policy);
            let mut frames = Vec::new();
            for piece in bytes.chunks(chunk) {
                parser.parse(piece, &mut frames).unwrap();
            }
            prop_assert_eq!(frames, vec![frame]);
        }
    }
}
