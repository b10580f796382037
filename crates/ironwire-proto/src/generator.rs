//! Frame encoding.

use bytes::{BufMut, BytesMut};

use crate::{
    errors::{ProtocolError, Result},
    flags::FrameFlags,
    frame::Frame,
    mask::apply_mask,
};

/// Largest possible header: 2 fixed bytes, 8 extended length bytes and a
/// 4-byte masking key.
pub const MAX_HEADER_LENGTH: usize = 14;

/// Largest payload a control frame may carry
pub const MAX_CONTROL_PAYLOAD: usize = 125;

const MASK_BIT: u8 = 0b1000_0000;

/// Encodes frames into wire bytes.
///
/// Every frame is emitted as a single final fragment. Masking is applied when
/// the frame carries a key; deciding whether a key is attached is the
/// connection's job.
#[derive(Debug, Clone, Copy, Default)]
pub struct Generator;

impl Generator {
    /// Create a generator
    pub fn new() -> Self {
        Self
    }

    /// Exact header length for `frame`.
    pub fn header_len(frame: &Frame) -> usize {
        let length_bytes = match frame.payload_len() {
            0..=125 => 0,
            126..=0xFFFF => 2,
            _ => 8,
        };
        2 + length_bytes + if frame.is_masked() { 4 } else { 0 }
    }

    /// Append the complete encoding of `frame` to `buf`.
    ///
    /// `buf` grows as needed; reserving [`MAX_HEADER_LENGTH`] plus the payload
    /// length up front avoids reallocation.
    pub fn generate_whole_frame(&self, frame: &Frame, buf: &mut BytesMut) -> Result<()> {
        let payload = frame.payload();
        if frame.is_control() && payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(ProtocolError::ControlFrameTooLarge {
                opcode: frame.opcode(),
                size: payload.len() as u64,
            });
        }

        buf.reserve(Self::header_len(frame) + payload.len());
        buf.put_u8(FrameFlags::FIN.bits() | frame.opcode().to_u8());

        let mask_bit = if frame.is_masked() { MASK_BIT } else { 0 };
        match payload.len() {
            len @ 0..=125 => buf.put_u8(mask_bit | len as u8),
            len @ 126..=0xFFFF => {
                buf.put_u8(mask_bit | 126);
                buf.put_u16(len as u16);
            },
            len => {
                buf.put_u8(mask_bit | 127);
                buf.put_u64(len as u64);
            },
        }

        match frame.mask {
            Some(key) => {
                buf.put_slice(&key);
                let start = buf.len();
                buf.put_slice(&payload);
                apply_mask(&mut buf[start..], key);
            },
            None => buf.put_slice(&payload),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use hex_literal::hex;

    use super::*;
    use crate::close::{CloseInfo, StatusCode};

    fn encode(frame: &Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        Generator::new().generate_whole_frame(frame, &mut buf).unwrap();
        buf
    }

    #[test]
    fn unmasked_text_rfc_example() {
        assert_eq!(&encode(&Frame::text("Hello"))[..], hex!("81 05 48 65 6c 6c 6f"));
    }

    #[test]
    fn masked_text_rfc_example() {
        let mut frame = Frame::text("Hello");
        frame.set_mask(hex!("37 fa 21 3d"));
        assert_eq!(&encode(&frame)[..], hex!("81 85 37 fa 21 3d 7f 9f 4d 51 58"));
    }

    #[test]
    fn unmasked_ping_rfc_example() {
        assert_eq!(
            &encode(&Frame::ping(Bytes::from_static(b"Hello")))[..],
            hex!("89 05 48 65 6c 6c 6f")
        );
    }

    #[test]
    fn extended_16_bit_length() {
        let buf = encode(&Frame::binary(vec![0xAB; 256]));
        assert_eq!(&buf[..4], hex!("82 7e 01 00"));
        assert_eq!(buf.len(), 4 + 256);
    }

    #[test]
    fn extended_64_bit_length() {
        let buf = encode(&Frame::binary(vec![0u8; 65536]));
        assert_eq!(&buf[..10], hex!("82 7f 00 00 00 00 00 01 00 00"));
        assert_eq!(buf.len(), 10 + 65536);
    }

    #[test]
    fn header_never_exceeds_max() {
        let mut frame = Frame::binary(vec![0u8; 70_000]);
        frame.set_mask([9, 9, 9, 9]);
        assert_eq!(Generator::header_len(&frame), MAX_HEADER_LENGTH);
        assert_eq!(encode(&frame).len(), MAX_HEADER_LENGTH + 70_000);
    }

    #[test]
    fn close_frame_payload() {
        let buf = encode(&Frame::close(CloseInfo::new(StatusCode::NORMAL, None)));
        assert_eq!(&buf[..], hex!("88 02 03 e8"));
    }

    #[test]
    fn oversized_control_frame_rejected() {
        let mut buf = BytesMut::new();
        let err = Generator::new()
            .generate_whole_frame(&Frame::ping(vec![0u8; 126]), &mut buf)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ControlFrameTooLarge { size: 126, .. }));
        assert!(buf.is_empty());
    }
}
