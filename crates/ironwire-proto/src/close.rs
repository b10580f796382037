//! Close frame payloads.
//!
//! A Close payload is either empty or a 2-byte big-endian status code
//! followed by an optional UTF-8 reason. The whole payload is a control frame
//! payload, so the reason is limited to 123 bytes.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// Registered close status codes.
pub struct StatusCode;

impl StatusCode {
    /// Normal closure
    pub const NORMAL: u16 = 1000;
    /// Endpoint going away (shutdown, navigation)
    pub const GOING_AWAY: u16 = 1001;
    /// Protocol error
    pub const PROTOCOL: u16 = 1002;
    /// Unacceptable data type
    pub const BAD_DATA: u16 = 1003;
    /// No status code was present. Never sent on the wire.
    pub const NO_CODE: u16 = 1005;
    /// Connection dropped without a Close frame. Never sent on the wire.
    pub const NO_CLOSE: u16 = 1006;
    /// Payload inconsistent with the message type (bad UTF-8)
    pub const BAD_PAYLOAD: u16 = 1007;
    /// Policy violation
    pub const POLICY_VIOLATION: u16 = 1008;
    /// Message too large
    pub const MESSAGE_TOO_LARGE: u16 = 1009;
    /// Client expected an extension the server did not negotiate
    pub const REQUIRED_EXTENSION: u16 = 1010;
    /// Unexpected server condition
    pub const SERVER_ERROR: u16 = 1011;
    /// TLS handshake failure. Never sent on the wire.
    pub const FAILED_TLS_HANDSHAKE: u16 = 1015;

    /// Whether `code` may appear in a Close frame on the wire.
    pub fn is_transmittable(code: u16) -> bool {
        matches!(code, 1000..=1003 | 1007..=1014 | 3000..=4999)
    }
}

/// Maximum reason length so the Close payload fits a control frame.
pub const MAX_REASON_LENGTH: usize = 123;

/// Status code and reason carried by a Close frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseInfo {
    /// Close status code, [`StatusCode::NO_CODE`] when the payload was empty
    pub code: u16,
    /// Optional human-readable reason
    pub reason: Option<String>,
}

impl CloseInfo {
    /// Close info with a code and reason.
    ///
    /// Reasons longer than [`MAX_REASON_LENGTH`] bytes are truncated at a
    /// character boundary.
    pub fn new(code: u16, reason: Option<String>) -> Self {
        let reason = reason.map(|mut reason| {
            if reason.len() > MAX_REASON_LENGTH {
                let mut end = MAX_REASON_LENGTH;
                while !reason.is_char_boundary(end) {
                    end -= 1;
                }
                reason.truncate(end);
            }
            reason
        });
        Self { code, reason }
    }

    /// Normal closure without a reason
    pub fn normal() -> Self {
        Self::new(StatusCode::NORMAL, None)
    }

    /// Close info for an empty payload
    pub fn no_code() -> Self {
        Self { code: StatusCode::NO_CODE, reason: None }
    }

    /// Decode a Close payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        match payload {
            [] => Ok(Self::no_code()),
            [_] => Err(ProtocolError::TruncatedClosePayload),
            [hi, lo, rest @ ..] => {
                let code = u16::from_be_bytes([*hi, *lo]);
                if !StatusCode::is_transmittable(code) {
                    return Err(ProtocolError::InvalidCloseCode(code));
                }
                let reason = if rest.is_empty() {
                    None
                } else {
                    let reason =
                        std::str::from_utf8(rest).map_err(|_| ProtocolError::InvalidUtf8)?;
                    Some(reason.to_owned())
                };
                Ok(Self { code, reason })
            },
        }
    }

    /// Encode as a Close payload.
    ///
    /// Codes that must not be transmitted produce an empty payload.
    pub fn to_payload(&self) -> Bytes {
        if !StatusCode::is_transmittable(self.code) {
            return Bytes::new();
        }
        let reason = self.reason.as_deref().unwrap_or_default();
        let mut buf = BytesMut::with_capacity(2 + reason.len());
        buf.put_u16(self.code);
        buf.put_slice(reason.as_bytes());
        buf.freeze()
    }

    /// Encoded payload length
    pub fn payload_len(&self) -> usize {
        if StatusCode::is_transmittable(self.code) {
            2 + self.reason.as_ref().map_or(0, String::len)
        } else {
            0
        }
    }
}
