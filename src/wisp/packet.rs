//! Wisp v1 packet codec.
//!
//! ```text
//! type:u8 | stream_id:u32le | payload
//!
//! CONNECT  0x01  stream_type:u8 | port:u16le | hostname (utf8)
//! DATA     0x02  bytes
//! CONTINUE 0x03  buffer_remaining:u32le
//! CLOSE    0x04  reason:u8
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::net::PolicyError;

const TYPE_CONNECT: u8 = 0x01;
const TYPE_DATA: u8 = 0x02;
const TYPE_CONTINUE: u8 = 0x03;
const TYPE_CLOSE: u8 = 0x04;

const HEADER_LEN: usize = 5;

/// Errors from decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WispError {
    #[error("packet truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("unknown packet type {0:#04x}")]
    UnknownType(u8),

    #[error("unknown stream type {0:#04x}")]
    UnknownStreamType(u8),

    #[error("hostname is not valid UTF-8")]
    InvalidHostname,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Tcp,
    Udp,
}

impl StreamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamType::Tcp => "tcp",
            StreamType::Udp => "udp",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            StreamType::Tcp => 0x01,
            StreamType::Udp => 0x02,
        }
    }

    fn from_u8(value: u8) -> Result<Self, WispError> {
        match value {
            0x01 => Ok(StreamType::Tcp),
            0x02 => Ok(StreamType::Udp),
            other => Err(WispError::UnknownStreamType(other)),
        }
    }
}

/// Why a stream closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Unknown,
    Voluntary,
    NetworkError,
    InvalidInfo,
    Unreachable,
    Timeout,
    Refused,
    TransferTimeout,
    Blocked,
    Throttled,
}

impl CloseReason {
    pub fn to_u8(self) -> u8 {
        match self {
            CloseReason::Unknown => 0x01,
            CloseReason::Voluntary => 0x02,
            CloseReason::NetworkError => 0x03,
            CloseReason::InvalidInfo => 0x41,
            CloseReason::Unreachable => 0x42,
            CloseReason::Timeout => 0x43,
            CloseReason::Refused => 0x44,
            CloseReason::TransferTimeout => 0x47,
            CloseReason::Blocked => 0x48,
            CloseReason::Throttled => 0x49,
        }
    }

    /// Unrecognised codes decode as `Unknown`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x02 => CloseReason::Voluntary,
            0x03 => CloseReason::NetworkError,
            0x41 => CloseReason::InvalidInfo,
            0x42 => CloseReason::Unreachable,
            0x43 => CloseReason::Timeout,
            0x44 => CloseReason::Refused,
            0x47 => CloseReason::TransferTimeout,
            0x48 => CloseReason::Blocked,
            0x49 => CloseReason::Throttled,
            _ => CloseReason::Unknown,
        }
    }

    /// Label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Unknown => "unknown",
            CloseReason::Voluntary => "voluntary",
            CloseReason::NetworkError => "network_error",
            CloseReason::InvalidInfo => "invalid_info",
            CloseReason::Unreachable => "unreachable",
            CloseReason::Timeout => "timeout",
            CloseReason::Refused => "refused",
            CloseReason::TransferTimeout => "transfer_timeout",
            CloseReason::Blocked => "blocked",
            CloseReason::Throttled => "throttled",
        }
    }
}

impl From<PolicyError> for CloseReason {
    fn from(e: PolicyError) -> Self {
        match e {
            PolicyError::InvalidTarget => CloseReason::InvalidInfo,
            PolicyError::Unresolvable => CloseReason::Unreachable,
            PolicyError::LookupTimeout => CloseReason::Timeout,
            PolicyError::Blocked(_) => CloseReason::Blocked,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect {
        stream_id: u32,
        stream_type: StreamType,
        port: u16,
        hostname: String,
    },
    Data {
        stream_id: u32,
        payload: Bytes,
    },
    Continue {
        stream_id: u32,
        buffer_remaining: u32,
    },
    Close {
        stream_id: u32,
        reason: CloseReason,
    },
}

impl Packet {
    pub fn stream_id(&self) -> u32 {
        match self {
            Packet::Connect { stream_id, .. }
            | Packet::Data { stream_id, .. }
            | Packet::Continue { stream_id, .. }
            | Packet::Close { stream_id, .. } => *stream_id,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload_len());
        match self {
            Packet::Connect {
                stream_id,
                stream_type,
                port,
                hostname,
            } => {
                buf.put_u8(TYPE_CONNECT);
                buf.put_u32_le(*stream_id);
                buf.put_u8(stream_type.to_u8());
                buf.put_u16_le(*port);
                buf.put_slice(hostname.as_bytes());
            }
            Packet::Data { stream_id, payload } => {
                buf.put_u8(TYPE_DATA);
                buf.put_u32_le(*stream_id);
                buf.put_slice(payload);
            }
            Packet::Continue {
                stream_id,
                buffer_remaining,
            } => {
                buf.put_u8(TYPE_CONTINUE);
                buf.put_u32_le(*stream_id);
                buf.put_u32_le(*buffer_remaining);
            }
            Packet::Close { stream_id, reason } => {
                buf.put_u8(TYPE_CLOSE);
                buf.put_u32_le(*stream_id);
                buf.put_u8(reason.to_u8());
            }
        }
        buf.freeze()
    }

    pub fn decode(mut frame: Bytes) -> Result<Self, WispError> {
        ensure(&frame, HEADER_LEN)?;
        let kind = frame.get_u8();
        let stream_id = frame.get_u32_le();

        match kind {
            TYPE_CONNECT => {
                ensure(&frame, 3)?;
                let stream_type = StreamType::from_u8(frame.get_u8())?;
                let port = frame.get_u16_le();
                let hostname = String::from_utf8(frame.to_vec()).map_err(|_| WispError::InvalidHostname)?;
                Ok(Packet::Connect {
                    stream_id,
                    stream_type,
                    port,
                    hostname,
                })
            }
            TYPE_DATA => Ok(Packet::Data {
                stream_id,
                payload: frame,
            }),
            TYPE_CONTINUE => {
                ensure(&frame, 4)?;
                Ok(Packet::Continue {
                    stream_id,
                    buffer_remaining: frame.get_u32_le(),
                })
            }
            TYPE_CLOSE => {
                ensure(&frame, 1)?;
                Ok(Packet::Close {
                    stream_id,
                    reason: CloseReason::from_u8(frame.get_u8()),
                })
            }
            other => Err(WispError::UnknownType(other)),
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            Packet::Connect { hostname, .. } => 3 + hostname.len(),
            Packet::Data { payload, .. } => payload.len(),
            Packet::Continue { .. } => 4,
            Packet::Close { .. } => 1,
        }
    }
}

fn ensure(frame: &Bytes, needed: usize) -> Result<(), WispError> {
    if frame.remaining() < needed {
        return Err(WispError::Truncated {
            needed,
            available: frame.remaining(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_wire_layout() {
        let packet = Packet::Connect {
            stream_id: 1,
            stream_type: StreamType::Tcp,
            port: 80,
            hostname: "example.com".to_string(),
        };
        let encoded = packet.encode();
        assert_eq!(&encoded[..8], &[0x01, 1, 0, 0, 0, 0x01, 80, 0]);
        assert_eq!(&encoded[8..], b"example.com");
        assert_eq!(Packet::decode(encoded).unwrap(), packet);
    }

    #[test]
    fn continue_is_little_endian() {
        let encoded = Packet::Continue {
            stream_id: 0,
            buffer_remaining: 128,
        }
        .encode();
        assert_eq!(&encoded[..], &[0x03, 0, 0, 0, 0, 128, 0, 0, 0]);
    }

    #[test]
    fn close_reason_codes() {
        assert_eq!(CloseReason::Blocked.to_u8(), 0x48);
        assert_eq!(CloseReason::from_u8(0x44), CloseReason::Refused);
        assert_eq!(CloseReason::from_u8(0xff), CloseReason::Unknown);
    }

    #[test]
    fn policy_refusals_map_to_close_codes() {
        let blocked = PolicyError::Blocked("10.0.0.1".parse().unwrap());
        assert_eq!(CloseReason::from(blocked).to_u8(), 0x48);
        assert_eq!(CloseReason::from(PolicyError::LookupTimeout).to_u8(), 0x43);
        assert_eq!(CloseReason::from(PolicyError::Unresolvable).to_u8(), 0x42);
        assert_eq!(CloseReason::from(PolicyError::InvalidTarget).to_u8(), 0x41);
    }

    #[test]
    fn empty_data_packet_is_valid() {
        let packet = Packet::decode(Bytes::from_static(&[0x02, 7, 0, 0, 0])).unwrap();
        assert_eq!(
            packet,
            Packet::Data {
                stream_id: 7,
                payload: Bytes::new()
            }
        );
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(matches!(
            Packet::decode(Bytes::from_static(&[0x02, 1])),
            Err(WispError::Truncated { .. })
        ));
        assert_eq!(
            Packet::decode(Bytes::from_static(&[0x09, 1, 0, 0, 0])),
            Err(WispError::UnknownType(0x09))
        );
        assert_eq!(
            Packet::decode(Bytes::from_static(&[0x01, 1, 0, 0, 0, 0x05, 80, 0])),
            Err(WispError::UnknownStreamType(0x05))
        );
        assert!(matches!(
            Packet::decode(Bytes::from_static(&[0x03, 1, 0, 0, 0, 1])),
            Err(WispError::Truncated { needed: 4, available: 1 })
        ));
    }
}
