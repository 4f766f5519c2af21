//! Wire envelope and peer messages.
//!
//! Every message is a length-prefixed canonical encoding inside an outer
//! envelope `{msg_type: u8, flags: u8, len: u32 BE, payload}`. Compression
//! (zstd) applies only to payloads over 1 KiB and is flagged in the
//! envelope, so canonical hashes are always computed on decompressed bytes.

use coinjecture_core::codec;
use coinjecture_core::types::{Block, BlockHeader, Reveal};
use coinjecture_core::ConsensusError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MSG_HEADER: u8 = 0x01;
pub const MSG_REVEAL: u8 = 0x02;
pub const MSG_REQUEST_BLOCK: u8 = 0x03;
pub const MSG_RESPONSE_BLOCK: u8 = 0x04;
pub const MSG_HEADERS_RANGE_REQUEST: u8 = 0x05;
pub const MSG_HEADERS_RANGE_RESPONSE: u8 = 0x06;

/// Envelope flag bit: payload is zstd-compressed
const FLAG_COMPRESSED: u8 = 0b0000_0001;

/// Payloads above this size are compressed on encode
pub const COMPRESSION_THRESHOLD: usize = 1024;

/// Fixed envelope prefix: type, flags, big-endian payload length
const ENVELOPE_PREFIX_LEN: usize = 1 + 1 + 4;

/// Hard cap on a decoded payload (matches the largest legal response)
const MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("envelope truncated: {0} bytes")]
    Truncated(usize),

    #[error("unknown message type: {0:#04x}")]
    UnknownMsgType(u8),

    #[error("unknown envelope flags: {0:#010b}")]
    UnknownFlags(u8),

    #[error("payload length {declared} does not match remaining {actual} bytes")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("payload exceeds the maximum message size")]
    PayloadTooLarge,

    #[error("compression error: {0}")]
    Compression(String),

    #[error(transparent)]
    Codec(#[from] ConsensusError),
}

// ==================== MESSAGES ====================

/// Peer-to-peer messages carried by the envelope
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// 0x01: canonical header bytes
    Header(BlockHeader),
    /// 0x02: canonical reveal bytes plus the header hash it binds
    Reveal {
        header_hash: [u8; 32],
        reveal: Reveal,
    },
    /// 0x03: request a block by header hash
    RequestBlock { header_hash: [u8; 32] },
    /// 0x04: header + reveal, or absent
    ResponseBlock {
        header_hash: [u8; 32],
        block: Option<Block>,
    },
    /// 0x05: request an ordered header range
    HeadersRangeRequest { from_height: u64, count: u32 },
    /// 0x06: ordered headers
    HeadersRangeResponse { headers: Vec<BlockHeader> },
}

impl Message {
    pub fn msg_type(&self) -> u8 {
        match self {
            Self::Header(_) => MSG_HEADER,
            Self::Reveal { .. } => MSG_REVEAL,
            Self::RequestBlock { .. } => MSG_REQUEST_BLOCK,
            Self::ResponseBlock { .. } => MSG_RESPONSE_BLOCK,
            Self::HeadersRangeRequest { .. } => MSG_HEADERS_RANGE_REQUEST,
            Self::HeadersRangeResponse { .. } => MSG_HEADERS_RANGE_RESPONSE,
        }
    }
}

// Payload bodies; the envelope type byte selects the shape, so payloads
// stay untagged structs rather than one big enum.
#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RevealPayload {
    #[serde(with = "hash_bytes")]
    header_hash: [u8; 32],
    reveal: Reveal,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RequestBlockPayload {
    #[serde(with = "hash_bytes")]
    header_hash: [u8; 32],
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResponseBlockPayload {
    #[serde(with = "hash_bytes")]
    header_hash: [u8; 32],
    block: Option<Block>,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct HeadersRangeRequestPayload {
    from_height: u64,
    count: u32,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct HeadersRangeResponsePayload {
    headers: Vec<BlockHeader>,
}

/// 32-byte hash fields in payload structs (same shape as core types)
mod hash_bytes {
    use serde::de::{Error as DeError, SeqAccess, Visitor};
    use serde::{Deserializer, Serialize, Serializer};
    use std::fmt;

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            hex::encode(bytes).serialize(serializer)
        } else {
            serializer.collect_seq(bytes.iter())
        }
    }

    struct HashVisitor;

    impl<'de> Visitor<'de> for HashVisitor {
        type Value = [u8; 32];

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "a 32-byte hash")
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut arr = [0u8; 32];
            for (i, slot) in arr.iter_mut().enumerate() {
                *slot = seq
                    .next_element()?
                    .ok_or_else(|| DeError::invalid_length(i, &self))?;
            }
            if seq.next_element::<u8>()?.is_some() {
                return Err(DeError::invalid_length(33, &self));
            }
            Ok(arr)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(HashVisitor)
    }
}

// ==================== ENCODE / DECODE ====================

/// Encode a message into its framed envelope
pub fn encode_message(message: &Message) -> Result<Vec<u8>, WireError> {
    let payload = match message {
        Message::Header(header) => codec::encode(header)?,
        Message::Reveal {
            header_hash,
            reveal,
        } => codec::encode(&RevealPayload {
            header_hash: *header_hash,
            reveal: reveal.clone(),
        })?,
        Message::RequestBlock { header_hash } => codec::encode(&RequestBlockPayload {
            header_hash: *header_hash,
        })?,
        Message::ResponseBlock { header_hash, block } => {
            codec::encode(&ResponseBlockPayload {
                header_hash: *header_hash,
                block: block.clone(),
            })?
        }
        Message::HeadersRangeRequest { from_height, count } => {
            codec::encode(&HeadersRangeRequestPayload {
                from_height: *from_height,
                count: *count,
            })?
        }
        Message::HeadersRangeResponse { headers } => {
            codec::encode(&HeadersRangeResponsePayload {
                headers: headers.clone(),
            })?
        }
    };

    let (flags, body) = if payload.len() > COMPRESSION_THRESHOLD {
        let compressed = zstd::stream::encode_all(payload.as_slice(), 0)
            .map_err(|e| WireError::Compression(e.to_string()))?;
        (FLAG_COMPRESSED, compressed)
    } else {
        (0u8, payload)
    };

    let mut out = Vec::with_capacity(ENVELOPE_PREFIX_LEN + body.len());
    out.push(message.msg_type());
    out.push(flags);
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode a framed envelope into a message, strictly.
///
/// The declared length must match the remaining bytes exactly; unknown
/// types and flags reject.
pub fn decode_message(bytes: &[u8]) -> Result<Message, WireError> {
    if bytes.len() < ENVELOPE_PREFIX_LEN {
        return Err(WireError::Truncated(bytes.len()));
    }

    let msg_type = bytes[0];
    let flags = bytes[1];
    if flags & !FLAG_COMPRESSED != 0 {
        return Err(WireError::UnknownFlags(flags));
    }

    let declared = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]) as usize;
    let body = &bytes[ENVELOPE_PREFIX_LEN..];
    if declared != body.len() {
        return Err(WireError::LengthMismatch {
            declared,
            actual: body.len(),
        });
    }
    if declared > MAX_PAYLOAD_BYTES {
        return Err(WireError::PayloadTooLarge);
    }

    let payload: Vec<u8> = if flags & FLAG_COMPRESSED != 0 {
        let decompressed = zstd::stream::decode_all(body)
            .map_err(|e| WireError::Compression(e.to_string()))?;
        if decompressed.len() > MAX_PAYLOAD_BYTES {
            return Err(WireError::PayloadTooLarge);
        }
        decompressed
    } else {
        body.to_vec()
    };

    match msg_type {
        MSG_HEADER => Ok(Message::Header(codec::decode_strict(&payload)?)),
        MSG_REVEAL => {
            let p: RevealPayload = codec::decode_strict(&payload)?;
            Ok(Message::Reveal {
                header_hash: p.header_hash,
                reveal: p.reveal,
            })
        }
        MSG_REQUEST_BLOCK => {
            let p: RequestBlockPayload = codec::decode_strict(&payload)?;
            Ok(Message::RequestBlock {
                header_hash: p.header_hash,
            })
        }
        MSG_RESPONSE_BLOCK => {
            let p: ResponseBlockPayload = codec::decode_strict(&payload)?;
            Ok(Message::ResponseBlock {
                header_hash: p.header_hash,
                block: p.block,
            })
        }
        MSG_HEADERS_RANGE_REQUEST => {
            let p: HeadersRangeRequestPayload = codec::decode_strict(&payload)?;
            Ok(Message::HeadersRangeRequest {
                from_height: p.from_height,
                count: p.count,
            })
        }
        MSG_HEADERS_RANGE_RESPONSE => {
            let p: HeadersRangeResponsePayload = codec::decode_strict(&payload)?;
            Ok(Message::HeadersRangeResponse { headers: p.headers })
        }
        other => Err(WireError::UnknownMsgType(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinjecture_core::types::*;
    use pretty_assertions::assert_eq;

    fn sample_header(index: u64) -> BlockHeader {
        BlockHeader {
            block_index: index,
            timestamp: 1_700_000_000 + index as i64,
            difficulty_target: 20,
            tier: HardwareTier::Desktop,
            ..Default::default()
        }
    }

    fn sample_reveal() -> Reveal {
        Reveal {
            problem: Problem::SubsetSum {
                elements: vec![3, 6, 7, 9, 12, 14, 20, 21],
                target: 30,
            },
            solution: Solution::SubsetSum {
                indices: vec![0, 2, 4],
            },
            miner_salt: [1u8; 32],
            measured: ComplexityRecord {
                solve_time_ms: 88,
                memory: MemoryClass::Low,
                attempts: 2,
            },
        }
    }

    #[test]
    fn test_header_roundtrip() {
        let message = Message::Header(sample_header(5));
        let bytes = encode_message(&message).unwrap();
        assert_eq!(bytes[0], MSG_HEADER);
        assert_eq!(decode_message(&bytes).unwrap(), message);
    }

    #[test]
    fn test_reveal_roundtrip() {
        let message = Message::Reveal {
            header_hash: [7u8; 32],
            reveal: sample_reveal(),
        };
        let bytes = encode_message(&message).unwrap();
        assert_eq!(decode_message(&bytes).unwrap(), message);
    }

    #[test]
    fn test_request_response_roundtrip() {
        let request = Message::RequestBlock {
            header_hash: [9u8; 32],
        };
        assert_eq!(
            decode_message(&encode_message(&request).unwrap()).unwrap(),
            request
        );

        let absent = Message::ResponseBlock {
            header_hash: [9u8; 32],
            block: None,
        };
        assert_eq!(
            decode_message(&encode_message(&absent).unwrap()).unwrap(),
            absent
        );
    }

    #[test]
    fn test_range_roundtrip() {
        let request = Message::HeadersRangeRequest {
            from_height: 100,
            count: 32,
        };
        assert_eq!(
            decode_message(&encode_message(&request).unwrap()).unwrap(),
            request
        );

        let response = Message::HeadersRangeResponse {
            headers: (0..3).map(sample_header).collect(),
        };
        assert_eq!(
            decode_message(&encode_message(&response).unwrap()).unwrap(),
            response
        );
    }

    #[test]
    fn test_large_payload_is_compressed() {
        let response = Message::HeadersRangeResponse {
            headers: (0..64).map(sample_header).collect(),
        };
        let bytes = encode_message(&response).unwrap();
        assert_eq!(bytes[1] & 1, 1, "expected compression flag set");
        assert_eq!(decode_message(&bytes).unwrap(), response);
    }

    #[test]
    fn test_small_payload_not_compressed() {
        let bytes = encode_message(&Message::RequestBlock {
            header_hash: [1u8; 32],
        })
        .unwrap();
        assert_eq!(bytes[1], 0);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut bytes = encode_message(&Message::RequestBlock {
            header_hash: [1u8; 32],
        })
        .unwrap();
        bytes[0] = 0x7F;
        assert!(matches!(
            decode_message(&bytes),
            Err(WireError::UnknownMsgType(0x7F))
        ));
    }

    #[test]
    fn test_unknown_flags_rejected() {
        let mut bytes = encode_message(&Message::RequestBlock {
            header_hash: [1u8; 32],
        })
        .unwrap();
        bytes[1] = 0b1000_0000;
        assert!(matches!(
            decode_message(&bytes),
            Err(WireError::UnknownFlags(_))
        ));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut bytes = encode_message(&Message::RequestBlock {
            header_hash: [1u8; 32],
        })
        .unwrap();
        bytes.push(0x00);
        assert!(matches!(
            decode_message(&bytes),
            Err(WireError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_rejected() {
        assert!(matches!(
            decode_message(&[0x01, 0x00]),
            Err(WireError::Truncated(2))
        ));
    }
}
