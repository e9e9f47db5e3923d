// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Wire formats exchanged between peers as RDMA SEND payloads.
//!
//! These are plain, manually-encoded byte layouts rather than a generic
//! serialization format: both sides agree on the engine's `element_size`
//! out of band (it is fixed per engine), so there is nothing here for a
//! schema-driven codec to buy us.

/// Upper bound on a single shard element's size, chosen so a full block
/// reply of `mtu` elements still fits comfortably under a typical RDMA
/// SEND payload / MTU. Large-object transfer is explicitly out of scope.
pub const MAX_PAYLOAD_ELEMENT_BYTES: usize = 4096;

/// Header prefixing a block-request SEND.
///
/// ```text
/// u32 size | u32 peer_origin | u32 token | u32 trip_flag
/// ```
/// followed by `size` offset words (see [`crate::protocol::ElementSlot`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRequestHeader {
    pub size: u32,
    pub peer_origin: u32,
    pub token: u32,
    pub trip_flag: u32,
}

impl BlockRequestHeader {
    pub const WIRE_LEN: usize = 16;

    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::WIRE_LEN] {
        let mut buf = [0u8; Self::WIRE_LEN];
        buf[0..4].copy_from_slice(&self.size.to_le_bytes());
        buf[4..8].copy_from_slice(&self.peer_origin.to_le_bytes());
        buf[8..12].copy_from_slice(&self.token.to_le_bytes());
        buf[12..16].copy_from_slice(&self.trip_flag.to_le_bytes());
        buf
    }

    #[must_use]
    pub fn from_bytes(buf: &[u8; Self::WIRE_LEN]) -> Self {
        Self {
            size: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            peer_origin: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            token: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            trip_flag: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
        }
    }
}

/// Header prefixing a block-reply SEND.
///
/// ```text
/// u32 token | u32 size
/// ```
/// followed by `size` scalar values, `element_size` bytes each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockReplyHeader {
    pub token: u32,
    pub size: u32,
}

impl BlockReplyHeader {
    pub const WIRE_LEN: usize = 8;

    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::WIRE_LEN] {
        let mut buf = [0u8; Self::WIRE_LEN];
        buf[0..4].copy_from_slice(&self.token.to_le_bytes());
        buf[4..8].copy_from_slice(&self.size.to_le_bytes());
        buf
    }

    #[must_use]
    pub fn from_bytes(buf: &[u8; Self::WIRE_LEN]) -> Self {
        Self {
            token: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            size: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
        }
    }
}

/// One byte prepended to every SEND payload so the receiving
/// response-pump can dispatch without guessing from length alone: a
/// block request and a block reply have differently shaped headers, but
/// both can legally be the same total size for small batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum MessageKind {
    BlockRequest = 0,
    BlockReply = 1,
}

/// A decoded inbound SEND, dispatched by its leading tag byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    BlockRequest {
        header: BlockRequestHeader,
        offsets: Vec<u32>,
    },
    BlockReply {
        header: BlockReplyHeader,
        values: Vec<u8>,
    },
}

impl WireMessage {
    #[must_use]
    pub fn encode_request(header: BlockRequestHeader, offsets: &[u32]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + BlockRequestHeader::WIRE_LEN + offsets.len() * 4);
        buf.push(MessageKind::BlockRequest as u8);
        buf.extend_from_slice(&header.to_bytes());
        for offset in offsets {
            buf.extend_from_slice(&offset.to_le_bytes());
        }
        buf
    }

    #[must_use]
    pub fn encode_reply(header: BlockReplyHeader, values: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + BlockReplyHeader::WIRE_LEN + values.len());
        buf.push(MessageKind::BlockReply as u8);
        buf.extend_from_slice(&header.to_bytes());
        buf.extend_from_slice(values);
        buf
    }

    /// Decode a tagged SEND payload. Returns `None` for a malformed
    /// message (too short for its own header) rather than panicking:
    /// transport corruption is a `ProtocolViolation` the caller raises
    /// with context, not a library-internal panic.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let (&tag, rest) = bytes.split_first()?;
        match tag {
            t if t == MessageKind::BlockRequest as u8 => {
                if rest.len() < BlockRequestHeader::WIRE_LEN {
                    return None;
                }
                let (hdr_bytes, payload) = rest.split_at(BlockRequestHeader::WIRE_LEN);
                let header = BlockRequestHeader::from_bytes(hdr_bytes.try_into().ok()?);
                if payload.len() != header.size as usize * 4 {
                    return None;
                }
                let offsets = payload
                    .chunks_exact(4)
                    .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
                    .collect();
                Some(Self::BlockRequest { header, offsets })
            }
            t if t == MessageKind::BlockReply as u8 => {
                if rest.len() < BlockReplyHeader::WIRE_LEN {
                    return None;
                }
                let (hdr_bytes, payload) = rest.split_at(BlockReplyHeader::WIRE_LEN);
                let header = BlockReplyHeader::from_bytes(hdr_bytes.try_into().ok()?);
                Some(Self::BlockReply {
                    header,
                    values: payload.to_vec(),
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_message_round_trips_block_request() {
        let header = BlockRequestHeader {
            size: 3,
            peer_origin: 1,
            token: 9,
            trip_flag: 0,
        };
        let offsets = vec![10, 20, 30];
        let bytes = WireMessage::encode_request(header, &offsets);
        match WireMessage::decode(&bytes) {
            Some(WireMessage::BlockRequest { header: h, offsets: o }) => {
                assert_eq!(h, header);
                assert_eq!(o, offsets);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn wire_message_round_trips_block_reply() {
        let header = BlockReplyHeader { token: 9, size: 2 };
        let values = vec![1, 2, 3, 4, 5, 6, 7, 8];
        let bytes = WireMessage::encode_reply(header, &values);
        match WireMessage::decode(&bytes) {
            Some(WireMessage::BlockReply { header: h, values: v }) => {
                assert_eq!(h, header);
                assert_eq!(v, values);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn block_request_header_round_trips() {
        let hdr = BlockRequestHeader {
            size: 1000,
            peer_origin: 3,
            token: 42,
            trip_flag: 2,
        };
        assert_eq!(BlockRequestHeader::from_bytes(&hdr.to_bytes()), hdr);
    }

    #[test]
    fn block_reply_header_round_trips() {
        let hdr = BlockReplyHeader {
            token: 42,
            size: 1000,
        };
        assert_eq!(BlockReplyHeader::from_bytes(&hdr.to_bytes()), hdr);
    }
}
