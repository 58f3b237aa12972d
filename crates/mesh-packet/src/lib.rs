//! Framed binary packet codec for the cluster wire protocol.
//!
//! Frame layout (big-endian), see [`HEAD_LENGTH`] / [`SID_LENGTH`]:
//!
//! ```text
//! offset  size  field
//! 0       4     total length L (includes header)
//! 4       1     type
//! 5       4     id
//! 9       8     sid  (only when type is ClientData or InternalData)
//! 9/17    ..    payload
//! ```

use std::convert::TryFrom;
use std::fmt;
use std::sync::{Arc, Mutex};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Header length before the optional `sid` field: `L(4) + type(1) + id(4)`.
pub const HEAD_LENGTH: usize = 9;
/// Width of the optional `sid` field.
pub const SID_LENGTH: usize = 8;
/// Ceiling on the total frame length `L`, 10 MiB.
pub const MAX_PACKET_SIZE: usize = 10 << 20;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("codec: wrong packet type")]
    WrongPacketType,
    #[error("codec: packet size exceeded")]
    PacketSizeExceeded,
    #[error("codec: truncated frame")]
    Incomplete,
    #[error("codec: io error: {0}")]
    Io(#[from] std::io::Error),
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Heartbeat = 1,
    Data,
    Connection,
    DisConnection,
    BindConnection,
    InternalData,
    ClientData,
    NotifyData,
}

impl PacketType {
    /// Whether frames of this type carry the positional `sid` field.
    #[must_use]
    pub fn carries_sid(self) -> bool {
        matches!(self, PacketType::ClientData | PacketType::InternalData)
    }
}

impl TryFrom<u8> for PacketType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => PacketType::Heartbeat,
            2 => PacketType::Data,
            3 => PacketType::Connection,
            4 => PacketType::DisConnection,
            5 => PacketType::BindConnection,
            6 => PacketType::InternalData,
            7 => PacketType::ClientData,
            8 => PacketType::NotifyData,
            _ => return Err(CodecError::WrongPacketType),
        })
    }
}

/// A decoded (or about-to-be-encoded) wire packet.
///
/// Immutable once constructed. Drawn from a [`PacketPool`]; dropping a
/// `Packet` returns its payload allocation to the pool that produced it.
pub struct Packet {
    pool: Option<PacketPool>,
    typ: PacketType,
    id: i32,
    sid: i64,
    data: Bytes,
}

impl Packet {
    /// Build a standalone packet not tied to any pool (mainly for tests).
    #[must_use]
    pub fn detached(typ: PacketType, id: i32, data: Bytes) -> Self {
        Self { pool: None, typ, id, sid: 0, data }
    }

    /// Build a standalone internal packet (carries `sid`) not tied to any pool.
    #[must_use]
    pub fn detached_internal(typ: PacketType, id: i32, sid: i64, data: Bytes) -> Self {
        Self { pool: None, typ, id, sid, data }
    }

    #[must_use]
    pub fn typ(&self) -> PacketType {
        self.typ
    }

    #[must_use]
    pub fn id(&self) -> i32 {
        self.id
    }

    #[must_use]
    pub fn sid(&self) -> i64 {
        self.sid
    }

    #[must_use]
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

impl Drop for Packet {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.release();
        }
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("type", &self.typ)
            .field("id", &self.id)
            .field("sid", &self.sid)
            .field("data_len", &self.data.len())
            .finish()
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Type: {:?}, ID: {}, Sid: {}, DataLen: {}",
            self.typ,
            self.id,
            self.sid,
            self.data.len()
        )
    }
}

/// Counts outstanding packets drawn from it; the allocation itself (`Bytes`,
/// refcounted) needs no recycling, but every pool-sourced packet release is
/// tracked so pool pressure is observable the way a `sync.Pool`'s
/// get/put pairing would be.
#[derive(Clone, Default)]
pub struct PacketPool {
    outstanding: Arc<Mutex<u64>>,
}

impl PacketPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn outstanding(&self) -> u64 {
        *self.outstanding.lock().unwrap()
    }

    fn acquire(&self, typ: PacketType, id: i32, sid: i64, data: Bytes) -> Packet {
        *self.outstanding.lock().unwrap() += 1;
        Packet { pool: Some(self.clone()), typ, id, sid, data }
    }

    fn release(&self) {
        let mut count = self.outstanding.lock().unwrap();
        *count = count.saturating_sub(1);
    }

    /// `New` — a pooled packet for a type that carries no `sid`.
    #[must_use]
    pub fn new_packet(&self, typ: PacketType, id: i32, data: Bytes) -> Packet {
        self.acquire(typ, id, 0, data)
    }

    /// `NewInternal` — a pooled packet for `ClientData`/`InternalData`.
    #[must_use]
    pub fn new_internal(&self, typ: PacketType, id: i32, sid: i64, data: Bytes) -> Packet {
        self.acquire(typ, id, sid, data)
    }
}

/// Encodes and decodes frames of the wire protocol.
///
/// Usable both as a one-shot decoder for a pre-sliced complete frame
/// ([`Codec::decode_one`]) and as a [`tokio_util::codec::Decoder`] /
/// [`Encoder`] pair for streaming use directly on a socket via `Framed`.
#[derive(Clone)]
pub struct Codec {
    pool: PacketPool,
}

impl Codec {
    #[must_use]
    pub fn new(pool: PacketPool) -> Self {
        Self { pool }
    }

    fn header_len(typ: PacketType) -> usize {
        if typ.carries_sid() {
            HEAD_LENGTH + SID_LENGTH
        } else {
            HEAD_LENGTH
        }
    }

    /// Decode exactly one complete, already-assembled frame.
    pub fn decode_one(&self, frame: &[u8]) -> Result<Packet, CodecError> {
        if frame.len() < HEAD_LENGTH {
            return Err(CodecError::Incomplete);
        }
        let total_len = u32::from_be_bytes(frame[0..4].try_into().unwrap()) as usize;
        if total_len > MAX_PACKET_SIZE {
            return Err(CodecError::PacketSizeExceeded);
        }
        let typ = PacketType::try_from(frame[4])?;
        let id = i32::from_be_bytes(frame[5..9].try_into().unwrap());
        let header_len = Self::header_len(typ);
        if frame.len() < header_len || frame.len() != total_len {
            return Err(CodecError::Incomplete);
        }
        let sid = if typ.carries_sid() {
            i64::from_be_bytes(frame[9..17].try_into().unwrap())
        } else {
            0
        };
        let payload = Bytes::copy_from_slice(&frame[header_len..total_len]);
        Ok(if typ.carries_sid() {
            self.pool.new_internal(typ, id, sid, payload)
        } else {
            self.pool.new_packet(typ, id, payload)
        })
    }

    /// Encode a packet into a single newly allocated buffer of exactly `L` bytes.
    #[must_use]
    pub fn encode_one(packet: &Packet) -> Bytes {
        let header_len = Self::header_len(packet.typ);
        let total_len = header_len + packet.data.len();
        let mut buf = BytesMut::with_capacity(total_len);
        buf.put_u32(total_len as u32);
        buf.put_u8(packet.typ as u8);
        buf.put_i32(packet.id);
        if packet.typ.carries_sid() {
            buf.put_i64(packet.sid);
        }
        buf.put_slice(&packet.data);
        buf.freeze()
    }
}

impl Decoder for Codec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, CodecError> {
        if src.len() < HEAD_LENGTH {
            return Ok(None);
        }
        let total_len = u32::from_be_bytes(src[0..4].try_into().unwrap()) as usize;
        if total_len > MAX_PACKET_SIZE {
            return Err(CodecError::PacketSizeExceeded);
        }
        let typ = PacketType::try_from(src[4])?;
        let header_len = Self::header_len(typ);
        if total_len < header_len {
            return Err(CodecError::Incomplete);
        }
        if src.len() < total_len {
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        let id = i32::from_be_bytes(src[5..9].try_into().unwrap());
        let sid = if typ.carries_sid() {
            i64::from_be_bytes(src[9..17].try_into().unwrap())
        } else {
            0
        };

        let frame = src.split_to(total_len).freeze();
        let payload = frame.slice(header_len..total_len);
        Ok(Some(if typ.carries_sid() {
            self.pool.new_internal(typ, id, sid, payload)
        } else {
            self.pool.new_packet(typ, id, payload)
        }))
    }
}

impl Encoder<Packet> for Codec {
    type Error = CodecError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), CodecError> {
        dst.extend_from_slice(&Self::encode_one(&packet));
        Ok(())
    }
}
