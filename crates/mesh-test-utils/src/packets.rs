use bytes::Bytes;
use mesh_packet::{Codec, Packet, PacketType};

/// A canned `ClientData` frame carrying `payload`, ready to write straight
/// onto a loopback socket.
#[must_use]
pub fn client_data_frame(id: i32, sid: i64, payload: &[u8]) -> Bytes {
    let packet = Packet::detached_internal(PacketType::ClientData, id, sid, Bytes::copy_from_slice(payload));
    Codec::encode_one(&packet)
}

/// A canned `Heartbeat` frame, carrying no session id.
#[must_use]
pub fn heartbeat_frame(id: i32) -> Bytes {
    let packet = Packet::detached(PacketType::Heartbeat, id, Bytes::new());
    Codec::encode_one(&packet)
}
