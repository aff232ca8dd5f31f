//! Single-packet signaling header.
//!
//! ```text
//! byte 0: transaction label (4) | packet type (2) | message type (2)
//! byte 1: RFA (2) | signal identifier (6)
//! ```

use avdtp_spec_proto::signal::{MessageType, PacketType};
use bytes::{BufMut, BytesMut};

pub const HEADER_LEN: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub label: u8,
    pub packet_type: PacketType,
    pub message_type: MessageType,
    pub signal_id: u8,
}

impl Header {
    pub fn single(label: u8, message_type: MessageType, signal_id: u8) -> Self {
        Self {
            label: label & 0x0F,
            packet_type: PacketType::Single,
            message_type,
            signal_id: signal_id & 0x3F,
        }
    }

    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            label: data[0] >> 4,
            packet_type: PacketType::from_bits(data[0] >> 2),
            message_type: MessageType::from_bits(data[0]),
            signal_id: data[1] & 0x3F,
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.label << 4 | (self.packet_type as u8) << 2 | self.message_type as u8);
        buf.put_u8(self.signal_id);
    }

    /// Header for the answer to this command.
    pub fn answer(&self, message_type: MessageType) -> Self {
        Self::single(self.label, message_type, self.signal_id)
    }
}
