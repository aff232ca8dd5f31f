//! AVDTP signaling constants.
//!
//! Only what the harness and the reference subject need to agree on. The
//! harness itself never interprets frames beyond [`signal_id_of`].

/// Signal identifiers (low six bits of the second header byte).
pub mod signal_id {
    pub const DISCOVER: u8 = 0x01;
    pub const GET_CAPABILITIES: u8 = 0x02;
    pub const SET_CONFIGURATION: u8 = 0x03;
    pub const GET_CONFIGURATION: u8 = 0x04;
    pub const RECONFIGURE: u8 = 0x05;
    pub const OPEN: u8 = 0x06;
    pub const START: u8 = 0x07;
    pub const CLOSE: u8 = 0x08;
    pub const SUSPEND: u8 = 0x09;
    pub const ABORT: u8 = 0x0A;
    pub const SECURITY_CONTROL: u8 = 0x0B;
    pub const GET_ALL_CAPABILITIES: u8 = 0x0C;
    pub const DELAY_REPORT: u8 = 0x0D;
}

/// Message type (low two bits of the first header byte).
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    Command = 0x00,
    GeneralReject = 0x01,
    Accept = 0x02,
    Reject = 0x03,
}

impl MessageType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0x00 => MessageType::Command,
            0x01 => MessageType::GeneralReject,
            0x02 => MessageType::Accept,
            _ => MessageType::Reject,
        }
    }
}

/// Packet type (bits 2-3 of the first header byte).
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketType {
    Single = 0x00,
    Start = 0x01,
    Continue = 0x02,
    End = 0x03,
}

impl PacketType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0x00 => PacketType::Single,
            0x01 => PacketType::Start,
            0x02 => PacketType::Continue,
            _ => PacketType::End,
        }
    }
}

/// Error codes carried in reject payloads.
pub mod error_code {
    pub const BAD_HEADER_FORMAT: u8 = 0x01;
    pub const BAD_LENGTH: u8 = 0x11;
    pub const BAD_ACP_SEID: u8 = 0x12;
    pub const SEP_IN_USE: u8 = 0x13;
    pub const SEP_NOT_IN_USE: u8 = 0x14;
    pub const BAD_SERV_CATEGORY: u8 = 0x17;
    pub const BAD_PAYLOAD_FORMAT: u8 = 0x18;
    pub const NOT_SUPPORTED_COMMAND: u8 = 0x19;
    pub const INVALID_CAPABILITIES: u8 = 0x1A;
    pub const BAD_STATE: u8 = 0x31;
}

/// Stream endpoint role.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SepType {
    Source = 0x00,
    Sink = 0x01,
}

impl SepType {
    pub fn from_bit(bit: u8) -> Self {
        if bit & 0x01 == 0 {
            SepType::Source
        } else {
            SepType::Sink
        }
    }
}

/// Media type of a stream endpoint.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaType {
    Audio = 0x00,
    Video = 0x01,
    Multimedia = 0x02,
}

impl MediaType {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x00 => Some(MediaType::Audio),
            0x01 => Some(MediaType::Video),
            0x02 => Some(MediaType::Multimedia),
            _ => None,
        }
    }
}

/// Media codec type for SBC.
pub const CODEC_SBC: u8 = 0x00;

/// First signaling version that uses GET_ALL_CAPABILITIES during discovery.
pub const VERSION_1_3: u16 = 0x0103;

/// Extract the signal identifier of a raw signaling frame.
///
/// Returns `None` for frames too short to carry one.
pub fn signal_id_of(frame: &[u8]) -> Option<u8> {
    frame.get(1).map(|b| b & 0x3F)
}
