//! Service capability descriptors.
//!
//! Capabilities travel as `category, length, payload...` triples. Lists are
//! plain owned `Vec`s built with [`ServiceCapability`] constructors.

use bytes::{BufMut, Bytes, BytesMut};

use crate::signal::MediaType;

/// Service categories.
pub mod category {
    pub const MEDIA_TRANSPORT: u8 = 0x01;
    pub const REPORTING: u8 = 0x02;
    pub const RECOVERY: u8 = 0x03;
    pub const CONTENT_PROTECTION: u8 = 0x04;
    pub const HEADER_COMPRESSION: u8 = 0x05;
    pub const MULTIPLEXING: u8 = 0x06;
    pub const MEDIA_CODEC: u8 = 0x07;
    pub const DELAY_REPORTING: u8 = 0x08;
}

/// One service capability.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceCapability {
    pub category: u8,
    pub payload: Bytes,
}

impl ServiceCapability {
    pub fn new(category: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            category,
            payload: payload.into(),
        }
    }

    /// The payload-less media transport capability.
    pub fn media_transport() -> Self {
        Self::new(category::MEDIA_TRANSPORT, Bytes::new())
    }

    /// A media codec capability.
    pub fn media_codec(codec: MediaCodec) -> Self {
        Self::new(category::MEDIA_CODEC, codec.encode())
    }

    /// Decode the payload as a media codec capability, if it is one.
    pub fn as_media_codec(&self) -> Option<MediaCodec> {
        if self.category != category::MEDIA_CODEC {
            return None;
        }
        MediaCodec::decode(&self.payload)
    }
}

/// Media codec capability payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaCodec {
    pub media_type: MediaType,
    pub codec_type: u8,
    /// Codec specific information elements.
    pub data: Bytes,
}

impl MediaCodec {
    pub fn new(media_type: MediaType, codec_type: u8, data: impl Into<Bytes>) -> Self {
        Self {
            media_type,
            codec_type,
            data: data.into(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 + self.data.len());
        buf.put_u8((self.media_type as u8) << 4);
        buf.put_u8(self.codec_type);
        buf.put_slice(&self.data);
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> Option<Self> {
        if payload.len() < 2 {
            return None;
        }
        Some(Self {
            media_type: MediaType::from_bits(payload[0] >> 4)?,
            codec_type: payload[1],
            data: Bytes::copy_from_slice(&payload[2..]),
        })
    }
}

/// Error returned when a capability list can't be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityParseError {
    /// Byte offset of the offending entry.
    pub offset: usize,
}

impl std::fmt::Display for CapabilityParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "truncated capability at offset {}", self.offset)
    }
}

impl std::error::Error for CapabilityParseError {}

/// Longest payload a single length byte can describe.
pub const MAX_CAPABILITY_PAYLOAD: usize = u8::MAX as usize;

/// A capability payload too long for its length byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityTooLong {
    pub category: u8,
    pub len: usize,
}

impl std::fmt::Display for CapabilityTooLong {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "capability {:#04x} payload is {} bytes, at most {} fit",
            self.category, self.len, MAX_CAPABILITY_PAYLOAD
        )
    }
}

impl std::error::Error for CapabilityTooLong {}

/// Check that every capability in `caps` can be encoded.
pub fn check_capabilities(caps: &[ServiceCapability]) -> Result<(), CapabilityTooLong> {
    match caps.iter().find(|cap| cap.payload.len() > MAX_CAPABILITY_PAYLOAD) {
        Some(cap) => Err(CapabilityTooLong {
            category: cap.category,
            len: cap.payload.len(),
        }),
        None => Ok(()),
    }
}

/// Append an encoded capability list to `buf`.
///
/// Nothing is written if any payload is too long.
pub fn encode_capabilities(
    caps: &[ServiceCapability],
    buf: &mut BytesMut,
) -> Result<(), CapabilityTooLong> {
    check_capabilities(caps)?;
    for cap in caps {
        buf.put_u8(cap.category);
        buf.put_u8(cap.payload.len() as u8);
        buf.put_slice(&cap.payload);
    }
    Ok(())
}

/// Parse an encoded capability list.
pub fn parse_capabilities(mut data: &[u8]) -> Result<Vec<ServiceCapability>, CapabilityParseError> {
    let mut caps = Vec::new();
    let mut offset = 0;

    while !data.is_empty() {
        if data.len() < 2 {
            return Err(CapabilityParseError { offset });
        }
        let len = data[1] as usize;
        if data.len() < 2 + len {
            return Err(CapabilityParseError { offset });
        }
        caps.push(ServiceCapability::new(
            data[0],
            Bytes::copy_from_slice(&data[2..2 + len]),
        ));
        data = &data[2 + len..];
        offset += 2 + len;
    }

    Ok(caps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::CODEC_SBC;

    #[test]
    fn test_encode_transport_and_codec() {
        let caps = vec![
            ServiceCapability::media_transport(),
            ServiceCapability::media_codec(MediaCodec::new(
                MediaType::Audio,
                CODEC_SBC,
                Bytes::from_static(&[0x21, 0x02, 0x02, 0x20]),
            )),
        ];

        let mut buf = BytesMut::new();
        encode_capabilities(&caps, &mut buf).unwrap();

        assert_eq!(
            &buf[..],
            &[0x01, 0x00, 0x07, 0x06, 0x00, 0x00, 0x21, 0x02, 0x02, 0x20]
        );
    }

    #[test]
    fn test_parse_remote_capabilities() {
        let caps =
            parse_capabilities(&[0x01, 0x00, 0x07, 0x06, 0x00, 0x00, 0xff, 0xff, 0x02, 0x40])
                .unwrap();

        assert_eq!(caps.len(), 2);
        assert_eq!(caps[0], ServiceCapability::media_transport());

        let codec = caps[1].as_media_codec().unwrap();
        assert_eq!(codec.media_type, MediaType::Audio);
        assert_eq!(codec.codec_type, CODEC_SBC);
        assert_eq!(&codec.data[..], &[0xff, 0xff, 0x02, 0x40]);
    }

    #[test]
    fn test_parse_truncated_capability() {
        let err = parse_capabilities(&[0x01, 0x00, 0x07, 0x06, 0x00]).unwrap_err();
        assert_eq!(err.offset, 2);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let caps = vec![
            ServiceCapability::media_transport(),
            ServiceCapability::new(category::CONTENT_PROTECTION, vec![0u8; 256]),
        ];

        let mut buf = BytesMut::new();
        let err = encode_capabilities(&caps, &mut buf).unwrap_err();
        assert_eq!(
            err,
            CapabilityTooLong {
                category: category::CONTENT_PROTECTION,
                len: 256
            }
        );
        assert!(buf.is_empty());

        let fits = [ServiceCapability::new(category::CONTENT_PROTECTION, vec![0u8; 255])];
        assert!(check_capabilities(&fits).is_ok());
    }
}
