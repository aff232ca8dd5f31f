//! The duplex channel between the harness and the session under test.

use avdtp_spec_proto::{Packet, SeqPacket};
use bytes::Bytes;

use crate::error::{HarnessError, ValidationKind};

/// Capacity of the harness receive buffer. Longer datagrams are truncated
/// but keep their full length, so they still fail length validation.
pub const RECV_BUFFER_LEN: usize = 512;

/// One datagram read from the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Datagram {
    /// The bytes that fit in the receive buffer.
    pub data: Bytes,
    /// Length of the datagram as sent. Larger than `data` when truncated.
    pub len: usize,
}

impl Datagram {
    pub fn is_truncated(&self) -> bool {
        self.len > self.data.len()
    }
}

/// Create a connected channel: the first endpoint goes to the session, the
/// second stays with the harness.
pub fn create() -> Result<(SeqPacket, HarnessEndpoint), HarnessError> {
    let (session, harness) = SeqPacket::pair().map_err(HarnessError::Fixture)?;
    tracing::trace!(
        session = session.as_raw_fd(),
        harness = harness.as_raw_fd(),
        "duplex channel created"
    );
    Ok((session, HarnessEndpoint::new(harness)))
}

/// The harness side of the channel.
pub struct HarnessEndpoint {
    socket: SeqPacket,
    buf: Box<[u8; RECV_BUFFER_LEN]>,
}

impl HarnessEndpoint {
    pub fn new(socket: SeqPacket) -> Self {
        Self {
            socket,
            buf: Box::new([0u8; RECV_BUFFER_LEN]),
        }
    }

    /// Write one frame as a single datagram.
    pub async fn send(&self, frame: &[u8]) -> Result<(), ValidationKind> {
        let written = self.socket.send(frame).await?;
        if written != frame.len() {
            return Err(ValidationKind::ShortWrite {
                expected: frame.len(),
                written,
            });
        }
        Ok(())
    }

    /// Read one datagram.
    ///
    /// Cancel safe: nothing is consumed until the read completes.
    pub async fn recv(&mut self) -> Result<Datagram, ValidationKind> {
        match self.socket.recv(&mut self.buf[..]).await? {
            Packet::Data(n) => Ok(Datagram {
                data: Bytes::copy_from_slice(&self.buf[..n]),
                len: n,
            }),
            Packet::Truncated { len } => {
                tracing::debug!(len, capacity = RECV_BUFFER_LEN, "inbound datagram truncated");
                Ok(Datagram {
                    data: Bytes::copy_from_slice(&self.buf[..]),
                    len,
                })
            }
            Packet::Empty => Err(ValidationKind::EmptyRead),
            Packet::Hangup => Err(ValidationKind::ChannelClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_cross_unchanged() {
        let (session, mut harness) = create().unwrap();

        harness.send(&[0x00, 0x01]).await.unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(session.recv(&mut buf).await.unwrap(), Packet::Data(2));
        assert_eq!(&buf[..2], &[0x00, 0x01]);

        session.send(&[0x02, 0x01, 0x04, 0x00]).await.unwrap();
        let datagram = harness.recv().await.unwrap();
        assert_eq!(&datagram.data[..], &[0x02, 0x01, 0x04, 0x00]);
        assert_eq!(datagram.len, 4);
        assert!(!datagram.is_truncated());
    }

    #[tokio::test]
    async fn test_empty_datagram() {
        let (session, mut harness) = create().unwrap();
        session.send(&[]).await.unwrap();
        assert!(matches!(harness.recv().await, Err(ValidationKind::EmptyRead)));
    }

    #[tokio::test]
    async fn test_session_hangup() {
        let (session, mut harness) = create().unwrap();
        drop(session);
        assert!(matches!(harness.recv().await, Err(ValidationKind::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_oversized_datagram_truncated() {
        let (session, mut harness) = create().unwrap();
        session.send(&[0xaa; RECV_BUFFER_LEN + 8]).await.unwrap();
        let datagram = harness.recv().await.unwrap();
        assert_eq!(datagram.data.len(), RECV_BUFFER_LEN);
        assert_eq!(datagram.len, RECV_BUFFER_LEN + 8);
        assert!(datagram.is_truncated());
    }
}
