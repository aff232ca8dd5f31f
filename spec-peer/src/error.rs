use std::fmt;
use std::io;
use std::time::Duration;

use avdtp_spec_proto::SessionError;
use bytes::Bytes;

use crate::trace::hex;

/// Why an inbound or outbound frame failed validation.
#[derive(Debug)]
pub enum ValidationKind {
    /// The received frame has the wrong length.
    LengthMismatch {
        expected: Bytes,
        actual: usize,
        received: Bytes,
    },
    /// Same length, different bytes.
    ContentMismatch { expected: Bytes, received: Bytes },
    /// The session closed its end before the script was exhausted.
    ChannelClosed,
    /// A zero-length read.
    EmptyRead,
    /// A scripted frame was only partially written.
    ShortWrite { expected: usize, written: usize },
    Io(io::Error),
}

impl fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LengthMismatch {
                expected,
                actual,
                received,
            } => write!(
                f,
                "length mismatch: expected {} bytes [{}], got {} bytes [{}]",
                expected.len(),
                hex(expected),
                actual,
                hex(received)
            ),
            Self::ContentMismatch { expected, received } => write!(
                f,
                "content mismatch: expected [{}], got [{}]",
                hex(expected),
                hex(received)
            ),
            Self::ChannelClosed => write!(f, "channel closed before the script was exhausted"),
            Self::EmptyRead => write!(f, "zero-length read"),
            Self::ShortWrite { expected, written } => {
                write!(f, "short write: {} of {} bytes", written, expected)
            }
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl From<io::Error> for ValidationKind {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => Self::ChannelClosed,
            _ => Self::Io(e),
        }
    }
}

/// A scenario failure.
///
/// Every variant is fatal for the scenario that produced it.
#[derive(Debug)]
pub enum HarnessError {
    /// The channel or the session could not be set up.
    Fixture(io::Error),
    /// The scenario's frame list can't be turned into a script.
    MalformedScript(String),
    /// A frame at `position` failed validation.
    Validation {
        position: usize,
        kind: ValidationKind,
    },
    /// A session request or confirmation reported an error.
    Rejected {
        operation: &'static str,
        reason: String,
    },
    /// The session delivered an event the procedure has no reaction for.
    UnexpectedEvent {
        position: usize,
        event: &'static str,
    },
    /// The run deadline expired.
    Timeout { position: usize, elapsed: Duration },
    /// The session's event queue closed while frames remained.
    SessionGone,
}

impl HarnessError {
    pub fn rejected(operation: &'static str, reason: impl fmt::Display) -> Self {
        Self::Rejected {
            operation,
            reason: reason.to_string(),
        }
    }

    /// A session request refused locally.
    pub fn refused(operation: &'static str, err: SessionError) -> Self {
        Self::Rejected {
            operation,
            reason: format!("{} (status {})", err, err.status()),
        }
    }

    /// Validation failure kind, if this is one.
    pub fn validation_kind(&self) -> Option<&ValidationKind> {
        match self {
            Self::Validation { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixture(e) => write!(f, "fixture setup failed: {}", e),
            Self::MalformedScript(why) => write!(f, "malformed script: {}", why),
            Self::Validation { position, kind } => write!(f, "frame {}: {}", position, kind),
            Self::Rejected { operation, reason } => write!(f, "{} rejected: {}", operation, reason),
            Self::UnexpectedEvent { position, event } => {
                write!(f, "unexpected '{}' event at frame {}", event, position)
            }
            Self::Timeout { position, elapsed } => write!(
                f,
                "timed out after {:.3}s waiting at frame {}",
                elapsed.as_secs_f64(),
                position
            ),
            Self::SessionGone => write!(f, "session event queue closed"),
        }
    }
}

impl std::error::Error for HarnessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Fixture(e) => Some(e),
            Self::Validation {
                kind: ValidationKind::Io(e),
                ..
            } => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_message_shows_both_frames() {
        let err = HarnessError::Validation {
            position: 3,
            kind: ValidationKind::ContentMismatch {
                expected: Bytes::from_static(&[0x02, 0x01, 0x04, 0x00]),
                received: Bytes::from_static(&[0x02, 0x01, 0x08, 0x00]),
            },
        };
        assert_eq!(
            err.to_string(),
            "frame 3: content mismatch: expected [02 01 04 00], got [02 01 08 00]"
        );
    }

    #[test]
    fn test_refusal_carries_status() {
        let err = HarnessError::refused("discover", SessionError::Busy);
        let status = SessionError::Busy.status().to_string();
        assert!(err.to_string().starts_with("discover rejected: "));
        assert!(err.to_string().contains(&status));
    }

    #[test]
    fn test_broken_pipe_is_channel_closed() {
        let kind = ValidationKind::from(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(matches!(kind, ValidationKind::ChannelClosed));
    }
}
