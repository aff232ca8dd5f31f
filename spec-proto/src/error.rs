use std::fmt;
use std::io;

use crate::caps::CapabilityTooLong;

/// Protocol-level error carried by a reject or a confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvdtpError {
    /// Service category the error refers to, when the reject names one.
    pub category: Option<u8>,
    /// AVDTP error code (see [`crate::signal::error_code`]).
    pub code: u8,
}

impl AvdtpError {
    pub fn new(code: u8) -> Self {
        Self {
            category: None,
            code,
        }
    }

    pub fn with_category(category: u8, code: u8) -> Self {
        Self {
            category: Some(category),
            code,
        }
    }
}

impl fmt::Display for AvdtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.category {
            Some(category) => write!(
                f,
                "AVDTP error {:#04x} (category {:#04x})",
                self.code, category
            ),
            None => write!(f, "AVDTP error {:#04x}", self.code),
        }
    }
}

impl std::error::Error for AvdtpError {}

/// A session request was refused before anything went on the wire.
#[derive(Debug)]
pub enum SessionError {
    /// The session (or its endpoint) is gone.
    Closed,
    /// The handle doesn't name a live SEP or stream.
    UnknownHandle,
    /// The request isn't valid in the current stream state.
    BadState(&'static str),
    /// A request of this kind is already outstanding.
    Busy,
    /// A capability can't be put on the wire.
    BadCapability(CapabilityTooLong),
    /// Writing the command failed.
    Io(io::Error),
}

impl SessionError {
    /// Negative errno-style status code for diagnostics.
    pub fn status(&self) -> i32 {
        match self {
            Self::Closed => -libc::ENOTCONN,
            Self::UnknownHandle => -libc::EINVAL,
            Self::BadState(_) => -libc::EBADF,
            Self::Busy => -libc::EBUSY,
            Self::BadCapability(_) => -libc::EINVAL,
            Self::Io(e) => -e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "session closed"),
            Self::UnknownHandle => write!(f, "unknown SEP or stream handle"),
            Self::BadState(what) => write!(f, "bad stream state: {}", what),
            Self::Busy => write!(f, "request already in progress"),
            Self::BadCapability(e) => write!(f, "invalid capability: {}", e),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::BadCapability(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CapabilityTooLong> for SessionError {
    fn from(e: CapabilityTooLong) -> Self {
        Self::BadCapability(e)
    }
}

impl From<io::Error> for SessionError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
