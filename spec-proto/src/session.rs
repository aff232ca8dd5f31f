//! The protocol session contract.
//!
//! The conformance peer never implements AVDTP. It drives whatever sits
//! behind [`Session`]: requests go in as method calls, confirmations come
//! back as [`SessionEvent`]s on a single queue, in the order the session
//! produced them.

use std::io;
use std::os::unix::io::OwnedFd;

use tokio::sync::mpsc;

use crate::caps::ServiceCapability;
use crate::error::{AvdtpError, SessionError};
use crate::seqpacket::SeqPacket;
use crate::signal::{MediaType, SepType};

/// Default signaling MTU, both directions.
pub const DEFAULT_MTU: u16 = 672;

/// Signaling version 1.0.
pub const VERSION_1_0: u16 = 0x0100;

/// Parameters a session is created with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionParams {
    pub imtu: u16,
    pub omtu: u16,
    pub version: u16,
    /// Transaction label used for the session's first command.
    pub first_transaction: u8,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            imtu: DEFAULT_MTU,
            omtu: DEFAULT_MTU,
            version: VERSION_1_0,
            first_transaction: 0,
        }
    }
}

impl SessionParams {
    pub fn with_first_transaction(mut self, label: u8) -> Self {
        self.first_transaction = label & 0x0F;
        self
    }
}

/// Registration request for a local stream endpoint.
#[derive(Clone, Debug)]
pub struct LocalSepConfig {
    pub sep_type: SepType,
    pub media_type: MediaType,
    pub codec: u8,
    /// Advertise delay reporting in GET_ALL_CAPABILITIES answers.
    pub delay_reporting: bool,
    /// Answer to GET_CAPABILITIES for this SEP.
    pub capabilities: Vec<ServiceCapability>,
    /// Deliver stream confirmations for this SEP as events.
    pub confirmations: bool,
}

impl LocalSepConfig {
    pub fn new(sep_type: SepType, media_type: MediaType, codec: u8) -> Self {
        Self {
            sep_type,
            media_type,
            codec,
            delay_reporting: false,
            capabilities: Vec::new(),
            confirmations: false,
        }
    }

    pub fn capabilities(mut self, caps: Vec<ServiceCapability>) -> Self {
        self.capabilities = caps;
        self
    }

    pub fn confirmations(mut self, enabled: bool) -> Self {
        self.confirmations = enabled;
        self
    }

    pub fn delay_reporting(mut self, enabled: bool) -> Self {
        self.delay_reporting = enabled;
        self
    }
}

/// Handle to a registered local SEP.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LocalSep {
    pub seid: u8,
}

/// A stream endpoint discovered on the remote side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteSep {
    pub seid: u8,
    pub in_use: bool,
    pub media_type: MediaType,
    pub sep_type: SepType,
    pub capabilities: Vec<ServiceCapability>,
}

/// Handle to a stream created by SET_CONFIGURATION.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub u32);

/// Asynchronous confirmations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Discovered {
        seps: Vec<RemoteSep>,
        error: Option<AvdtpError>,
    },
    Configured {
        sep: LocalSep,
        stream: StreamHandle,
        error: Option<AvdtpError>,
    },
    ConfigurationReceived {
        sep: LocalSep,
        stream: StreamHandle,
        capabilities: Vec<ServiceCapability>,
        error: Option<AvdtpError>,
    },
    Opened {
        sep: LocalSep,
        stream: StreamHandle,
        error: Option<AvdtpError>,
    },
    Started {
        sep: LocalSep,
        stream: StreamHandle,
        error: Option<AvdtpError>,
    },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Discovered { .. } => "discovered",
            SessionEvent::Configured { .. } => "configured",
            SessionEvent::ConfigurationReceived { .. } => "configuration-received",
            SessionEvent::Opened { .. } => "opened",
            SessionEvent::Started { .. } => "started",
        }
    }

    pub fn error(&self) -> Option<AvdtpError> {
        match self {
            SessionEvent::Discovered { error, .. }
            | SessionEvent::Configured { error, .. }
            | SessionEvent::ConfigurationReceived { error, .. }
            | SessionEvent::Opened { error, .. }
            | SessionEvent::Started { error, .. } => *error,
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Create the queue a session reports confirmations on.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// A signaling session under test.
///
/// Requests are synchronous: `Ok` means the command was accepted and
/// written, `Err` means it was refused locally. The remote answer arrives
/// later as a [`SessionEvent`].
pub trait Session: Sized {
    /// Bind a new session to its end of the signaling channel.
    ///
    /// Called from within the runtime the session will run on.
    fn create(endpoint: SeqPacket, params: SessionParams, events: EventSender) -> io::Result<Self>;

    /// Release the session and its endpoint.
    fn shutdown(self) {}

    fn register_sep(&self, config: LocalSepConfig) -> Result<LocalSep, SessionError>;

    fn unregister_sep(&self, sep: LocalSep) -> Result<(), SessionError>;

    /// Start discovery. Completes with [`SessionEvent::Discovered`] once the
    /// capabilities of every remote SEP are known.
    fn discover(&self) -> Result<(), SessionError>;

    /// Pick the discovered remote SEP that can stream with `local`.
    fn find_remote_sep(&self, local: LocalSep) -> Option<RemoteSep>;

    fn set_configuration(
        &self,
        remote: &RemoteSep,
        local: LocalSep,
        caps: Vec<ServiceCapability>,
    ) -> Result<StreamHandle, SessionError>;

    fn get_configuration(&self, stream: StreamHandle) -> Result<(), SessionError>;

    fn open(&self, stream: StreamHandle) -> Result<(), SessionError>;

    /// Attach the media transport channel of an open stream.
    fn set_transport(
        &self,
        stream: StreamHandle,
        transport: OwnedFd,
        imtu: u16,
        omtu: u16,
    ) -> Result<(), SessionError>;

    fn start(&self, stream: StreamHandle) -> Result<(), SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_error() {
        let failed = SessionEvent::Opened {
            sep: LocalSep { seid: 1 },
            stream: StreamHandle(1),
            error: Some(AvdtpError::new(0x31)),
        };
        assert_eq!(failed.error(), Some(AvdtpError::new(0x31)));

        let discovered = SessionEvent::Discovered {
            seps: Vec::new(),
            error: None,
        };
        assert_eq!(discovered.error(), None);
    }

    #[test]
    fn test_sep_config_builders() {
        let config = LocalSepConfig::new(SepType::Sink, MediaType::Audio, 0x00)
            .confirmations(true)
            .delay_reporting(true);
        assert!(config.confirmations);
        assert!(config.delay_reporting);
        assert!(config.capabilities.is_empty());
    }
}
