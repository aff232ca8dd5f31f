//! Shared definitions for the AVDTP signaling conformance suite.
//!
//! The peer (harness) and any subject (session under test) agree on three
//! things only: the [`SeqPacket`] channel they talk over, the [`Session`]
//! contract the peer drives, and the handful of signaling constants needed
//! to build capabilities and pick follow-up requests.

pub mod caps;
pub mod error;
pub mod seqpacket;
pub mod session;
pub mod signal;

pub use caps::{CapabilityTooLong, MediaCodec, ServiceCapability};
pub use error::{AvdtpError, SessionError};
pub use seqpacket::{Packet, SeqPacket};
pub use session::{
    DEFAULT_MTU, EventReceiver, EventSender, LocalSep, LocalSepConfig, RemoteSep, Session,
    SessionEvent, SessionParams, StreamHandle, VERSION_1_0, event_channel,
};
pub use signal::{MediaType, SepType};
