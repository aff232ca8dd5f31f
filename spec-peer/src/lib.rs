//! AVDTP signaling conformance peer.
//!
//! The peer plays the remote side of a signaling channel against any
//! [`Session`](avdtp_spec_proto::Session) implementation. Each scenario is an
//! exact, ordered frame exchange: the peer emits its scripted frames, checks
//! every frame the session writes byte for byte, and reacts to session
//! confirmations the way its procedure prescribes.
//!
//! # Usage
//!
//! ```bash
//! avdtp-spec-peer --list
//! avdtp-spec-peer --case /TP/SIG/SMG/BV-06-C
//! avdtp-spec-peer --format json
//! ```
//!
//! A scenario passes when the script is exhausted with every inbound frame
//! matched. Any mismatch, early channel closure, rejected request,
//! unexpected event or expired deadline fails it.

pub mod catalog;
pub mod channel;
pub mod context;
pub mod engine;
pub mod error;
pub mod frame;
pub mod procedures;
pub mod testcase;
pub mod trace;

pub use catalog::{Outcome, Registry, Scenario, catalog};
pub use channel::{Datagram, HarnessEndpoint};
pub use context::ScenarioContext;
pub use engine::{EngineState, FirstMove, Reactor, RunConfig, RunReport};
pub use error::{HarnessError, ValidationKind};
pub use frame::{Frame, Script};
pub use procedures::Procedure;
pub use testcase::TestResult;
pub use trace::{Direction, Exchange, Trace};
