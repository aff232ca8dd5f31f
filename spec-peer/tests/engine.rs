//! Exchange engine behavior against the reference subject and against
//! misbehaving sessions.

use std::io;
use std::marker::PhantomData;
use std::os::unix::io::OwnedFd;
use std::time::Duration;

use avdtp_spec_peer::channel::RECV_BUFFER_LEN;
use avdtp_spec_peer::{
    EngineState, FirstMove, HarnessError, Procedure, Reactor, Registry, RunConfig, Scenario,
    ScenarioContext, Script, ValidationKind, engine,
};
use avdtp_spec_proto::{
    EventSender, LocalSep, LocalSepConfig, RemoteSep, SeqPacket, ServiceCapability, Session,
    SessionError, SessionEvent, SessionParams, StreamHandle,
};
use avdtp_spec_subject::Subject;

fn config() -> RunConfig {
    RunConfig::with_deadline(Duration::from_secs(5))
}

// =============================================================================
// Scripted fakes
// =============================================================================

/// What a fake session does when created and when asked to discover.
trait Behavior: 'static {
    /// Decide which of the endpoint and event sender to keep.
    fn setup(endpoint: SeqPacket, events: EventSender) -> (Option<SeqPacket>, Option<EventSender>) {
        (Some(endpoint), Some(events))
    }

    fn discover() -> Result<(), SessionError> {
        Ok(())
    }
}

struct Fake<B: Behavior> {
    _endpoint: Option<SeqPacket>,
    _events: Option<EventSender>,
    _behavior: PhantomData<B>,
}

impl<B: Behavior> Session for Fake<B> {
    fn create(endpoint: SeqPacket, _params: SessionParams, events: EventSender) -> io::Result<Self> {
        let (endpoint, events) = B::setup(endpoint, events);
        Ok(Self {
            _endpoint: endpoint,
            _events: events,
            _behavior: PhantomData,
        })
    }

    fn register_sep(&self, _config: LocalSepConfig) -> Result<LocalSep, SessionError> {
        Ok(LocalSep { seid: 1 })
    }

    fn unregister_sep(&self, _sep: LocalSep) -> Result<(), SessionError> {
        Ok(())
    }

    fn discover(&self) -> Result<(), SessionError> {
        B::discover()
    }

    fn find_remote_sep(&self, _local: LocalSep) -> Option<RemoteSep> {
        None
    }

    fn set_configuration(
        &self,
        _remote: &RemoteSep,
        _local: LocalSep,
        _caps: Vec<ServiceCapability>,
    ) -> Result<StreamHandle, SessionError> {
        Err(SessionError::UnknownHandle)
    }

    fn get_configuration(&self, _stream: StreamHandle) -> Result<(), SessionError> {
        Err(SessionError::UnknownHandle)
    }

    fn open(&self, _stream: StreamHandle) -> Result<(), SessionError> {
        Err(SessionError::UnknownHandle)
    }

    fn set_transport(
        &self,
        _stream: StreamHandle,
        _transport: OwnedFd,
        _imtu: u16,
        _omtu: u16,
    ) -> Result<(), SessionError> {
        Err(SessionError::UnknownHandle)
    }

    fn start(&self, _stream: StreamHandle) -> Result<(), SessionError> {
        Err(SessionError::UnknownHandle)
    }
}

/// Never writes anything.
struct Silent;
impl Behavior for Silent {}

/// Closes its endpoint right away.
struct Hangup;
impl Behavior for Hangup {
    fn setup(_endpoint: SeqPacket, events: EventSender) -> (Option<SeqPacket>, Option<EventSender>) {
        (None, Some(events))
    }
}

/// Writes a zero-length datagram.
struct EmptyDatagram;
impl Behavior for EmptyDatagram {
    fn setup(endpoint: SeqPacket, events: EventSender) -> (Option<SeqPacket>, Option<EventSender>) {
        endpoint.try_send(&[]).unwrap();
        (Some(endpoint), Some(events))
    }
}

/// Writes one datagram longer than the harness receive buffer.
struct Oversized;
impl Behavior for Oversized {
    fn setup(endpoint: SeqPacket, events: EventSender) -> (Option<SeqPacket>, Option<EventSender>) {
        endpoint.try_send(&[0xaa; OVERSIZED_LEN]).unwrap();
        (Some(endpoint), Some(events))
    }
}

const OVERSIZED_LEN: usize = RECV_BUFFER_LEN + 88;
const FULL_BUFFER_FRAME: [u8; RECV_BUFFER_LEN] = [0xaa; RECV_BUFFER_LEN];

/// Confirms a start nobody asked for.
struct Chatty;
impl Behavior for Chatty {
    fn setup(endpoint: SeqPacket, events: EventSender) -> (Option<SeqPacket>, Option<EventSender>) {
        events
            .send(SessionEvent::Started {
                sep: LocalSep { seid: 1 },
                stream: StreamHandle(1),
                error: None,
            })
            .unwrap();
        (Some(endpoint), Some(events))
    }
}

/// Refuses discovery.
struct Refusing;
impl Behavior for Refusing {
    fn discover() -> Result<(), SessionError> {
        Err(SessionError::Busy)
    }
}

/// Drops its event sender.
struct Forgetful;
impl Behavior for Forgetful {
    fn setup(endpoint: SeqPacket, _events: EventSender) -> (Option<SeqPacket>, Option<EventSender>) {
        (Some(endpoint), None)
    }
}

fn discover_only() -> Scenario {
    Scenario::new("discover-only", Procedure::Discover, &[&[0x00, 0x01]])
}

// =============================================================================
// Against the reference subject
// =============================================================================

#[tokio::test]
async fn discover_terminates_after_one_frame() {
    let report = discover_only().drive::<Subject>(&config()).await.unwrap();
    assert_eq!(report.position, 1);
    assert_eq!(report.received, 1);
    assert_eq!(report.emitted, 0);
}

#[tokio::test]
async fn server_discovery_response_validated() {
    let scenario = Scenario::new(
        "server-discover",
        Procedure::Server,
        &[&[0x00, 0x01], &[0x02, 0x01, 0x04, 0x00]],
    );
    let report = scenario.drive::<Subject>(&config()).await.unwrap();
    assert_eq!(report.position, 2);
    assert_eq!(report.emitted, 1);
    assert_eq!(report.received, 1);
}

#[tokio::test]
async fn script_ending_on_outbound_frame_terminates_after_emission() {
    let scenario = Scenario::new("emit-only", Procedure::Server, &[&[0x00, 0x01]]);
    let report = scenario.drive::<Subject>(&config()).await.unwrap();
    assert_eq!(report.position, 1);
    assert_eq!(report.emitted, 1);
    assert_eq!(report.received, 0);
}

#[tokio::test]
async fn truncated_expectation_is_length_mismatch() {
    let scenario = Scenario::new(
        "truncated",
        Procedure::Server,
        &[&[0x00, 0x01], &[0x02, 0x01, 0x04]],
    );
    let err = scenario.drive::<Subject>(&config()).await.unwrap_err();
    match err {
        HarnessError::Validation {
            position: 1,
            kind:
                ValidationKind::LengthMismatch {
                    expected, actual, ..
                },
        } => {
            assert_eq!(expected.len(), 3);
            assert_eq!(actual, 4);
        }
        other => panic!("expected length mismatch, got {}", other),
    }
}

#[tokio::test]
async fn altered_byte_is_content_mismatch() {
    let scenario = Scenario::new(
        "altered",
        Procedure::Server,
        &[&[0x00, 0x01], &[0x02, 0x01, 0x08, 0x00]],
    );
    let err = scenario.drive::<Subject>(&config()).await.unwrap_err();
    assert!(matches!(
        err,
        HarnessError::Validation {
            position: 1,
            kind: ValidationKind::ContentMismatch { .. }
        }
    ));
}

#[tokio::test]
async fn configured_dispatch_rejects_unknown_follow_up() {
    let scenario = Scenario::new(
        "bad-follow-up",
        Procedure::GetConfiguration,
        &[
            &[0x60, 0x01],
            &[0x62, 0x01, 0x04, 0x00],
            &[0x70, 0x02, 0x04],
            &[0x72, 0x02, 0x01, 0x00, 0x07, 0x06, 0x00, 0x00, 0xff, 0xff, 0x02, 0x40],
            &[
                0x80, 0x03, 0x04, 0x04, 0x01, 0x00, 0x07, 0x06, 0x00, 0x00, 0x21, 0x02, 0x02, 0x20,
            ],
            &[0x82, 0x03],
            &[0x90, 0x05, 0x04],
        ],
    )
    .first_transaction(6);

    let err = scenario.drive::<Subject>(&config()).await.unwrap_err();
    assert!(matches!(
        err,
        HarnessError::UnexpectedEvent {
            position: 6,
            event: "configured"
        }
    ));
}

#[tokio::test]
async fn batch_run_continues_past_failure() {
    let failing = Scenario::new(
        "truncated",
        Procedure::Server,
        &[&[0x00, 0x01], &[0x02, 0x01, 0x04]],
    );
    let passing = Scenario::new(
        "server-discover",
        Procedure::Server,
        &[&[0x00, 0x01], &[0x02, 0x01, 0x04, 0x00]],
    );
    let registry = Registry::with_scenarios(vec![failing, passing]);

    let outcomes = registry.run_all::<Subject>(&config()).await;

    let names: Vec<_> = outcomes.iter().map(|o| o.name).collect();
    assert_eq!(names, ["truncated", "server-discover"]);
    let passed: Vec<_> = outcomes.iter().map(|o| o.result.passed).collect();
    assert_eq!(passed, [false, true]);

    let error = outcomes[0].result.error.as_deref().unwrap();
    assert!(error.starts_with("truncated: "), "{}", error);
    assert!(outcomes[1].result.error.is_none());
}

#[tokio::test]
async fn replay_is_idempotent() {
    let registry = Registry::new();
    let scenario = registry.find("/TP/SIG/SMG/BV-17-C").unwrap();

    let first = scenario.run::<Subject>(&config()).await;
    let second = scenario.run::<Subject>(&config()).await;

    assert!(first.passed, "{:?}", first.error);
    assert!(second.passed, "{:?}", second.error);
    assert_eq!(first.trace.len(), scenario.frames.len());
    assert_eq!(first.trace, second.trace);
}

// =============================================================================
// Against misbehaving sessions
// =============================================================================

#[tokio::test]
async fn closed_channel_fails_and_drains() {
    let script = Script::from_static(&[&[0x00, 0x01]]).unwrap();
    let mut ctx = ScenarioContext::<Fake<Hangup>>::create(script, SessionParams::default()).unwrap();

    let mut procedure = Procedure::Discover;
    let err = engine::run(&mut ctx, FirstMove::Receive, &config(), &mut procedure)
        .await
        .unwrap_err();

    assert!(matches!(
        err.validation_kind(),
        Some(ValidationKind::ChannelClosed)
    ));
    assert_eq!(ctx.state(), EngineState::Draining);
    ctx.teardown();
}

#[tokio::test]
async fn empty_datagram_is_empty_read() {
    let err = discover_only()
        .drive::<Fake<EmptyDatagram>>(&config())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HarnessError::Validation {
            position: 0,
            kind: ValidationKind::EmptyRead
        }
    ));
}

#[tokio::test]
async fn oversized_frame_is_length_mismatch() {
    let scenario = Scenario::new("oversized", Procedure::Discover, &[&FULL_BUFFER_FRAME]);
    let err = scenario
        .drive::<Fake<Oversized>>(&config())
        .await
        .unwrap_err();
    match err {
        HarnessError::Validation {
            position: 0,
            kind:
                ValidationKind::LengthMismatch {
                    expected,
                    actual,
                    received,
                },
        } => {
            assert_eq!(expected.len(), RECV_BUFFER_LEN);
            assert_eq!(actual, OVERSIZED_LEN);
            assert_eq!(received.len(), RECV_BUFFER_LEN);
        }
        other => panic!("expected length mismatch, got {}", other),
    }
}

#[tokio::test]
async fn silent_session_times_out() {
    let config = RunConfig::with_deadline(Duration::from_millis(50));
    let err = discover_only()
        .drive::<Fake<Silent>>(&config)
        .await
        .unwrap_err();
    match err {
        HarnessError::Timeout { position, elapsed } => {
            assert_eq!(position, 0);
            assert!(elapsed >= Duration::from_millis(50));
        }
        other => panic!("expected timeout, got {}", other),
    }
}

#[tokio::test]
async fn unsolicited_event_is_unexpected() {
    let err = discover_only()
        .drive::<Fake<Chatty>>(&config())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HarnessError::UnexpectedEvent {
            position: 0,
            event: "started"
        }
    ));
}

#[tokio::test]
async fn refused_request_is_rejection() {
    let err = discover_only()
        .drive::<Fake<Refusing>>(&config())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HarnessError::Rejected {
            operation: "discover",
            ..
        }
    ));
}

#[tokio::test]
async fn dropped_event_queue_is_session_gone() {
    let err = discover_only()
        .drive::<Fake<Forgetful>>(&config())
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::SessionGone));
}

/// Counts events without failing on them.
struct Counting(usize);

impl<S: Session> Reactor<S> for Counting {
    fn on_event(
        &mut self,
        _ctx: &mut ScenarioContext<S>,
        _event: SessionEvent,
    ) -> Result<(), HarnessError> {
        self.0 += 1;
        Ok(())
    }
}

#[tokio::test]
async fn reactor_sees_events_until_deadline() {
    let script = Script::from_static(&[&[0x00, 0x01]]).unwrap();
    let mut ctx = ScenarioContext::<Fake<Chatty>>::create(script, SessionParams::default()).unwrap();

    let mut counting = Counting(0);
    let config = RunConfig::with_deadline(Duration::from_millis(50));
    let err = engine::run(&mut ctx, FirstMove::Receive, &config, &mut counting)
        .await
        .unwrap_err();

    assert!(matches!(err, HarnessError::Timeout { .. }));
    assert_eq!(counting.0, 1);
    ctx.teardown();
}
