//! The scripted exchange engine.
//!
//! The engine owns the alternation between emitting scripted frames and
//! validating what the session writes back. After every validated inbound
//! frame the next frame is emitted right away; every other frame is
//! expected from the session. The run ends the moment the cursor reaches
//! End.
//!
//! Session events are consumed in the same loop as wire reads, one at a
//! time, in arrival order, and handed to the procedure's [`Reactor`].

use std::time::Duration;

use avdtp_spec_proto::{Session, SessionEvent};
use tokio::time::Instant;

use crate::channel::Datagram;
use crate::context::ScenarioContext;
use crate::error::{HarnessError, ValidationKind};
use crate::trace::Direction;

/// Lifecycle of one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    /// Script loaded, nothing exchanged yet.
    Idle,
    Running,
    /// The channel failed before the script was exhausted.
    Draining,
    Terminated,
}

/// How a run begins.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FirstMove {
    /// Emit frame 0 (server-role scenarios).
    Emit,
    /// Frame 0 comes from the session, after the procedure's initial request.
    Receive,
}

/// Run settings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunConfig {
    /// Deadline for the whole run. `None` waits forever.
    pub deadline: Option<Duration>,
}

impl RunConfig {
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }
}

/// Summary of a successful run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunReport {
    /// Cursor at termination (the first End position).
    pub position: usize,
    pub emitted: usize,
    pub received: usize,
    pub elapsed: Duration,
}

/// Reacts to session events during a run.
pub trait Reactor<S: Session> {
    fn on_event(
        &mut self,
        ctx: &mut ScenarioContext<S>,
        event: SessionEvent,
    ) -> Result<(), HarnessError>;
}

enum Step {
    Received(Result<Datagram, ValidationKind>),
    Event(Option<SessionEvent>),
    Expired,
}

/// Drive `ctx` to the end of its script.
pub async fn run<S, R>(
    ctx: &mut ScenarioContext<S>,
    first: FirstMove,
    config: &RunConfig,
    reactor: &mut R,
) -> Result<RunReport, HarnessError>
where
    S: Session,
    R: Reactor<S>,
{
    let started = Instant::now();
    let mut report = RunReport {
        position: 0,
        emitted: 0,
        received: 0,
        elapsed: Duration::ZERO,
    };

    ctx.state = EngineState::Running;
    tracing::debug!(?first, position = ctx.cursor(), "exchange started");

    if first == FirstMove::Emit {
        emit(ctx, &mut report).await?;
    }

    let expiry = async {
        match config.deadline {
            Some(deadline) => tokio::time::sleep_until(started + deadline).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(expiry);

    while !ctx.at_end() {
        let step = tokio::select! {
            biased;
            received = ctx.harness.recv() => Step::Received(received),
            event = ctx.events.recv() => Step::Event(event),
            _ = &mut expiry => Step::Expired,
        };

        match step {
            Step::Received(received) => {
                validate(ctx, received)?;
                report.received += 1;
                // The frame after a validated one is ours to send.
                if !ctx.at_end() {
                    emit(ctx, &mut report).await?;
                }
            }
            Step::Event(Some(event)) => {
                tracing::debug!(event = event.name(), position = ctx.cursor(), "session event");
                reactor.on_event(ctx, event)?;
            }
            Step::Event(None) => return Err(HarnessError::SessionGone),
            Step::Expired => {
                return Err(HarnessError::Timeout {
                    position: ctx.cursor(),
                    elapsed: started.elapsed(),
                });
            }
        }
    }

    ctx.state = EngineState::Terminated;
    report.position = ctx.cursor();
    report.elapsed = started.elapsed();
    tracing::debug!(
        position = report.position,
        emitted = report.emitted,
        received = report.received,
        "exchange terminated"
    );
    Ok(report)
}

async fn emit<S: Session>(
    ctx: &mut ScenarioContext<S>,
    report: &mut RunReport,
) -> Result<(), HarnessError> {
    let position = ctx.cursor();
    let Some(frame) = ctx.peek().data().cloned() else {
        return Ok(());
    };

    ctx.trace.record(position, Direction::Outbound, frame.clone());
    ctx.advance();

    if let Err(kind) = ctx.harness.send(&frame).await {
        return Err(fail(ctx, position, kind));
    }
    report.emitted += 1;
    Ok(())
}

fn validate<S: Session>(
    ctx: &mut ScenarioContext<S>,
    received: Result<Datagram, ValidationKind>,
) -> Result<(), HarnessError> {
    let position = ctx.cursor();
    let expected = ctx.peek().data().cloned().unwrap_or_default();
    ctx.advance();

    let Datagram {
        data: received,
        len: actual,
    } = match received {
        Ok(datagram) => datagram,
        Err(kind) => return Err(fail(ctx, position, kind)),
    };
    ctx.trace.record(position, Direction::Inbound, received.clone());

    // Compare the length on the wire, not what fit in the buffer.
    if actual != expected.len() {
        return Err(fail(
            ctx,
            position,
            ValidationKind::LengthMismatch {
                expected,
                actual,
                received,
            },
        ));
    }
    if received != expected {
        return Err(fail(
            ctx,
            position,
            ValidationKind::ContentMismatch { expected, received },
        ));
    }
    Ok(())
}

fn fail<S: Session>(
    ctx: &mut ScenarioContext<S>,
    position: usize,
    kind: ValidationKind,
) -> HarnessError {
    if matches!(kind, ValidationKind::ChannelClosed | ValidationKind::Io(_)) {
        ctx.state = EngineState::Draining;
    }
    HarnessError::Validation { position, kind }
}
