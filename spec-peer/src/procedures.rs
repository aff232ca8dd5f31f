//! Scenario drivers.
//!
//! A procedure decides which local SEP the session gets, how the exchange
//! starts, and how the harness answers session confirmations while the
//! script plays out.

use std::fmt;
use std::fs::OpenOptions;
use std::os::unix::io::OwnedFd;

use avdtp_spec_proto::signal::{CODEC_SBC, signal_id};
use avdtp_spec_proto::{
    AvdtpError, DEFAULT_MTU, LocalSepConfig, MediaCodec, MediaType, RemoteSep, SepType,
    ServiceCapability, Session, SessionEvent, StreamHandle,
};
use bytes::Bytes;

use crate::context::ScenarioContext;
use crate::engine::{self, FirstMove, Reactor, RunConfig, RunReport};
use crate::error::HarnessError;

/// Codec information the source SEP advertises.
const SOURCE_CODEC_CAPS: &[u8] = &[0xff, 0xff, 0x02, 0x40];

/// Codec configuration the sink SEP requests.
const SINK_CODEC_CONFIG: &[u8] = &[0x21, 0x02, 0x02, 0x20];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Procedure {
    /// Acceptor role: the harness drives, the session answers.
    Server,
    Discover,
    GetCapabilities,
    SetConfiguration,
    GetConfiguration,
    Open,
    Start,
}

impl Procedure {
    pub fn name(self) -> &'static str {
        match self {
            Procedure::Server => "server",
            Procedure::Discover => "discover",
            Procedure::GetCapabilities => "get-capabilities",
            Procedure::SetConfiguration => "set-configuration",
            Procedure::GetConfiguration => "get-configuration",
            Procedure::Open => "open",
            Procedure::Start => "start",
        }
    }

    /// The local SEP this procedure registers, if any.
    pub fn local_sep(self) -> Option<LocalSepConfig> {
        match self {
            Procedure::Server => Some(
                LocalSepConfig::new(SepType::Source, MediaType::Audio, CODEC_SBC).capabilities(
                    vec![
                        ServiceCapability::media_transport(),
                        ServiceCapability::media_codec(MediaCodec::new(
                            MediaType::Audio,
                            CODEC_SBC,
                            Bytes::from_static(SOURCE_CODEC_CAPS),
                        )),
                    ],
                ),
            ),
            Procedure::Discover | Procedure::GetCapabilities => None,
            Procedure::SetConfiguration => Some(LocalSepConfig::new(
                SepType::Sink,
                MediaType::Audio,
                CODEC_SBC,
            )),
            Procedure::GetConfiguration | Procedure::Open | Procedure::Start => Some(
                LocalSepConfig::new(SepType::Sink, MediaType::Audio, CODEC_SBC)
                    .confirmations(true),
            ),
        }
    }

    /// Set up `ctx` for this procedure and run its script to the end.
    pub async fn execute<S: Session>(
        mut self,
        ctx: &mut ScenarioContext<S>,
        config: &RunConfig,
    ) -> Result<RunReport, HarnessError> {
        if let Some(sep) = self.local_sep() {
            ctx.register_sep(sep)?;
        }

        let first = match self {
            Procedure::Server => FirstMove::Emit,
            _ => {
                ctx.session()
                    .discover()
                    .map_err(|e| HarnessError::refused("discover", e))?;
                FirstMove::Receive
            }
        };

        engine::run(ctx, first, config, &mut self).await
    }

    fn drives_configuration(self) -> bool {
        matches!(
            self,
            Procedure::SetConfiguration
                | Procedure::GetConfiguration
                | Procedure::Open
                | Procedure::Start
        )
    }

    fn wants_confirmations(self) -> bool {
        matches!(
            self,
            Procedure::GetConfiguration | Procedure::Open | Procedure::Start
        )
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl<S: Session> Reactor<S> for Procedure {
    fn on_event(
        &mut self,
        ctx: &mut ScenarioContext<S>,
        event: SessionEvent,
    ) -> Result<(), HarnessError> {
        match event {
            // Discovery-only procedures don't care how discovery ends.
            SessionEvent::Discovered { .. }
                if matches!(self, Procedure::Discover | Procedure::GetCapabilities) =>
            {
                Ok(())
            }
            SessionEvent::Discovered { seps, error } if self.drives_configuration() => {
                configure(ctx, &seps, error)
            }
            SessionEvent::Configured { stream, error, .. } if self.wants_confirmations() => {
                on_configured(ctx, stream, error)
            }
            SessionEvent::Opened { stream, error, .. } if self.wants_confirmations() => {
                on_opened(ctx, stream, error)
            }
            other => Err(HarnessError::UnexpectedEvent {
                position: ctx.cursor(),
                event: other.name(),
            }),
        }
    }
}

/// Configure the remote SEP matching ours once discovery completes.
fn configure<S: Session>(
    ctx: &mut ScenarioContext<S>,
    seps: &[RemoteSep],
    error: Option<AvdtpError>,
) -> Result<(), HarnessError> {
    if let Some(error) = error {
        return Err(HarnessError::rejected("discover", error));
    }
    if seps.is_empty() {
        return Err(HarnessError::rejected(
            "discover",
            "no remote stream endpoints",
        ));
    }

    let sep = ctx
        .sep()
        .ok_or_else(|| HarnessError::rejected("find_remote_sep", "no local SEP registered"))?;
    let remote = ctx
        .session()
        .find_remote_sep(sep)
        .ok_or_else(|| HarnessError::rejected("find_remote_sep", "no matching remote SEP"))?;

    let caps = vec![
        ServiceCapability::media_transport(),
        ServiceCapability::media_codec(MediaCodec::new(
            MediaType::Audio,
            CODEC_SBC,
            Bytes::from_static(SINK_CODEC_CONFIG),
        )),
    ];

    let stream = ctx
        .session()
        .set_configuration(&remote, sep, caps)
        .map_err(|e| HarnessError::refused("set_configuration", e))?;
    tracing::debug!(remote = remote.seid, local = sep.seid, stream = stream.0, "configuring");
    Ok(())
}

/// Follow a configuration with whatever the script expects the session to
/// send next.
fn on_configured<S: Session>(
    ctx: &mut ScenarioContext<S>,
    stream: StreamHandle,
    error: Option<AvdtpError>,
) -> Result<(), HarnessError> {
    if let Some(error) = error {
        return Err(HarnessError::rejected("set_configuration", error));
    }

    match ctx.peek().signal_id() {
        Some(signal_id::GET_CONFIGURATION) => ctx
            .session()
            .get_configuration(stream)
            .map_err(|e| HarnessError::refused("get_configuration", e)),
        Some(signal_id::OPEN) => ctx
            .session()
            .open(stream)
            .map_err(|e| HarnessError::refused("open", e)),
        _ => Err(HarnessError::UnexpectedEvent {
            position: ctx.cursor(),
            event: "configured",
        }),
    }
}

/// Attach a media transport to the opened stream and start it.
fn on_opened<S: Session>(
    ctx: &mut ScenarioContext<S>,
    stream: StreamHandle,
    error: Option<AvdtpError>,
) -> Result<(), HarnessError> {
    if let Some(error) = error {
        return Err(HarnessError::rejected("open", error));
    }

    let transport: OwnedFd = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .map_err(HarnessError::Fixture)?
        .into();

    ctx.session()
        .set_transport(stream, transport, DEFAULT_MTU, DEFAULT_MTU)
        .map_err(|e| HarnessError::refused("set_transport", e))?;
    ctx.session()
        .start(stream)
        .map_err(|e| HarnessError::refused("start", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_seps() {
        assert!(Procedure::Discover.local_sep().is_none());
        assert!(Procedure::GetCapabilities.local_sep().is_none());

        let server = Procedure::Server.local_sep().unwrap();
        assert_eq!(server.sep_type, SepType::Source);
        assert!(!server.confirmations);
        assert_eq!(server.capabilities.len(), 2);

        let set = Procedure::SetConfiguration.local_sep().unwrap();
        assert_eq!(set.sep_type, SepType::Sink);
        assert!(!set.confirmations);

        for procedure in [Procedure::GetConfiguration, Procedure::Open, Procedure::Start] {
            assert!(procedure.local_sep().unwrap().confirmations);
        }
    }
}
