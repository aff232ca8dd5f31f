//! Per-run scenario state.

use avdtp_spec_proto::{
    EventReceiver, LocalSep, LocalSepConfig, Session, SessionParams, event_channel,
};

use crate::channel::{self, HarnessEndpoint};
use crate::engine::EngineState;
use crate::error::HarnessError;
use crate::frame::{Frame, Script};
use crate::trace::Trace;

/// Everything one scenario run mutates: the harness endpoint, the script and
/// its cursor, the session with its event queue, and the local SEP.
///
/// Created fresh for every run and consumed by [`ScenarioContext::teardown`].
pub struct ScenarioContext<S: Session> {
    pub(crate) harness: HarnessEndpoint,
    pub(crate) events: EventReceiver,
    pub(crate) state: EngineState,
    pub(crate) trace: Trace,
    script: Script,
    cursor: usize,
    session: S,
    sep: Option<LocalSep>,
}

impl<S: Session> ScenarioContext<S> {
    /// Open the channel and bind a new session to it.
    ///
    /// Must be called from within the runtime the run will use.
    pub fn create(script: Script, params: SessionParams) -> Result<Self, HarnessError> {
        let (endpoint, harness) = channel::create()?;
        let (tx, events) = event_channel();
        let session = S::create(endpoint, params, tx).map_err(HarnessError::Fixture)?;

        Ok(Self {
            harness,
            events,
            state: EngineState::Idle,
            trace: Trace::default(),
            script,
            cursor: 0,
            session,
            sep: None,
        })
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// Register the run's local SEP.
    pub fn register_sep(&mut self, config: LocalSepConfig) -> Result<LocalSep, HarnessError> {
        let sep = self
            .session
            .register_sep(config)
            .map_err(|e| HarnessError::refused("register_sep", e))?;
        tracing::debug!(seid = sep.seid, "local SEP registered");
        self.sep = Some(sep);
        Ok(sep)
    }

    pub fn sep(&self) -> Option<LocalSep> {
        self.sep
    }

    /// The next unconsumed script frame.
    pub fn peek(&self) -> &Frame {
        self.script.next(self.cursor)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub(crate) fn advance(&mut self) {
        self.cursor += 1;
    }

    pub(crate) fn at_end(&self) -> bool {
        self.peek().is_end()
    }

    /// Unregister the SEP, release the session and hand back the trace.
    pub fn teardown(self) -> Trace {
        if let Some(sep) = self.sep
            && let Err(e) = self.session.unregister_sep(sep)
        {
            tracing::warn!(seid = sep.seid, error = %e, "failed to unregister SEP");
        }
        self.session.shutdown();
        self.trace
    }
}
