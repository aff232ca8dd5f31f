//! The scenario catalog.
//!
//! Stream management scenarios of the signaling test suite, each an exact
//! frame exchange. Client scenarios carry the transaction label the session
//! must use for its first command.

use avdtp_spec_proto::{Session, SessionParams};

use crate::context::ScenarioContext;
use crate::engine::{RunConfig, RunReport};
use crate::error::HarnessError;
use crate::frame::Script;
use crate::procedures::Procedure;
use crate::testcase::TestResult;
use crate::trace::Trace;

/// A named scenario: procedure, script and session parameters.
#[derive(Clone, Debug)]
pub struct Scenario {
    pub name: &'static str,
    pub procedure: Procedure,
    pub frames: &'static [&'static [u8]],
    pub params: SessionParams,
}

impl Scenario {
    pub fn new(
        name: &'static str,
        procedure: Procedure,
        frames: &'static [&'static [u8]],
    ) -> Self {
        Self {
            name,
            procedure,
            frames,
            params: SessionParams::default(),
        }
    }

    pub fn first_transaction(mut self, label: u8) -> Self {
        self.params = self.params.with_first_transaction(label);
        self
    }

    /// Run against a fresh `S` and return the report.
    pub async fn drive<S: Session>(&self, config: &RunConfig) -> Result<RunReport, HarnessError> {
        self.drive_traced::<S>(config).await.0
    }

    async fn drive_traced<S: Session>(
        &self,
        config: &RunConfig,
    ) -> (Result<RunReport, HarnessError>, Trace) {
        let script = match Script::from_static(self.frames) {
            Ok(script) => script,
            Err(e) => return (Err(e), Trace::default()),
        };
        let mut ctx = match ScenarioContext::<S>::create(script, self.params) {
            Ok(ctx) => ctx,
            Err(e) => return (Err(e), Trace::default()),
        };

        let result = self.procedure.execute(&mut ctx, config).await;
        (result, ctx.teardown())
    }

    /// Run against a fresh `S`.
    pub async fn run<S: Session>(&self, config: &RunConfig) -> TestResult {
        tracing::info!(scenario = self.name, procedure = %self.procedure, "running scenario");

        let (result, trace) = self.drive_traced::<S>(config).await;
        match result {
            Ok(report) => {
                tracing::info!(
                    scenario = self.name,
                    frames = report.position,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "scenario passed"
                );
                TestResult::pass().with_trace(trace)
            }
            Err(e) => {
                tracing::info!(scenario = self.name, error = %e, "scenario failed");
                TestResult::fail(format!("{}: {}", self.name, e)).with_trace(trace)
            }
        }
    }
}

/// Outcome of one scenario in a batch run.
#[derive(Debug)]
pub struct Outcome {
    pub name: &'static str,
    pub result: TestResult,
}

/// Lookup and execution over a scenario table.
#[derive(Clone, Debug)]
pub struct Registry {
    scenarios: Vec<Scenario>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Registry over the built-in catalog.
    pub fn new() -> Self {
        Self::with_scenarios(catalog())
    }

    pub fn with_scenarios(scenarios: Vec<Scenario>) -> Self {
        Self { scenarios }
    }

    pub fn find(&self, name: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.name == name)
    }

    pub fn list(&self) -> &[Scenario] {
        &self.scenarios
    }

    pub async fn run_one<S: Session>(&self, name: &str, config: &RunConfig) -> TestResult {
        match self.find(name) {
            Some(scenario) => scenario.run::<S>(config).await,
            None => TestResult::fail(format!("unknown scenario: {}", name)),
        }
    }

    /// Run every scenario in order. A failure never stops the rest.
    pub async fn run_all<S: Session>(&self, config: &RunConfig) -> Vec<Outcome> {
        let mut outcomes = Vec::with_capacity(self.scenarios.len());
        for scenario in &self.scenarios {
            outcomes.push(Outcome {
                name: scenario.name,
                result: scenario.run::<S>(config).await,
            });
        }
        outcomes
    }
}

/// The built-in scenario table.
pub fn catalog() -> Vec<Scenario> {
    vec![
        Scenario::new("/TP/SIG/SMG/BV-05-C", Procedure::Discover, &[&[0x00, 0x01]]),
        Scenario::new(
            "/TP/SIG/SMG/BV-06-C",
            Procedure::Server,
            &[&[0x00, 0x01], &[0x02, 0x01, 0x04, 0x00]],
        ),
        Scenario::new(
            "/TP/SIG/SMG/BV-07-C",
            Procedure::GetCapabilities,
            &[&[0x10, 0x01], &[0x12, 0x01, 0x04, 0x00], &[0x20, 0x02, 0x04]],
        )
        .first_transaction(1),
        Scenario::new(
            "/TP/SIG/SMG/BV-08-C",
            Procedure::Server,
            &[
                &[0x00, 0x01],
                &[0x02, 0x01, 0x04, 0x00],
                &[0x10, 0x02, 0x04],
                &[0x12, 0x02, 0x01, 0x00, 0x07, 0x06, 0x00, 0x00, 0xff, 0xff, 0x02, 0x40],
            ],
        ),
        Scenario::new(
            "/TP/SIG/SMG/BV-09-C",
            Procedure::SetConfiguration,
            &[
                &[0x30, 0x01],
                &[0x32, 0x01, 0x04, 0x00],
                &[0x40, 0x02, 0x04],
                &[0x42, 0x02, 0x01, 0x00, 0x07, 0x06, 0x00, 0x00, 0xff, 0xff, 0x02, 0x40],
                &[
                    0x50, 0x03, 0x04, 0x04, 0x01, 0x00, 0x07, 0x06, 0x00, 0x00, 0x21, 0x02, 0x02,
                    0x20,
                ],
            ],
        )
        .first_transaction(3),
        Scenario::new(
            "/TP/SIG/SMG/BV-10-C",
            Procedure::Server,
            &[
                &[0x00, 0x01],
                &[0x02, 0x01, 0x04, 0x00],
                &[0x10, 0x02, 0x04],
                &[0x12, 0x02, 0x01, 0x00, 0x07, 0x06, 0x00, 0x00, 0xff, 0xff, 0x02, 0x40],
                &[
                    0x20, 0x03, 0x04, 0x04, 0x01, 0x00, 0x07, 0x06, 0x00, 0x00, 0x21, 0x02, 0x02,
                    0x20,
                ],
                &[0x22, 0x03],
            ],
        ),
        Scenario::new(
            "/TP/SIG/SMG/BV-11-C",
            Procedure::GetConfiguration,
            &[
                &[0x60, 0x01],
                &[0x62, 0x01, 0x04, 0x00],
                &[0x70, 0x02, 0x04],
                &[0x72, 0x02, 0x01, 0x00, 0x07, 0x06, 0x00, 0x00, 0xff, 0xff, 0x02, 0x40],
                &[
                    0x80, 0x03, 0x04, 0x04, 0x01, 0x00, 0x07, 0x06, 0x00, 0x00, 0x21, 0x02, 0x02,
                    0x20,
                ],
                &[0x82, 0x03],
                &[0x90, 0x04, 0x04],
            ],
        )
        .first_transaction(6),
        Scenario::new(
            "/TP/SIG/SMG/BV-12-C",
            Procedure::Server,
            &[
                &[0x00, 0x01],
                &[0x02, 0x01, 0x04, 0x00],
                &[0x10, 0x02, 0x04],
                &[0x12, 0x02, 0x01, 0x00, 0x07, 0x06, 0x00, 0x00, 0xff, 0xff, 0x02, 0x40],
                &[
                    0x20, 0x03, 0x04, 0x04, 0x01, 0x00, 0x07, 0x06, 0x00, 0x00, 0x21, 0x02, 0x02,
                    0x20,
                ],
                &[0x22, 0x03],
                &[0x30, 0x04, 0x04],
                &[0x32, 0x04, 0x01, 0x00, 0x07, 0x06, 0x00, 0x00, 0x21, 0x02, 0x02, 0x20],
            ],
        ),
        Scenario::new(
            "/TP/SIG/SMG/BV-15-C",
            Procedure::Open,
            &[
                &[0xa0, 0x01],
                &[0xa2, 0x01, 0x04, 0x00],
                &[0xb0, 0x02, 0x04],
                &[0xb2, 0x02, 0x01, 0x00, 0x07, 0x06, 0x00, 0x00, 0xff, 0xff, 0x02, 0x40],
                &[
                    0xc0, 0x03, 0x04, 0x04, 0x01, 0x00, 0x07, 0x06, 0x00, 0x00, 0x21, 0x02, 0x02,
                    0x20,
                ],
                &[0xc2, 0x03],
                &[0xd0, 0x06, 0x04],
            ],
        )
        .first_transaction(10),
        Scenario::new(
            "/TP/SIG/SMG/BV-16-C",
            Procedure::Server,
            &[
                &[0x00, 0x01],
                &[0x02, 0x01, 0x04, 0x00],
                &[0x10, 0x02, 0x04],
                &[0x12, 0x02, 0x01, 0x00, 0x07, 0x06, 0x00, 0x00, 0xff, 0xff, 0x02, 0x40],
                &[
                    0x20, 0x03, 0x04, 0x04, 0x01, 0x00, 0x07, 0x06, 0x00, 0x00, 0x21, 0x02, 0x02,
                    0x20,
                ],
                &[0x22, 0x03],
                &[0x30, 0x06, 0x04],
                &[0x32, 0x06],
            ],
        ),
        Scenario::new(
            "/TP/SIG/SMG/BV-17-C",
            Procedure::Start,
            &[
                &[0xe0, 0x01],
                &[0xe2, 0x01, 0x04, 0x00],
                &[0xf0, 0x02, 0x04],
                &[0xf2, 0x02, 0x01, 0x00, 0x07, 0x06, 0x00, 0x00, 0xff, 0xff, 0x02, 0x40],
                &[
                    0x00, 0x03, 0x04, 0x04, 0x01, 0x00, 0x07, 0x06, 0x00, 0x00, 0x21, 0x02, 0x02,
                    0x20,
                ],
                &[0x02, 0x03],
                &[0x10, 0x06, 0x04],
                &[0x12, 0x06],
                &[0x20, 0x07, 0x04],
            ],
        )
        .first_transaction(14),
    ]
}
