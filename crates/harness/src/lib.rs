//! apiprobe harness
//!
//! Verifies the observable contract of a third-party REST API by running
//! declarative scenarios and probes against it:
//! - Wraps every HTTP response in a soft-parsing [`ResponseEnvelope`]
//! - Evaluates non-raising contract checks that each yield an [`AssertionResult`]
//! - Runs ordered scenarios that thread extracted values between steps
//! - Probes idempotency (same token twice) and rate limiting (classified bursts)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      SuiteRunner                            │
//! │    run_all(defs) -> SuiteReport   (N scenarios in parallel) │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ScenarioRunner        IdempotencyProbe    RateLimitProbe   │
//! │    for step in order:    call twice,        N sequential    │
//! │      substitute {{var}}  compare bodies     calls, classify │
//! │      Transport::send ─────────┬───────────────────┘         │
//! │      ResponseEnvelope ◄───────┘                             │
//! │      Check::evaluate -> AssertionResult                     │
//! │      extract -> ScenarioContext                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transport (trait)  ── ReqwestTransport                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod assertion;
pub mod config;
pub mod context;
pub mod envelope;
pub mod error;
pub mod probe;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod status;
pub mod transport;

#[cfg(test)]
mod testing;

pub use assertion::{AssertionResult, Check, ValueKind};
pub use config::HarnessConfig;
pub use context::ScenarioContext;
pub use envelope::ResponseEnvelope;
pub use error::{HarnessError, HarnessResult};
pub use probe::{IdempotencyProbe, RateLimitProbe};
pub use report::{ScenarioReport, StepOutcome, SuiteReport};
pub use runner::{ScenarioRunner, SuiteRunner};
pub use scenario::{Definition, RequestTemplate, Scenario, ScenarioStep};
pub use status::{StatusPattern, StatusSet};
pub use transport::{Method, ReqwestTransport, Transport};
