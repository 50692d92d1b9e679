//! Probes: specialised runs that verify a cross-cutting property
//! rather than a business flow

pub mod idempotency;
pub mod rate_limit;

pub use idempotency::{Equivalence, IdempotencyProbe, IdempotencyReport, TokenSource};
pub use rate_limit::{AttemptOutcome, AttemptRecord, RateLimitProbe, RateLimitReport, StatusClass};

use serde::{Deserialize, Serialize};

use crate::envelope::ResponseEnvelope;
use crate::error::ParseError;

/// Condensed view of one probe call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSummary {
    pub status: u16,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<ParseError>,
}

impl From<&ResponseEnvelope> for CallSummary {
    fn from(envelope: &ResponseEnvelope) -> Self {
        Self {
            status: envelope.status(),
            duration_ms: envelope.elapsed().as_millis() as u64,
            parse_error: envelope.parse_error().cloned(),
        }
    }
}
