use serde::{Deserialize, Serialize};

use crate::ansi;
use crate::core::domain::{ExecutionResult, StyledSegment, TerminationReason};

/// Structured `POST` body. Requests without a JSON content type are
/// treated as raw source text instead.
#[derive(Debug, Deserialize)]
pub struct EvalPayload {
    pub code: String,
    #[serde(default)]
    pub inputs: Vec<String>,
}

/// Sent instead of plain text when the client accepts JSON.
#[derive(Debug, Serialize)]
pub struct EvalResponse {
    pub output: String,
    pub termination: TerminationReason,
    pub segments: Vec<StyledSegment>,
}

impl From<ExecutionResult> for EvalResponse {
    fn from(result: ExecutionResult) -> Self {
        let segments = ansi::parse(&result.combined_output);
        Self {
            output: result.combined_output,
            termination: result.termination_reason,
            segments,
        }
    }
}
