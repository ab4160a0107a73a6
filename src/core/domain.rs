use std::path::PathBuf;

use serde::Serialize;

/// Appended to whatever output was captured when the deadline elapses.
pub const TIMEOUT_MARKER: &str = "\n\n[Execution timed out]";

/// Returned by a version query that produced no output.
pub const VERSION_FALLBACK: &str = "interpreter ready";

/// Returned by a run that exited successfully without writing anything.
pub const NO_OUTPUT: &str = "Execution finished (no output).";

pub const SAFE_FLAG: &str = "--safe";
pub const VERSION_FLAG: &str = "--version";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provenance {
    Bundled,
    Cached,
    Downloaded,
}

/// A resolved interpreter executable, already marked executable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BinaryHandle {
    pub path: PathBuf,
    pub provenance: Provenance,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub source_code: String,
    pub inputs: Vec<String>,
}

impl ExecutionRequest {
    pub fn new(source_code: impl Into<String>, inputs: Vec<String>) -> Self {
        Self {
            source_code: source_code.into(),
            inputs,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Completed,
    TimedOut,
    SpawnFailed,
    ProcessErrorNoOutput,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionResult {
    pub combined_output: String,
    pub termination_reason: TerminationReason,
}

impl ExecutionResult {
    /// Builds the result of a process that exited before the deadline.
    ///
    /// A failing exit status only turns into a process error when both
    /// streams were empty. Interpreter runtime errors arrive on stderr and
    /// are returned like any other output.
    pub fn from_exit(stdout: &[u8], stderr: &[u8], failure: Option<String>) -> Self {
        let combined_output = concat_streams(stdout, stderr);

        match failure {
            Some(description) if combined_output.is_empty() => Self {
                combined_output: process_error(&description),
                termination_reason: TerminationReason::ProcessErrorNoOutput,
            },
            _ if combined_output.is_empty() => Self {
                combined_output: NO_OUTPUT.to_string(),
                termination_reason: TerminationReason::Completed,
            },
            _ => Self {
                combined_output,
                termination_reason: TerminationReason::Completed,
            },
        }
    }

    pub fn timed_out(stdout: &[u8], stderr: &[u8]) -> Self {
        let mut combined_output = concat_streams(stdout, stderr);
        combined_output.push_str(TIMEOUT_MARKER);

        Self {
            combined_output,
            termination_reason: TerminationReason::TimedOut,
        }
    }

    pub fn spawn_failed(description: &str) -> Self {
        Self {
            combined_output: process_error(description),
            termination_reason: TerminationReason::SpawnFailed,
        }
    }
}

fn concat_streams(stdout: &[u8], stderr: &[u8]) -> String {
    let mut combined = String::from_utf8_lossy(stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(stderr));
    combined
}

fn process_error(description: &str) -> String {
    format!("Process Error: {}", description)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Red,
    Yellow,
    Blue,
}

impl Color {
    /// Maps a bright foreground SGR code to a color.
    pub fn from_sgr(code: u32) -> Option<Self> {
        match code {
            91 => Some(Color::Red),
            93 => Some(Color::Yellow),
            94 => Some(Color::Blue),
            _ => None,
        }
    }
}

/// A run of text sharing one style. `bold` is `None` until a code sets it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StyledSegment {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
}
