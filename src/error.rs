use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

/// Classification of every way a verification request can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MethodNotAllowed,
    BadRequest,
    SpawnFailure,
    EngineFailure,
    MalformedOutput,
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::MethodNotAllowed => "method_not_allowed",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::SpawnFailure => "spawn_failure",
            ErrorKind::EngineFailure => "engine_failure",
            ErrorKind::MalformedOutput => "malformed_output",
            ErrorKind::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

/// Rejections produced before any engine process is started.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Missing proof or publicInputs")]
    BadRequest,
}

impl RequestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RequestError::MethodNotAllowed => ErrorKind::MethodNotAllowed,
            RequestError::BadRequest => ErrorKind::BadRequest,
        }
    }
}

/// Failures of a single engine invocation.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Verifier exited with {}: {stderr}", exit_code_label(.code))]
    EngineFailure { code: Option<i32>, stderr: String },

    #[error("Verifier output is not valid JSON: {reason}")]
    MalformedOutput { output: String, reason: String },

    #[error("Verifier timed out after {}ms", millis(.0))]
    Timeout(Duration),

    #[error("Verifier I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to encode verifier input: {0}")]
    Encode(#[from] serde_json::Error),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Spawn { .. } => ErrorKind::SpawnFailure,
            DispatchError::EngineFailure { .. } => ErrorKind::EngineFailure,
            DispatchError::MalformedOutput { .. } => ErrorKind::MalformedOutput,
            DispatchError::Timeout(_) => ErrorKind::Timeout,
            DispatchError::Io(_) | DispatchError::Encode(_) => ErrorKind::EngineFailure,
        }
    }

    /// Diagnostic text for the caller: stderr on engine failure, raw stdout on
    /// malformed output, the error message otherwise.
    pub fn detail(&self) -> String {
        match self {
            DispatchError::EngineFailure { stderr, .. } => stderr.clone(),
            DispatchError::MalformedOutput { output, .. } => output.clone(),
            other => other.to_string(),
        }
    }
}

fn millis(limit: &Duration) -> u128 {
    limit.as_millis()
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "no status (terminated by signal)".to_string(),
    }
}
