use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Why an execution failed. Every failure mode of the engine is one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Bad arguments; nothing was launched.
    Validation,
    /// The process could not be started or the code unit could not be loaded.
    Launch,
    /// Wall-clock budget exceeded; the process was terminated.
    Timeout,
    /// The task reported `success: false`, returned an error or panicked.
    Runtime,
    /// Output did not follow the result contract.
    Protocol,
    /// Background services are not run by the engine.
    InvalidInvocationKind,
}

impl FailureKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Validation => "ValidationError",
            Self::Launch => "LaunchError",
            Self::Timeout => "TimeoutError",
            Self::Runtime => "RuntimeFailure",
            Self::Protocol => "ProtocolError",
            Self::InvalidInvocationKind => "InvalidInvocationKind",
        }
    }
}

/// Structured outcome of one task run. Owned by the caller, never mutated
/// after the engine returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub duration_ms: u64,

    /// Only set for process-backed executions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl ExecutionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            output: None,
            error: None,
            duration_ms: 0,
            exit_code: None,
            failure: None,
        }
    }

    /// Failure whose message is prefixed with the kind label, e.g.
    /// `TimeoutError: Task execution timed out (30 seconds)`.
    pub fn failed(kind: FailureKind, detail: impl AsRef<str>) -> Self {
        Self {
            success: false,
            message: format!("{}: {}", kind.label(), detail.as_ref()),
            failure: Some(kind),
            ..Self::ok("")
        }
    }

    pub fn with_data(mut self, data: Option<Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_output(mut self, output: Option<String>) -> Self {
        self.output = output;
        self
    }

    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = error;
        self
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn is_failure(&self, kind: FailureKind) -> bool {
        self.failure == Some(kind)
    }
}

pub(crate) fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    (!t.is_empty()).then(|| t.to_string())
}
