//! The stdout contract of process-backed tasks: the last non-empty line is a
//! JSON object `{"success": bool, "message": string, "data"?, "output"?, "error"?}`.

use serde::Deserialize;
use serde_json::Value;

use super::result::{non_empty, ExecutionResult, FailureKind};
use crate::process::ExitInfo;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskReport {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Parses the final line of `stdout`. On success also returns the text that
/// preceded that line.
pub fn parse_report(stdout: &str) -> Result<(TaskReport, &str), String> {
    let trimmed = stdout.trim_end();
    let (before, last) = match trimmed.rfind('\n') {
        Some(pos) => (&trimmed[..pos], &trimmed[pos + 1..]),
        None => ("", trimmed),
    };
    let last = last.trim();
    if last.is_empty() {
        return Err("task produced no output".to_string());
    }

    let value: Value =
        serde_json::from_str(last).map_err(|e| format!("last line is not JSON ({e})"))?;
    if !value.is_object() {
        return Err("last line is JSON but not an object".to_string());
    }
    let report = serde_json::from_value::<TaskReport>(value)
        .map_err(|e| format!("result object is missing required fields ({e})"))?;
    Ok((report, before))
}

/// Normalizes a finished process into a result.
pub fn interpret(stdout: &str, stderr: &str, exit: ExitInfo) -> ExecutionResult {
    let code = exit.reported_code();
    match parse_report(stdout) {
        Ok((report, before)) => {
            let result = if report.success {
                ExecutionResult::ok(report.message)
            } else {
                ExecutionResult {
                    success: false,
                    message: report.message,
                    failure: Some(FailureKind::Runtime),
                    ..ExecutionResult::ok("")
                }
            };
            result
                .with_data(report.data)
                .with_output(report.output.or_else(|| non_empty(before)))
                .with_error(report.error.or_else(|| non_empty(stderr)))
                .with_exit_code(code)
        }
        Err(reason) => ExecutionResult::failed(
            FailureKind::Protocol,
            format!("malformed task output: {reason} (exit code {code})"),
        )
        .with_output(Some(stdout.to_string()))
        .with_error(non_empty(stderr))
        .with_exit_code(code),
    }
}
