use thiserror::Error;

use crate::task::InvocationKind;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("service '{0}' is already running")]
    AlreadyExists(String),

    #[error("service '{0}' not found")]
    NotFound(String),

    #[error("task '{name}' has invocation kind {kind:?}, not a background service")]
    InvalidInvocationKind { name: String, kind: InvocationKind },

    #[error("argument validation failed: {0}")]
    Validation(String),

    #[error("failed to launch service '{name}': {source}")]
    Launch {
        name: String,
        source: std::io::Error,
    },

    #[error("log sink error at {path}: {source}")]
    Log {
        path: String,
        source: std::io::Error,
    },
}
