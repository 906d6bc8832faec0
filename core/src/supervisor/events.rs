use serde::Serialize;

use super::state::ServiceState;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceEvent {
    StateChanged {
        service: String,
        from: ServiceState,
        to: ServiceState,
    },
    Crashed {
        service: String,
        exit_code: i32,
    },
    Restarted {
        service: String,
        attempt: u32,
        pid: u32,
    },
    RestartFailed {
        service: String,
        error: String,
    },
    RestartLimitReached {
        service: String,
        restarts: u32,
    },
}

impl ServiceEvent {
    pub fn service(&self) -> &str {
        match self {
            Self::StateChanged { service, .. }
            | Self::Crashed { service, .. }
            | Self::Restarted { service, .. }
            | Self::RestartFailed { service, .. }
            | Self::RestartLimitReached { service, .. } => service,
        }
    }
}
