//! Service lifecycle states and the table of legal transitions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Restarting,
    Crashed,
    Stopping,
}

impl ServiceState {
    /// The process (or its restart) is still being looked after.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Restarting | Self::Stopping)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid service transition from {from:?} to {to:?}")]
pub struct TransitionError {
    pub from: ServiceState,
    pub to: ServiceState,
}

pub struct ServiceTransition;

impl ServiceTransition {
    pub fn validate(from: ServiceState, to: ServiceState) -> Result<(), TransitionError> {
        use ServiceState::*;

        let is_valid = matches!(
            (from, to),
            (Stopped, Starting)
                | (Starting, Running)
                // spawn failed during a restart
                | (Starting, Crashed)
                | (Running, Stopping)
                | (Running, Crashed)
                | (Stopping, Stopped)
                | (Crashed, Restarting)
                | (Crashed, Stopped)
                | (Restarting, Starting)
                | (Restarting, Stopping)
        );

        if is_valid {
            Ok(())
        } else {
            Err(TransitionError { from, to })
        }
    }
}
