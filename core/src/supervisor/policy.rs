use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::SupervisorConfig;

/// Restart behaviour of one service after an unexpected exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePolicy {
    pub auto_restart: bool,
    pub max_restarts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl ServicePolicy {
    /// Applies the per-service overrides that are set, keeping `self` for the rest.
    pub fn with_overrides(mut self, overrides: &PolicyOverrides) -> Self {
        if let Some(v) = overrides.auto_restart {
            self.auto_restart = v;
        }
        if let Some(v) = overrides.max_restarts {
            self.max_restarts = v;
        }
        if let Some(v) = overrides.restart_delay_ms {
            self.backoff_base_ms = v;
            self.backoff_max_ms = self.backoff_max_ms.max(v);
        }
        self
    }

    /// Budget left to spend on restarts; zero when auto-restart is off.
    pub fn restart_budget(&self) -> u32 {
        if self.auto_restart {
            self.max_restarts
        } else {
            0
        }
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

impl From<&SupervisorConfig> for ServicePolicy {
    fn from(cfg: &SupervisorConfig) -> Self {
        Self {
            auto_restart: cfg.auto_restart,
            max_restarts: cfg.max_restarts,
            backoff_base_ms: cfg.backoff_base_ms,
            backoff_max_ms: cfg.backoff_max_ms,
        }
    }
}

/// Optional per-service settings, as written next to a task in a catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyOverrides {
    #[serde(default)]
    pub auto_restart: Option<bool>,
    #[serde(default)]
    pub max_restarts: Option<u32>,
    /// First backoff delay; later ones still double up to the configured cap.
    #[serde(default)]
    pub restart_delay_ms: Option<u64>,
}
