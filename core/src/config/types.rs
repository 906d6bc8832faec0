use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// TOML file listing the task descriptors known to this host.
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,

    /// Task names started as background services by `taskcue daemon`.
    #[serde(default)]
    pub services: Vec<String>,
}

fn default_catalog_path() -> String {
    "./tasks.toml".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            engine: EngineConfig::default(),
            supervisor: SupervisorConfig::default(),
            scheduler: SchedulerConfig::default(),
            catalog_path: default_catalog_path(),
            services: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory` (or OS temp dir if unset).
    #[serde(default = "default_logging_file")]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "taskcue_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    /// Optional directory for log files. If empty or unset, uses OS temp dir.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_file() -> bool {
    false
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: default_logging_file(),
            level: default_logging_level(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Wall-clock budget for one external-process execution.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// How long a timed-out process gets between the terminate request and the kill.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,

    /// Per-stream capture bound for stdout/stderr.
    #[serde(default = "default_capture_bytes")]
    pub capture_bytes: usize,

    /// File extension (without dot) -> interpreter program.
    #[serde(default = "default_interpreters")]
    pub interpreters: HashMap<String, String>,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Minimum spacing between two stale-unit sweeps.
    #[serde(default = "default_cache_cleanup_secs")]
    pub cache_cleanup_secs: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_kill_grace_ms() -> u64 {
    5_000
}

fn default_capture_bytes() -> usize {
    256 * 1024
}

fn default_interpreters() -> HashMap<String, String> {
    let python = if cfg!(windows) { "python" } else { "python3" };
    HashMap::from([
        ("py".to_string(), python.to_string()),
        ("sh".to_string(), "sh".to_string()),
        ("js".to_string(), "node".to_string()),
        ("ps1".to_string(), "powershell".to_string()),
    ])
}

fn default_cache_capacity() -> usize {
    20
}

fn default_cache_ttl_secs() -> u64 {
    1_800
}

fn default_cache_cleanup_secs() -> u64 {
    300
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            kill_grace_ms: default_kill_grace_ms(),
            capture_bytes: default_capture_bytes(),
            interpreters: default_interpreters(),
            cache_capacity: default_cache_capacity(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_cleanup_secs: default_cache_cleanup_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_logs_directory")]
    pub logs_directory: String,

    /// Restart crashed services at all. Catalog entries may override this
    /// and the two fields below per service.
    #[serde(default = "default_auto_restart")]
    pub auto_restart: bool,

    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Grace used by `stop_all_services` and by the daemon on shutdown.
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,

    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    #[serde(default)]
    pub log_rotation: LogRotationConfig,
}

fn default_logs_directory() -> String {
    "logs/services".to_string()
}

fn default_auto_restart() -> bool {
    true
}

fn default_max_restarts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    5_000
}

fn default_backoff_max_ms() -> u64 {
    300_000
}

fn default_stop_grace_ms() -> u64 {
    10_000
}

fn default_event_channel_capacity() -> usize {
    1_000
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            logs_directory: default_logs_directory(),
            auto_restart: default_auto_restart(),
            max_restarts: default_max_restarts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            event_channel_capacity: default_event_channel_capacity(),
            log_rotation: LogRotationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRotationConfig {
    /// Size at which `<task>.log` is rotated to `<task>.log.1`.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Number of rotated files kept next to the live one.
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,

    /// Lines buffered between a service's pumps and its writer.
    #[serde(default = "default_log_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_max_file_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_max_backups() -> usize {
    3
}

fn default_log_channel_capacity() -> usize {
    2_048
}

impl Default for LogRotationConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            max_backups: default_max_backups(),
            channel_capacity: default_log_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    #[serde(default = "default_fire_channel_capacity")]
    pub fire_channel_capacity: usize,

    /// JSON file backing persisted schedule state.
    #[serde(default = "default_settings_path")]
    pub settings_path: String,
}

fn default_fire_channel_capacity() -> usize {
    256
}

fn default_settings_path() -> String {
    "./settings.json".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: default_event_channel_capacity(),
            fire_channel_capacity: default_fire_channel_capacity(),
            settings_path: default_settings_path(),
        }
    }
}
