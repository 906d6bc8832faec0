use std::path::{Path, PathBuf};

use super::types::AppConfig;

/// Get the default taskcue data directory: ~/.taskcue
pub fn get_taskcue_data_dir() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(PathBuf::from(home).join(".taskcue"))
}

pub fn load_default() -> anyhow::Result<AppConfig> {
    // Priority 1: ~/.taskcue/config.toml (highest)
    let data_dir = get_taskcue_data_dir()?;
    let user_config = data_dir.join("config.toml");

    // Priority 2: ./config.toml (current directory)
    let local_config = Path::new("config.toml");

    let mut cfg: AppConfig = if user_config.exists() {
        load_from_path(&user_config)?
    } else if local_config.exists() {
        load_from_path(local_config)?
    } else {
        AppConfig::default()
    };

    apply_env_overrides(&mut cfg);
    expand_paths(&mut cfg);

    Ok(cfg)
}

/// Loads an explicitly chosen file, with the same environment overrides and
/// path expansion as [`load_default`].
pub fn load_file(path: &Path) -> anyhow::Result<AppConfig> {
    let mut cfg = load_from_path(path)?;
    apply_env_overrides(&mut cfg);
    expand_paths(&mut cfg);
    Ok(cfg)
}

pub fn load_from_path(path: &Path) -> anyhow::Result<AppConfig> {
    let s = std::fs::read_to_string(path)?;
    Ok(toml::from_str::<AppConfig>(&s)?)
}

fn apply_env_overrides(cfg: &mut AppConfig) {
    // Environment variable overrides (Priority 0: highest)
    if let Ok(v) = std::env::var("TASKCUE_CATALOG") {
        if !v.trim().is_empty() {
            cfg.catalog_path = v;
        }
    }
    if let Ok(v) = std::env::var("TASKCUE_SERVICE_LOGS") {
        if !v.trim().is_empty() {
            cfg.supervisor.logs_directory = v;
        }
    }
    if let Ok(v) = std::env::var("TASKCUE_SETTINGS") {
        if !v.trim().is_empty() {
            cfg.scheduler.settings_path = v;
        }
    }
    if let Some(ms) = std::env::var("TASKCUE_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        cfg.engine.timeout_ms = ms;
    }
}

fn expand_paths(cfg: &mut AppConfig) {
    cfg.catalog_path = expand(&cfg.catalog_path);
    cfg.supervisor.logs_directory = expand(&cfg.supervisor.logs_directory);
    cfg.scheduler.settings_path = expand(&cfg.scheduler.settings_path);
    if let Some(dir) = cfg.logging.directory.as_mut() {
        *dir = expand(dir);
    }
}

fn expand(path: &str) -> String {
    shellexpand::tilde(path).into_owned()
}
