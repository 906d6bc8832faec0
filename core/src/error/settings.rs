use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("settings io error at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("settings decode error: {0}")]
    Decode(#[from] serde_json::Error),
}
