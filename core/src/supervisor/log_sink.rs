use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::config::LogRotationConfig;
use crate::error::SupervisorError;
use crate::process::{LineTap, LineTapSink};

/// Cloneable front of a service's log writer. Lines are handed over with
/// `try_send`; when the channel is full the line is dropped and counted so
/// the monitored process never waits on disk.
#[derive(Clone)]
pub struct ServiceLog {
    tx: mpsc::Sender<String>,
    dropped: Arc<AtomicU64>,
    path: PathBuf,
}

impl ServiceLog {
    /// Opens (appending) `<dir>/<file_stem>.log` and starts its writer task.
    pub fn open(
        dir: &Path,
        file_stem: &str,
        cfg: &LogRotationConfig,
    ) -> Result<Self, SupervisorError> {
        std::fs::create_dir_all(dir).map_err(|e| log_err(dir, e))?;
        let path = dir.join(format!("{file_stem}.log"));
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| log_err(&path, e))?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);

        let (tx, rx) = mpsc::channel::<String>(cfg.channel_capacity.max(1));
        let writer = RotatingWriter {
            path: path.clone(),
            file: File::from_std(file),
            size,
            max_bytes: cfg.max_file_bytes.max(1),
            max_backups: cfg.max_backups,
        };
        tokio::spawn(writer.run(rx));

        Ok(Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Supervisor's own annotations (start, crash, stop) interleaved with output.
    pub fn note(&self, text: impl AsRef<str>) {
        self.push(format!("{} [taskcue] {}", timestamp(), text.as_ref()));
    }

    fn push(&self, line: String) {
        if self.tx.try_send(line).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl LineTapSink for ServiceLog {
    fn tap(&self, tap: LineTap) {
        self.push(format!("{} [{}] {}", timestamp(), tap.stream.label(), tap.line));
    }
}

struct RotatingWriter {
    path: PathBuf,
    file: File,
    size: u64,
    max_bytes: u64,
    max_backups: usize,
}

impl RotatingWriter {
    async fn run(mut self, mut rx: mpsc::Receiver<String>) {
        while let Some(mut line) = rx.recv().await {
            if !line.ends_with('\n') {
                line.push('\n');
            }
            if self.size > 0 && self.size + line.len() as u64 > self.max_bytes {
                if let Err(e) = self.rotate().await {
                    tracing::warn!(path = %self.path.display(), error = %e, "log rotation failed");
                    return;
                }
            }
            if let Err(e) = self.file.write_all(line.as_bytes()).await {
                tracing::warn!(path = %self.path.display(), error = %e, "log write failed");
                return;
            }
            self.size += line.len() as u64;
            if rx.is_empty() {
                let _ = self.file.flush().await;
            }
        }
        let _ = self.file.flush().await;
    }

    /// `x.log` becomes `x.log.1`, `x.log.1` becomes `x.log.2` and so on; the
    /// file past `max_backups` is deleted.
    async fn rotate(&mut self) -> std::io::Result<()> {
        self.file.flush().await?;
        if self.max_backups == 0 {
            self.file = File::create(&self.path).await?;
            self.size = 0;
            return Ok(());
        }

        let _ = tokio::fs::remove_file(backup(&self.path, self.max_backups)).await;
        for n in (1..self.max_backups).rev() {
            let from = backup(&self.path, n);
            if tokio::fs::try_exists(&from).await.unwrap_or(false) {
                tokio::fs::rename(&from, backup(&self.path, n + 1)).await?;
            }
        }
        tokio::fs::rename(&self.path, backup(&self.path, 1)).await?;
        self.file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        self.size = 0;
        tracing::debug!(path = %self.path.display(), "service log rotated");
        Ok(())
    }
}

fn backup(path: &Path, n: usize) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(format!(".{n}"));
    PathBuf::from(s)
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

fn log_err(path: &Path, source: std::io::Error) -> SupervisorError {
    SupervisorError::Log {
        path: path.display().to_string(),
        source,
    }
}
