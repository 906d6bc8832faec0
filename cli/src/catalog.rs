//! Task catalog: the TOML file that stands in for task discovery.
//!
//! ```toml
//! [[tasks]]
//! name = "backup"
//! path = "scripts/backup.py"
//! kind = "external_process"
//! arguments = [{ name = "target", required = true }]
//!
//! [tasks.args]
//! target = "/srv/data"
//!
//! [[tasks]]
//! name = "watcher"
//! path = "scripts/watch.py"
//! kind = "background_service"
//!
//! [tasks.restart]
//! auto_restart = false
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use taskcue_core::api::{PolicyOverrides, TaskArgs, TaskDescriptor};

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    #[serde(flatten)]
    pub descriptor: TaskDescriptor,

    /// Arguments used when the task is run by a schedule or as a service.
    #[serde(default)]
    pub args: TaskArgs,

    /// Restart settings for background services, over the supervisor defaults.
    #[serde(default)]
    pub restart: PolicyOverrides,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    tasks: Vec<CatalogEntry>,
}

#[derive(Debug, Default)]
pub struct Catalog {
    entries: HashMap<String, CatalogEntry>,
}

impl Catalog {
    /// Relative task paths are resolved against the catalog's directory.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read catalog {}: {e}", path.display()))?;
        let file: CatalogFile = toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("invalid catalog {}: {e}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let mut entries = HashMap::new();
        for mut entry in file.tasks {
            if entry.descriptor.path.is_relative() {
                entry.descriptor.path = base.join(&entry.descriptor.path);
            }
            let name = entry.descriptor.name.clone();
            if entries.insert(name.clone(), entry).is_some() {
                anyhow::bail!("task '{name}' is listed twice in {}", path.display());
            }
        }
        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
