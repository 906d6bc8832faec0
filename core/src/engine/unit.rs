//! In-process code units: task logic compiled into the host and bound to a
//! task file path, loaded through a [`UnitLoader`].

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Context};
use serde_json::Value;

/// A loaded task unit.
pub trait CodeUnit: Send + Sync {
    fn has_entry(&self, name: &str) -> bool;

    /// Invokes an entry function with no arguments.
    fn call(&self, entry: &str) -> anyhow::Result<Value>;

    /// Executes the unit's top-level body in `scope`.
    fn run_body(&self, scope: &mut ScriptScope) -> anyhow::Result<()>;
}

/// Turns a task file into a loaded unit. Called once per (path, mtime) for
/// cached units and once per call for scripts.
pub trait UnitLoader: Send + Sync {
    fn load(&self, path: &Path) -> anyhow::Result<Arc<dyn CodeUnit>>;
}

/// Fresh namespace handed to a script body. Nothing in it survives the call.
#[derive(Debug, Default)]
pub struct ScriptScope {
    argv: Vec<String>,
    vars: HashMap<String, Value>,
    out: String,
}

impl ScriptScope {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            ..Self::default()
        }
    }

    /// Script path followed by the serialized `--flag value` pairs.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn print(&mut self, text: impl AsRef<str>) {
        self.out.push_str(text.as_ref());
    }

    pub fn println(&mut self, text: impl AsRef<str>) {
        let _ = writeln!(self.out, "{}", text.as_ref());
    }

    pub fn output(&self) -> &str {
        &self.out
    }

    pub fn into_output(self) -> String {
        self.out
    }
}

type EntryFn = Box<dyn Fn() -> anyhow::Result<Value> + Send + Sync>;
type BodyFn = Box<dyn Fn(&mut ScriptScope) -> anyhow::Result<()> + Send + Sync>;

/// Unit assembled from Rust closures.
#[derive(Default)]
pub struct FnUnit {
    entries: HashMap<String, EntryFn>,
    body: Option<BodyFn>,
}

impl FnUnit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.entries.insert(name.into(), Box::new(f));
        self
    }

    pub fn body<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut ScriptScope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.body = Some(Box::new(f));
        self
    }
}

impl CodeUnit for FnUnit {
    fn has_entry(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    fn call(&self, entry: &str) -> anyhow::Result<Value> {
        let f = self
            .entries
            .get(entry)
            .ok_or_else(|| anyhow!("entry function '{entry}' not found"))?;
        f()
    }

    fn run_body(&self, scope: &mut ScriptScope) -> anyhow::Result<()> {
        match self.body.as_ref() {
            Some(body) => body(scope),
            None => Ok(()),
        }
    }
}

type UnitFactory = Arc<dyn Fn() -> anyhow::Result<Arc<dyn CodeUnit>> + Send + Sync>;

/// Loader backed by units registered by the host application, keyed by the
/// canonical path of the task file they implement. The file must exist.
#[derive(Default, Clone)]
pub struct NativeUnitRegistry {
    factories: Arc<RwLock<HashMap<PathBuf, UnitFactory>>>,
}

impl NativeUnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, path: impl AsRef<Path>, factory: F)
    where
        F: Fn() -> anyhow::Result<Arc<dyn CodeUnit>> + Send + Sync + 'static,
    {
        let key = canonical(path.as_ref());
        self.factories
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, Arc::new(factory));
    }

    pub fn unregister(&self, path: impl AsRef<Path>) -> bool {
        let key = canonical(path.as_ref());
        self.factories
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key)
            .is_some()
    }
}

impl UnitLoader for NativeUnitRegistry {
    fn load(&self, path: &Path) -> anyhow::Result<Arc<dyn CodeUnit>> {
        let key = std::fs::canonicalize(path)
            .with_context(|| format!("task file {} is not readable", path.display()))?;
        let factory = self
            .factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned()
            .ok_or_else(|| anyhow!("no code unit registered for {}", key.display()))?;
        factory()
    }
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registry_requires_existing_file_and_registration() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("greet.task");
        std::fs::write(&file, "").unwrap();

        let registry = NativeUnitRegistry::new();
        let err = registry.load(&file).err().unwrap();
        assert!(err.to_string().contains("no code unit registered"));

        registry.register(&file, || {
            Ok(Arc::new(FnUnit::new().entry("main", || Ok(json!("hi")))) as Arc<dyn CodeUnit>)
        });
        let unit = registry.load(&file).unwrap();
        assert!(unit.has_entry("main"));
        assert_eq!(unit.call("main").unwrap(), json!("hi"));

        assert!(registry.load(&dir.path().join("missing.task")).is_err());
    }

    #[test]
    fn scope_collects_output() {
        let mut scope = ScriptScope::new(vec!["t.task".into(), "--n".into(), "3".into()]);
        scope.set("n", json!(3));
        scope.print("a");
        scope.println("b");
        assert_eq!(scope.get("n"), Some(&json!(3)));
        assert_eq!(scope.argv().len(), 3);
        assert_eq!(scope.into_output(), "ab\n");
    }
}
