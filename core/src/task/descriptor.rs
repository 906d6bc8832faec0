use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_ENTRY: &str = "main";

/// How a task must be invoked. Decided externally by inspecting the task source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationKind {
    ExternalProcess,
    InProcessCall,
    InProcessScript,
    BackgroundService,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgType {
    #[default]
    Str,
    Int,
    Float,
    Bool,
}

/// One declared command-line flag of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgSpec {
    pub name: String,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub default: Option<serde_json::Value>,

    /// Allowed values; `None` means unrestricted.
    #[serde(default)]
    pub choices: Option<Vec<String>>,

    #[serde(default, rename = "type")]
    pub value_type: ArgType,
}

impl ArgSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            default: None,
            choices: None,
            value_type: ArgType::Str,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.choices = Some(choices.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_type(mut self, value_type: ArgType) -> Self {
        self.value_type = value_type;
        self
    }
}

/// Immutable classification of one task. Replaced wholesale when the task file changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub name: String,
    pub path: PathBuf,
    pub kind: InvocationKind,

    #[serde(default)]
    pub arguments: Vec<ArgSpec>,

    /// Name of the entry function, when the source defines one.
    #[serde(default)]
    pub entry: Option<String>,
}

impl TaskDescriptor {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, kind: InvocationKind) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            kind,
            arguments: Vec::new(),
            entry: None,
        }
    }

    pub fn with_argument(mut self, spec: ArgSpec) -> Self {
        self.arguments.push(spec);
        self
    }

    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = Some(entry.into());
        self
    }

    pub fn has_entry(&self) -> bool {
        self.entry.is_some()
    }

    pub fn entry_name(&self) -> &str {
        self.entry.as_deref().unwrap_or(DEFAULT_ENTRY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_catalog_entry() {
        let desc: TaskDescriptor = toml::from_str(
            r#"
            name = "backup"
            path = "/opt/tasks/backup.py"
            kind = "external_process"

            [[arguments]]
            name = "mode"
            required = true
            choices = ["full", "diff"]

            [[arguments]]
            name = "level"
            type = "int"
            default = 3
            "#,
        )
        .unwrap();

        assert_eq!(desc.kind, InvocationKind::ExternalProcess);
        assert_eq!(desc.arguments.len(), 2);
        assert!(desc.arguments[0].required);
        assert_eq!(desc.arguments[1].value_type, ArgType::Int);
        assert_eq!(desc.entry_name(), DEFAULT_ENTRY);
        assert!(!desc.has_entry());
    }
}
