use std::collections::HashMap;

use serde_json::Value;

use super::descriptor::{ArgSpec, ArgType, TaskDescriptor};

/// Caller-supplied arguments keyed by flag name.
pub type TaskArgs = HashMap<String, Value>;

/// Arguments that passed schema validation, kept in schema order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedArgs {
    values: Vec<(String, Value)>,
}

impl ValidatedArgs {
    /// `--flag value` pairs in schema order.
    pub fn to_argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.values.len() * 2);
        for (name, value) in &self.values {
            argv.push(format!("--{name}"));
            argv.push(render(value));
        }
        argv
    }
}

/// Checks `args` against the descriptor's schema. Pure: no I/O, no mutation.
///
/// Every problem is reported, not just the first one.
pub fn validate_arguments(
    desc: &TaskDescriptor,
    args: &TaskArgs,
) -> Result<ValidatedArgs, Vec<String>> {
    let mut errors = Vec::new();

    let mut unknown: Vec<&String> = args
        .keys()
        .filter(|k| !desc.arguments.iter().any(|spec| &spec.name == *k))
        .collect();
    unknown.sort();
    for name in unknown {
        errors.push(format!("Unknown argument '{name}'"));
    }

    let mut values = Vec::new();
    for spec in &desc.arguments {
        let supplied = args.get(&spec.name).filter(|v| !is_blank(v));
        let value = match supplied.or(spec.default.as_ref().filter(|v| !is_blank(v))) {
            Some(v) => v,
            None => {
                if spec.required {
                    errors.push(format!("Required argument '{}' is missing", spec.name));
                }
                continue;
            }
        };

        if let Err(e) = check_value(spec, value) {
            errors.push(e);
            continue;
        }
        values.push((spec.name.clone(), value.clone()));
    }

    if errors.is_empty() {
        Ok(ValidatedArgs { values })
    } else {
        Err(errors)
    }
}

fn check_value(spec: &ArgSpec, value: &Value) -> Result<(), String> {
    let text = render(value);

    if let Some(choices) = spec.choices.as_ref() {
        if !choices.iter().any(|c| c == &text) {
            return Err(format!(
                "Argument '{}' must be one of: {}",
                spec.name,
                choices.join(", ")
            ));
        }
    }

    let ok = match spec.value_type {
        ArgType::Str => true,
        ArgType::Int => value.is_i64() || value.is_u64() || text.trim().parse::<i64>().is_ok(),
        ArgType::Float => value.is_number() || text.trim().parse::<f64>().is_ok(),
        ArgType::Bool => {
            value.is_boolean()
                || matches!(
                    text.trim().to_ascii_lowercase().as_str(),
                    "true" | "false" | "1" | "0" | "yes" | "no"
                )
        }
    };
    if ok {
        Ok(())
    } else {
        let expected = match spec.value_type {
            ArgType::Int => "an integer",
            ArgType::Float => "a number",
            ArgType::Bool => "a boolean",
            ArgType::Str => "a string",
        };
        Err(format!("Argument '{}' must be {expected}", spec.name))
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
