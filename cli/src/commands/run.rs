use std::sync::Arc;

use serde_json::Value;
use taskcue_core::api::{AppConfig, ExecutionEngine, NativeUnitRegistry, TaskArgs};
use taskcue_core::error::CliError;

use super::cli::RunArgs;
use crate::catalog::Catalog;

pub async fn run_task(cfg: &AppConfig, catalog: &Catalog, args: RunArgs) -> Result<i32, CliError> {
    let entry = catalog
        .get(&args.task)
        .ok_or_else(|| CliError::UnknownTask(args.task.clone()))?;

    // Catalog defaults first, command-line values on top.
    let mut task_args = entry.args.clone();
    task_args.extend(parse_args(&args.args)?);

    let mut engine_cfg = cfg.engine.clone();
    if let Some(ms) = args.timeout_ms {
        engine_cfg.timeout_ms = ms;
    }
    let engine = ExecutionEngine::new(engine_cfg, Arc::new(NativeUnitRegistry::new()));

    let result = engine.execute(&entry.descriptor, &task_args).await;
    let rendered =
        serde_json::to_string_pretty(&result).map_err(|e| CliError::Command(e.to_string()))?;
    println!("{rendered}");

    Ok(if result.success { 0 } else { 1 })
}

/// `NAME=VALUE` pairs; values stay strings and are type-checked by validation.
pub fn parse_args(raw: &[String]) -> Result<TaskArgs, CliError> {
    let mut out = TaskArgs::new();
    for item in raw {
        let (name, value) = item.split_once('=').ok_or_else(|| {
            CliError::Command(format!("invalid --arg '{item}' (expected NAME=VALUE)"))
        })?;
        let name = name.trim().trim_start_matches("--");
        if name.is_empty() {
            return Err(CliError::Command(format!("invalid --arg '{item}' (empty name)")));
        }
        out.insert(name.to_string(), Value::String(value.to_string()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_name_value_pairs() {
        let parsed = parse_args(&["mode=fast".into(), "--note=a=b".into()]).unwrap();
        assert_eq!(parsed.get("mode"), Some(&json!("fast")));
        assert_eq!(parsed.get("note"), Some(&json!("a=b")));

        assert!(parse_args(&["novalue".into()]).is_err());
        assert!(parse_args(&["=x".into()]).is_err());
    }
}
