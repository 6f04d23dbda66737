//! Command handlers.

use anyhow::{Context, Result};
use console::style;
use conveyor_core::registry::StageRegistry;
use conveyor_core::result::Status;
use conveyor_workflow::{load_pipeline, FileReleaseLog, Pipeline};
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Parse `key=value` pairs into a params map. Values that parse as JSON
/// keep their type; everything else is taken as a string.
pub fn parse_params(pairs: &[String]) -> Result<IndexMap<String, Value>> {
    let mut params = IndexMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("invalid param {pair:?}, expected key=value"))?;
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        params.insert(key.to_string(), value);
    }
    Ok(params)
}

fn load(path: &str) -> Result<Pipeline> {
    let registry = StageRegistry::builtin();
    load_pipeline(path, &registry).with_context(|| format!("failed to load {path}"))
}

pub fn validate(path: &str) -> Result<()> {
    let pipeline = load(path)?;

    println!(
        "{} Pipeline \"{}\" is valid",
        style("✓").green(),
        pipeline.name
    );
    println!("  Jobs: {}", pipeline.jobs.len());
    for (id, job) in &pipeline.jobs {
        let variants = job.strategy.make().map(|v| v.len()).unwrap_or(1);
        println!(
            "    - {} ({} stages, {} variants)",
            id,
            job.stages.len(),
            variants
        );
    }
    if !pipeline.on.is_empty() {
        println!("  Triggers: {}", pipeline.on.len());
        for trigger in &pipeline.on {
            println!("    - {trigger}");
        }
    }
    Ok(())
}

pub fn run(path: &str, params: &[String], timeout: u64, json: bool) -> Result<()> {
    let pipeline = load(path)?;
    let params = parse_params(params)?;

    println!(
        "{} Running {} (run id {})",
        style("▶").cyan(),
        style(&pipeline.name).bold(),
        style(pipeline.run_id).dim()
    );

    let result = pipeline.execute(&params, Duration::from_secs(timeout))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for id in result.jobs.keys() {
            println!("  {} job {id}", style("✓").green());
        }
        if let Some(error) = &result.error {
            println!("  {} {error}", style("✗").red());
        }
    }

    match result.status {
        Status::Success => {
            println!("{} Pipeline succeeded", style("✓").green());
            Ok(())
        }
        Status::Failure => {
            println!("{} Pipeline failed", style("✗").red());
            std::process::exit(result.status.code());
        }
    }
}

pub fn poke(path: &str, params: &[String], window: u64, log_dir: &str) -> Result<()> {
    let pipeline = load(path)?;
    let params = parse_params(params)?;
    let log = Arc::new(FileReleaseLog::new(log_dir));

    println!(
        "{} Poking {} ({} triggers)",
        style("▶").cyan(),
        style(&pipeline.name).bold(),
        pipeline.on.len()
    );

    let results = pipeline.poke(
        &params,
        Duration::from_secs(window),
        Duration::from_secs(1),
        log,
    );

    let mut failed = false;
    for result in &results {
        for trigger in &result.fired {
            println!("  {} fired {trigger}", style("✓").green());
        }
        for trigger in &result.skipped {
            println!("  {} skipped {trigger} (outside window)", style("-").dim());
        }
        if let Some(error) = &result.error {
            failed = true;
            println!("  {} {error}", style("✗").red());
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_params_keeps_json_types() {
        let params =
            parse_params(&["env=prod".to_string(), "retries=3".to_string()]).unwrap();
        assert_eq!(params["env"], json!("prod"));
        assert_eq!(params["retries"], json!(3));
    }

    #[test]
    fn test_parse_params_rejects_bare_keys() {
        assert!(parse_params(&["no-equals".to_string()]).is_err());
    }
}
