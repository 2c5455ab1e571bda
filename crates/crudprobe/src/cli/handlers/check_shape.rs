use std::{path::PathBuf, str::FromStr};

use anyhow::{Context, Result};
use clap::ArgMatches;
use crudprobe_core::shape::{ArraySampling, Shape, Validator};
use serde_json::Value;

async fn read_json(path: &PathBuf) -> Result<Value> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Invalid JSON in {}", path.display()))
}

pub async fn handle(matches: &ArgMatches) -> Result<bool> {
    let (Some(shape_path), Some(value_path)) = (
        matches.get_one::<PathBuf>("shape"),
        matches.get_one::<PathBuf>("value"),
    ) else {
        anyhow::bail!("Both --shape and --value are required");
    };
    let sampling = matches
        .get_one::<String>("sampling")
        .map_or(Ok(ArraySampling::First), |s| ArraySampling::from_str(s))?;

    let shape = Shape::from_json(&read_json(shape_path).await?)
        .with_context(|| format!("Invalid shape in {}", shape_path.display()))?;
    let value = read_json(value_path).await?;

    let errors = Validator::new(sampling).validate(&value, &shape);
    if errors.is_empty() {
        println!("✓ {} matches {}", value_path.display(), shape_path.display());
        return Ok(true);
    }
    println!("✗ {} mismatch(es):", errors.len());
    for error in &errors {
        println!("  {error}");
    }
    Ok(false)
}
