use std::{path::PathBuf, str::FromStr};

use anyhow::{Context, Result};
use clap::ArgMatches;
use crudprobe_core::{
    build_suite, config::DriverTarget, load_config, report, Orchestrator, ProbeConfig, SuiteName,
    TestRun,
};
use tracing::info;

/// Apply command-line overrides, the last configuration layer.
fn apply_overrides(config: &mut ProbeConfig, matches: &ArgMatches) -> Result<()> {
    if let Some(target) = matches.get_one::<String>("target") {
        config.target = DriverTarget::from_str(target)?;
    }
    if let Some(url) = matches.get_one::<String>("base-url") {
        config.base_url.clone_from(url);
    }
    if let Some(threshold) = matches.get_one::<f64>("threshold") {
        config.stress.threshold = *threshold;
    }
    if let Some(operations) = matches.get_one::<usize>("operations") {
        config.stress.operations = *operations;
    }
    if let Some(retries) = matches.get_one::<u32>("retries") {
        config.retries = *retries;
    }
    if let Some(dir) = matches.get_one::<String>("artifacts-dir") {
        config.artifacts_dir.clone_from(dir);
    }
    config.validate()?;
    Ok(())
}

pub async fn handle(matches: &ArgMatches) -> Result<bool> {
    let path = matches.get_one::<PathBuf>("config");
    let mut config = load_config(path.map(PathBuf::as_path))
        .await
        .context("Failed to load configuration")?;
    apply_overrides(&mut config, matches)?;

    let suite_name = matches.get_one::<String>("suite").map_or("smoke", String::as_str);
    let suite = SuiteName::from_str(suite_name)
        .with_context(|| format!("Unknown suite: {suite_name}"))?;

    let mut run = TestRun::from_config(config)?;
    let cases = build_suite(suite, run.registry(), run.config());
    info!(suite = %suite, cases = cases.len(), target = ?run.config().target, "starting suite");

    let mut orchestrator = Orchestrator::from_config(run.config());
    let summary = orchestrator.execute(&mut run, &cases).await?;

    if matches.get_flag("json") {
        println!("{}", report::render_json(&summary)?);
    } else {
        print!("{}", report::render_table(&summary));
    }
    Ok(summary.is_success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::build_cli;

    fn run_matches(args: &[&str]) -> ArgMatches {
        let mut argv = vec!["crudprobe", "run"];
        argv.extend_from_slice(args);
        build_cli()
            .try_get_matches_from(argv)
            .ok()
            .and_then(|m| m.subcommand_matches("run").cloned())
            .unwrap_or_default()
    }

    #[test]
    fn test_overrides_win_over_config() -> Result<()> {
        let matches = run_matches(&[
            "--target",
            "twin",
            "--threshold",
            "0.9",
            "--operations",
            "25",
            "--retries",
            "2",
            "--base-url",
            "http://farm.test",
        ]);
        let mut config = ProbeConfig::default();
        apply_overrides(&mut config, &matches)?;
        assert_eq!(config.target, DriverTarget::Twin);
        assert!((config.stress.threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.stress.operations, 25);
        assert_eq!(config.retries, 2);
        assert_eq!(config.base_url, "http://farm.test");
        Ok(())
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let matches = run_matches(&["--threshold", "1.5"]);
        let mut config = ProbeConfig::default();
        let err = apply_overrides(&mut config, &matches).err();
        assert!(err.is_some_and(|e| e.to_string().contains("threshold")));
    }
}
