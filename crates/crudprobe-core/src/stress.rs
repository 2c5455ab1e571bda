//! Concurrency stress runner.
//!
//! Fires `n` creates at once, waits for all of them to settle and compares
//! the success rate against an inclusive threshold. Entities created during
//! the burst are tracked only after the batch settles.

use futures::future::join_all;
use serde::Serialize;
use serde_json::Map;
use tracing::{info, warn};

use crate::{
    config::validate_threshold,
    ops::{EntityOps, OperationResult},
    run::TestRun,
    Error, Result,
};

/// Default minimum success rate.
pub const DEFAULT_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StressResult {
    pub operations: usize,
    pub successes: usize,
    pub success_rate: f64,
    pub threshold: f64,
    pub passed: bool,
}

/// Score `successes` out of `operations` against `threshold` (inclusive).
#[allow(clippy::cast_precision_loss)]
pub fn evaluate(successes: usize, operations: usize, threshold: f64) -> StressResult {
    let success_rate = if operations == 0 {
        0.0
    } else {
        successes as f64 / operations as f64
    };
    StressResult {
        operations,
        successes,
        success_rate,
        threshold,
        passed: success_rate >= threshold,
    }
}

/// Run `n` concurrent creates of `type_name`.
///
/// # Errors
///
/// Returns `Error::Config` when `n` is zero or `threshold` lies outside
/// `[0, 1]`. Individual operation failures are counted, never propagated.
pub async fn stress(
    run: &mut TestRun,
    type_name: &str,
    n: usize,
    threshold: f64,
) -> Result<StressResult> {
    if n == 0 {
        return Err(Error::Config("stress needs at least one operation".to_string()));
    }
    validate_threshold(threshold)?;
    let descriptor = run.describe(type_name)?;
    let timeouts = run.timeouts();
    let records: Vec<_> = (0..n)
        .map(|_| run.generate(&descriptor, Map::new()))
        .collect();

    let handles = records.iter().cloned().map(|record| {
        let driver = run.driver_handle();
        let descriptor = descriptor.clone();
        tokio::spawn(async move {
            EntityOps::new(driver.as_ref(), timeouts)
                .create(&descriptor, &record)
                .await
        })
    });
    let settled = join_all(handles).await;

    let mut successes = 0;
    for (record, outcome) in records.iter().zip(settled) {
        let result = outcome.unwrap_or_else(|join_err| {
            warn!(error = %join_err, "stress task did not complete");
            OperationResult::failed(join_err.to_string(), 0)
        });
        if let (true, Some(id)) = (result.success, result.entity_id.as_deref()) {
            successes += 1;
            run.track(type_name, id, &record.display_value());
        }
    }

    let result = evaluate(successes, n, threshold);
    info!(
        entity = %type_name,
        operations = n,
        successes,
        success_rate = result.success_rate,
        threshold,
        passed = result.passed,
        "stress batch settled"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::ProbeConfig,
        driver::{twin::TwinDriver, Driver, TenantId},
        registry::EntityRegistry,
    };

    #[test]
    fn test_boundary_cases() {
        let two_of_three = evaluate(2, 3, DEFAULT_THRESHOLD);
        assert!(!two_of_three.passed);
        assert!((two_of_three.success_rate - 0.667).abs() < 0.001);

        assert!(evaluate(3, 3, DEFAULT_THRESHOLD).passed);
        assert!(evaluate(7, 10, DEFAULT_THRESHOLD).passed);
        assert!(!evaluate(6, 10, DEFAULT_THRESHOLD).passed);
    }

    #[test]
    fn test_zero_threshold_always_passes() {
        assert!(evaluate(0, 5, 0.0).passed);
    }

    async fn run_with(driver: TwinDriver) -> Result<TestRun> {
        driver.authenticate().await?;
        driver.switch_tenant(Some(&TenantId::new("farm-a"))).await?;
        Ok(TestRun::new(
            Arc::new(driver),
            EntityRegistry::builtin()?,
            ProbeConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_injected_failures_counted() -> Result<()> {
        let mut run = run_with(TwinDriver::api().with_failure_every(3)).await?;
        let result = stress(&mut run, "seedVariety", 10, DEFAULT_THRESHOLD).await?;
        assert_eq!(result.successes, 7);
        assert!(result.passed);
        assert_eq!(run.tracker().len(), 7);
        Ok(())
    }

    #[tokio::test]
    async fn test_degradation_fails() -> Result<()> {
        let mut run = run_with(TwinDriver::api().with_failure_every(2)).await?;
        let result = stress(&mut run, "seedVariety", 10, DEFAULT_THRESHOLD).await?;
        assert_eq!(result.successes, 5);
        assert!(!result.passed);
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_parameters() -> Result<()> {
        let mut run = run_with(TwinDriver::api()).await?;
        assert!(matches!(stress(&mut run, "crop", 0, 0.7).await, Err(Error::Config(_))));
        assert!(matches!(stress(&mut run, "crop", 3, 1.5).await, Err(Error::Config(_))));
        Ok(())
    }
}
