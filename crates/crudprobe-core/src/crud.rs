//! CRUD lifecycle workflow for one entity type.
//!
//! create -> read -> update (verified by re-read) -> delete (verified absent).
//! Verbs the descriptor does not support are skipped; a failed create fails
//! every dependent step rather than skipping it.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::{
    ops::{EntityOps, OperationResult},
    registry::Verb,
    run::TestRun,
    Result,
};

/// Outcome of one CRUD step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum StepOutcome {
    Attempted(OperationResult),
    /// The entity type does not support this verb
    Skipped,
}

impl StepOutcome {
    pub const fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }

    /// Skipped steps count as succeeded.
    pub const fn succeeded(&self) -> bool {
        match self {
            Self::Attempted(result) => result.success,
            Self::Skipped => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrudResult {
    pub create: StepOutcome,
    pub read: StepOutcome,
    pub update: StepOutcome,
    pub delete: StepOutcome,
}

impl CrudResult {
    fn steps(&self) -> [&StepOutcome; 4] {
        [&self.create, &self.read, &self.update, &self.delete]
    }

    /// True iff every attempted step succeeded. All-skipped is vacuously true.
    pub fn overall(&self) -> bool {
        self.steps().iter().all(|step| step.succeeded())
    }

    /// Number of steps that were attempted.
    pub fn attempted(&self) -> usize {
        self.steps().iter().filter(|step| !step.is_skipped()).count()
    }

    /// First failing step's error, for reporting.
    pub fn first_error(&self) -> Option<String> {
        let names = ["create", "read", "update", "delete"];
        self.steps()
            .iter()
            .zip(names)
            .find_map(|(step, name)| match step {
                StepOutcome::Attempted(result) if !result.success => Some(format!(
                    "{name}: {}",
                    result.error.as_deref().unwrap_or("failed")
                )),
                _ => None,
            })
    }
}

const PREREQUISITE_FAILED: &str = "prerequisite create failed";

fn blocked(verb: Verb, supported: impl Fn(Verb) -> bool) -> StepOutcome {
    if supported(verb) {
        StepOutcome::Attempted(OperationResult::failed(PREREQUISITE_FAILED, 0))
    } else {
        StepOutcome::Skipped
    }
}

/// Run the CRUD lifecycle for `type_name`.
///
/// # Errors
///
/// Only descriptor lookup fails the call; operation failures are captured
/// in the result.
pub async fn run_crud(
    run: &mut TestRun,
    type_name: &str,
    overrides: Map<String, Value>,
) -> Result<CrudResult> {
    let descriptor = run.describe(type_name)?;
    let record = run.generate(&descriptor, overrides);
    let display = record.display_value();
    let driver = run.driver_handle();
    let ops = EntityOps::new(driver.as_ref(), run.timeouts());
    let supports = |verb: Verb| descriptor.supports(verb);

    let create = ops.create(&descriptor, &record).await;
    let id = match (&create.entity_id, create.success) {
        (Some(id), true) => id.clone(),
        _ => {
            return Ok(CrudResult {
                create: StepOutcome::Attempted(create),
                read: blocked(Verb::Read, supports),
                update: blocked(Verb::Update, supports),
                delete: blocked(Verb::Delete, supports),
            });
        }
    };
    run.track(type_name, &id, &display);

    let read = if supports(Verb::Read) {
        let (result, _) = ops.read(&descriptor, &display).await;
        StepOutcome::Attempted(result)
    } else {
        StepOutcome::Skipped
    };

    let update = if supports(Verb::Update) {
        let marker = Value::String(format!("UPDATED_{}", record.token));
        let mut result = ops
            .update(&descriptor, &id, &display, &descriptor.update_field, marker.clone())
            .await;
        if result.success {
            let (_, reread) = ops.read(&descriptor, &display).await;
            let reflected = reread
                .as_ref()
                .and_then(|r| r.get(&descriptor.update_field))
                == Some(&marker);
            if !reflected {
                result = OperationResult::failed("update not reflected on re-read", result.took_ms);
            }
        }
        StepOutcome::Attempted(result)
    } else {
        StepOutcome::Skipped
    };

    let delete = if supports(Verb::Delete) {
        let mut result = ops.delete(&descriptor, &id, &display).await;
        if result.success {
            // Released only once absence is confirmed; teardown owns the rest.
            let took_ms = result.took_ms;
            match ops.find(&descriptor, &display).await {
                Ok(None) => {
                    run.release(type_name, &id);
                }
                Ok(Some(_)) => {
                    result = OperationResult::failed("record still readable after delete", took_ms);
                }
                Err(err) => {
                    let message = format!("delete not verified: {err}");
                    result = OperationResult::failed(message, took_ms);
                }
            }
        }
        StepOutcome::Attempted(result)
    } else {
        StepOutcome::Skipped
    };

    let result = CrudResult {
        create: StepOutcome::Attempted(create),
        read,
        update,
        delete,
    };
    info!(
        entity = %type_name,
        overall = result.overall(),
        attempted = result.attempted(),
        "crud lifecycle"
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

    fn attempted(success: bool) -> StepOutcome {
        StepOutcome::Attempted(if success {
            OperationResult::succeeded(None, 1)
        } else {
            OperationResult::failed("boom", 1)
        })
    }

    #[test]
    fn test_overall_ignores_skipped() {
        let result = CrudResult {
            create: attempted(true),
            read: attempted(true),
            update: StepOutcome::Skipped,
            delete: StepOutcome::Skipped,
        };
        assert!(result.overall());
        assert_eq!(result.attempted(), 2);
    }

    #[test]
    fn test_overall_false_on_any_attempted_failure() {
        let result = CrudResult {
            create: attempted(true),
            read: attempted(false),
            update: StepOutcome::Skipped,
            delete: attempted(true),
        };
        assert!(!result.overall());
        assert_eq!(result.first_error().as_deref(), Some("read: boom"));
    }

    #[test]
    fn test_all_skipped_is_vacuously_true() {
        let result = CrudResult {
            create: StepOutcome::Skipped,
            read: StepOutcome::Skipped,
            update: StepOutcome::Skipped,
            delete: StepOutcome::Skipped,
        };
        assert!(result.overall());
        assert_eq!(result.attempted(), 0);
    }

    async fn twin_run(driver: TwinDriver) -> crate::Result<TestRun> {
        driver.authenticate().await?;
        driver.switch_tenant(Some(&TenantId::new("farm-a"))).await?;
        Ok(TestRun::new(
            Arc::new(driver),
            EntityRegistry::builtin()?,
            ProbeConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_full_lifecycle_on_twin() -> crate::Result<()> {
        let mut run = twin_run(TwinDriver::api()).await?;
        let result = run_crud(&mut run, "seedVariety", Map::new()).await?;
        assert!(result.overall(), "{result:?}");
        assert_eq!(result.attempted(), 4);
        assert!(run.tracker().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_unsupported_verbs_skipped() -> crate::Result<()> {
        let mut run = twin_run(TwinDriver::api()).await?;
        let result = run_crud(&mut run, "inventoryTransaction", Map::new()).await?;
        assert!(result.overall());
        assert_eq!(result.update, StepOutcome::Skipped);
        assert_eq!(result.delete, StepOutcome::Skipped);
        // Never deleted, so teardown owns it.
        assert_eq!(run.tracker().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_ignored_delete_keeps_record_tracked() -> crate::Result<()> {
        let mut run = twin_run(TwinDriver::api().with_ignored_delete("/api/crops")).await?;
        let result = run_crud(&mut run, "crop", Map::new()).await?;
        assert!(!result.overall());
        assert_eq!(
            result.first_error().as_deref(),
            Some("delete: record still readable after delete")
        );
        assert_eq!(run.tracker().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_unverifiable_delete_fails_step() -> crate::Result<()> {
        let mut run = twin_run(TwinDriver::api().with_reads_failing_after_delete()).await?;
        let result = run_crud(&mut run, "crop", Map::new()).await?;
        assert!(!result.overall());
        let error = result.first_error().unwrap_or_default();
        assert!(error.starts_with("delete: delete not verified"), "{error}");
        assert_eq!(run.tracker().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_create_fails_dependent_steps() -> crate::Result<()> {
        let mut run = twin_run(TwinDriver::api().with_failure_every(1)).await?;
        let result = run_crud(&mut run, "crop", Map::new()).await?;
        assert!(!result.overall());
        assert_eq!(result.attempted(), 4);
        assert!(run.tracker().is_empty());
        Ok(())
    }
}
