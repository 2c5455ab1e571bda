//! Built-in test cases and the named suites that group them.
//!
//! Case names are `<check>:<entityType>`, e.g. `crud:seedVariety` or
//! `cascade:crop`.

use async_trait::async_trait;
use itertools::Itertools;
use serde_json::{Map, Value};
use tracing::debug;

use crate::{
    cascade::{check_cascade, CascadePolicy, CascadeVerdict},
    config::ProbeConfig,
    crud::run_crud,
    isolation::{check_isolation, check_no_tenant_context},
    ops::EntityOps,
    orchestrator::{FailureKind, TestCase, Verdict},
    registry::{EntityDescriptor, EntityRegistry, EntityType},
    run::TestRun,
    shape::{Shape, Validator},
    stress::stress,
    Error, Result,
};

/// Parent types and the child types that reference them.
pub const CASCADE_PAIRS: &[(EntityType, &[EntityType])] = &[
    (EntityType::Crop, &[EntityType::Batch, EntityType::CropPlan]),
    (EntityType::Customer, &[EntityType::Order]),
];

// ═══════════════════════════════════════════════════════════════════════════
// CASES
// ═══════════════════════════════════════════════════════════════════════════

/// Full create/read/update/delete lifecycle.
#[derive(Debug, Clone)]
pub struct CrudCase {
    pub entity: String,
}

#[async_trait]
impl TestCase for CrudCase {
    fn name(&self) -> String {
        format!("crud:{}", self.entity)
    }

    async fn run(&self, run: &mut TestRun) -> Result<Verdict> {
        let result = run_crud(run, &self.entity, Map::new()).await?;
        if !result.overall() {
            let message = result.first_error().unwrap_or_else(|| "crud step failed".to_string());
            return Ok(Verdict::fail(FailureKind::Operation, message));
        }
        if result.attempted() == 0 {
            return Ok(Verdict::PassWithNote("every verb skipped".to_string()));
        }
        Ok(Verdict::Pass)
    }
}

/// Record created under the primary tenant must be invisible to the secondary.
#[derive(Debug, Clone)]
pub struct IsolationCase {
    pub entity: String,
}

#[async_trait]
impl TestCase for IsolationCase {
    fn name(&self) -> String {
        format!("isolation:{}", self.entity)
    }

    fn retryable(&self) -> bool {
        false
    }

    async fn run(&self, run: &mut TestRun) -> Result<Verdict> {
        let (tenant_a, tenant_b) = (run.config().tenant_a(), run.config().tenant_b());
        let result = check_isolation(run, &self.entity, &tenant_a, &tenant_b).await?;
        if !result.created_in_a {
            return Err(Error::Precondition(format!(
                "could not create {} under {tenant_a}; isolation inconclusive",
                self.entity
            )));
        }
        if result.visible_in_b {
            return Ok(Verdict::fail(
                FailureKind::IsolationViolation,
                format!("{} created under {tenant_a} is visible under {tenant_b}", self.entity),
            ));
        }
        Ok(Verdict::Pass)
    }
}

/// Listing with no tenant selected must not expose tenant data.
#[derive(Debug, Clone)]
pub struct NoTenantContextCase {
    pub entity: String,
}

#[async_trait]
impl TestCase for NoTenantContextCase {
    fn name(&self) -> String {
        format!("no-tenant-context:{}", self.entity)
    }

    fn retryable(&self) -> bool {
        false
    }

    async fn run(&self, run: &mut TestRun) -> Result<Verdict> {
        let tenant = run.config().tenant_a();
        let result = check_no_tenant_context(run, &self.entity, &tenant).await?;
        if !result.created {
            return Err(Error::Precondition(format!(
                "could not create {} under {tenant}",
                self.entity
            )));
        }
        if !result.holds() {
            return Ok(Verdict::fail(
                FailureKind::IsolationViolation,
                format!("{} created under {tenant} is listed without tenant context", self.entity),
            ));
        }
        debug!(entity = %self.entity, rejected = result.rejected, "no-tenant-context holds");
        Ok(Verdict::Pass)
    }
}

/// Deleting a parent must cascade to (or be refused by) its children.
#[derive(Debug, Clone)]
pub struct CascadeCase {
    pub parent: String,
    pub children: Vec<String>,
}

#[async_trait]
impl TestCase for CascadeCase {
    fn name(&self) -> String {
        format!("cascade:{}", self.parent)
    }

    fn retryable(&self) -> bool {
        false
    }

    async fn run(&self, run: &mut TestRun) -> Result<Verdict> {
        let children: Vec<&str> = self.children.iter().map(String::as_str).collect();
        let result = check_cascade(run, &self.parent, &children).await?;
        let verdict = match result.verdict(run.config().cascade.restricted) {
            CascadeVerdict::Pass => Verdict::Pass,
            CascadeVerdict::PassRestricted => Verdict::PassWithNote(format!(
                "restricted: delete of {} refused while children exist",
                self.parent
            )),
            CascadeVerdict::Fail => {
                let message = match result.policy {
                    CascadePolicy::Restricted => format!(
                        "delete of {} refused; restricted deletes are configured to fail",
                        self.parent
                    ),
                    CascadePolicy::Cascaded | CascadePolicy::Violated => format!(
                        "parent deleted: {}, children remaining: {}",
                        result.parent_deleted,
                        result.children_remaining.join(", ")
                    ),
                };
                Verdict::fail(FailureKind::CascadeViolation, message)
            }
        };
        Ok(verdict)
    }
}

/// Concurrent creates must succeed at or above the threshold.
#[derive(Debug, Clone)]
pub struct StressCase {
    pub entity: String,
    pub operations: usize,
    pub threshold: f64,
}

#[async_trait]
impl TestCase for StressCase {
    fn name(&self) -> String {
        format!("stress:{}", self.entity)
    }

    async fn run(&self, run: &mut TestRun) -> Result<Verdict> {
        let result = stress(run, &self.entity, self.operations, self.threshold).await?;
        if result.passed {
            return Ok(Verdict::Pass);
        }
        Ok(Verdict::fail(
            FailureKind::ConcurrencyDegradation,
            format!(
                "{}/{} succeeded ({:.2}), below threshold {:.2}",
                result.successes, result.operations, result.success_rate, result.threshold
            ),
        ))
    }
}

/// List responses must match the shape of what was created.
#[derive(Debug, Clone)]
pub struct ResponseShapeCase {
    pub entity: String,
}

/// Expected list-element shape for an entity type: an `id` (string or
/// number), the display field as a string, and each required field typed
/// after the value generated for it. Fields generated as `null` are not
/// checked.
pub fn record_shape(descriptor: &EntityDescriptor, generated: &Map<String, Value>) -> Shape {
    let required = descriptor.required_fields.iter().filter_map(|field| {
        let shape = Shape::of_value(generated.get(field)?)?;
        Some((field.clone(), shape))
    });
    let fixed = [
        ("id".to_string(), Shape::Identifier),
        (descriptor.display_field.clone(), Shape::String),
    ];
    Shape::fields(required.chain(fixed))
}

#[async_trait]
impl TestCase for ResponseShapeCase {
    fn name(&self) -> String {
        format!("shape:{}", self.entity)
    }

    async fn run(&self, run: &mut TestRun) -> Result<Verdict> {
        let descriptor = run.describe(&self.entity)?;
        let record = run.generate(&descriptor, Map::new());
        let driver = run.driver_handle();
        let ops = EntityOps::new(driver.as_ref(), run.timeouts());

        let created = ops.create(&descriptor, &record).await;
        match created.entity_id.as_deref() {
            Some(id) if created.success => run.track(&self.entity, id, &record.display_value()),
            _ => {
                return Err(Error::Precondition(format!(
                    "could not create {}: {}",
                    self.entity,
                    created.error.unwrap_or_default()
                )))
            }
        }

        let items = ops.list(&descriptor).await?;
        let shape = Shape::array_of(record_shape(&descriptor, &record.fields));
        let errors = Validator::new(run.config().shape.array_sampling)
            .validate(&Value::Array(items), &shape);
        if errors.is_empty() {
            return Ok(Verdict::Pass);
        }
        let message = errors.iter().join("; ");
        Ok(Verdict::fail(FailureKind::Validation, message))
    }
}

/// Listing without credentials must be refused with 401/403.
#[derive(Debug, Clone)]
pub struct AuthRequiredCase {
    pub entity: String,
}

#[async_trait]
impl TestCase for AuthRequiredCase {
    fn name(&self) -> String {
        format!("auth-required:{}", self.entity)
    }

    async fn run(&self, run: &mut TestRun) -> Result<Verdict> {
        let descriptor = run.describe(&self.entity)?;
        match EntityOps::new(run.driver(), run.timeouts())
            .list_anonymous(&descriptor)
            .await
        {
            Err(err) if err.is_access_denied() => Ok(Verdict::Pass),
            Err(err) => Err(err.into()),
            Ok(items) => Ok(Verdict::fail(
                FailureKind::Assertion,
                format!("anonymous list returned {} records", items.len()),
            )),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SUITES
// ═══════════════════════════════════════════════════════════════════════════

/// Named built-in suite.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
pub enum SuiteName {
    /// One entity type through every kind of check
    Smoke,
    Crud,
    Isolation,
    Cascade,
    Shape,
    Stress,
    Full,
}

const SMOKE_ENTITY: EntityType = EntityType::SeedVariety;

fn per_type<F>(registry: &EntityRegistry, make: F) -> Vec<Box<dyn TestCase>>
where
    F: Fn(String) -> Box<dyn TestCase>,
{
    registry.types().map(|kind| make(kind.to_string())).collect()
}

fn cascade_cases(registry: &EntityRegistry) -> Vec<Box<dyn TestCase>> {
    let registered: Vec<_> = registry.types().collect();
    CASCADE_PAIRS
        .iter()
        .filter(|(parent, children)| {
            registered.contains(parent) && children.iter().all(|c| registered.contains(c))
        })
        .map(|(parent, children)| {
            Box::new(CascadeCase {
                parent: parent.to_string(),
                children: children.iter().map(ToString::to_string).collect(),
            }) as Box<dyn TestCase>
        })
        .collect()
}

fn stress_case(config: &ProbeConfig) -> Box<dyn TestCase> {
    Box::new(StressCase {
        entity: config.stress.entity.clone(),
        operations: config.stress.operations,
        threshold: config.stress.threshold,
    })
}

/// Build the cases of `suite` in execution order.
pub fn build_suite(
    suite: SuiteName,
    registry: &EntityRegistry,
    config: &ProbeConfig,
) -> Vec<Box<dyn TestCase>> {
    let crud = || per_type(registry, |entity| Box::new(CrudCase { entity }));
    let shape = || per_type(registry, |entity| Box::new(ResponseShapeCase { entity }));
    let isolation = || {
        registry
            .types()
            .flat_map(|kind| {
                [
                    Box::new(IsolationCase {
                        entity: kind.to_string(),
                    }) as Box<dyn TestCase>,
                    Box::new(NoTenantContextCase {
                        entity: kind.to_string(),
                    }),
                ]
            })
            .collect::<Vec<_>>()
    };

    match suite {
        SuiteName::Smoke => {
            let entity = SMOKE_ENTITY.to_string();
            vec![
                Box::new(CrudCase {
                    entity: entity.clone(),
                }),
                Box::new(ResponseShapeCase {
                    entity: entity.clone(),
                }),
                Box::new(IsolationCase {
                    entity: entity.clone(),
                }),
                Box::new(AuthRequiredCase { entity }),
            ]
        }
        SuiteName::Crud => crud(),
        SuiteName::Isolation => isolation(),
        SuiteName::Cascade => cascade_cases(registry),
        SuiteName::Shape => shape(),
        SuiteName::Stress => vec![stress_case(config)],
        SuiteName::Full => {
            let mut cases = crud();
            cases.extend(shape());
            cases.extend(isolation());
            cases.push(Box::new(AuthRequiredCase {
                entity: SMOKE_ENTITY.to_string(),
            }));
            cases.extend(cascade_cases(registry));
            cases.push(stress_case(config));
            cases
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{str::FromStr, sync::Arc};

    use serde_json::json;

    use super::*;
    use crate::{
        artifacts::ArtifactSink,
        driver::twin::{TwinCascade, TwinDriver},
        orchestrator::{CaseStatus, Orchestrator},
    };

    fn names(cases: &[Box<dyn TestCase>]) -> Vec<String> {
        cases.iter().map(|case| case.name()).collect()
    }

    fn run_on(driver: TwinDriver) -> Result<TestRun> {
        Ok(TestRun::new(
            Arc::new(driver),
            EntityRegistry::builtin()?,
            ProbeConfig::default(),
        ))
    }

    #[test]
    fn test_suite_names_parse() {
        assert_eq!(SuiteName::from_str("smoke").ok(), Some(SuiteName::Smoke));
        assert_eq!(SuiteName::Full.to_string(), "full");
        assert!(SuiteName::from_str("everything").is_err());
    }

    #[test]
    fn test_smoke_suite_contents() -> Result<()> {
        let registry = EntityRegistry::builtin()?;
        let cases = build_suite(SuiteName::Smoke, &registry, &ProbeConfig::default());
        assert_eq!(
            names(&cases),
            vec![
                "crud:seedVariety",
                "shape:seedVariety",
                "isolation:seedVariety",
                "auth-required:seedVariety"
            ]
        );
        Ok(())
    }

    #[test]
    fn test_full_suite_covers_every_type() -> Result<()> {
        let registry = EntityRegistry::builtin()?;
        let names = names(&build_suite(SuiteName::Full, &registry, &ProbeConfig::default()));
        for kind in registry.types() {
            assert!(names.contains(&format!("crud:{kind}")));
            assert!(names.contains(&format!("isolation:{kind}")));
            assert!(names.contains(&format!("no-tenant-context:{kind}")));
        }
        assert!(names.contains(&"cascade:crop".to_string()));
        assert!(names.contains(&"cascade:customer".to_string()));
        assert!(names.contains(&"stress:seedVariety".to_string()));
        Ok(())
    }

    #[test]
    fn test_record_shape_follows_descriptor() -> Result<()> {
        let registry = EntityRegistry::builtin()?;
        let seed = registry.describe("seedVariety")?;
        let body = json!({
            "name": "AUTO_TEST_Seed_1",
            "stockQuantity": 5,
            "minStockLevel": null,
            "notes": "not required",
        });
        let body = body.as_object().cloned().unwrap_or_default();
        assert_eq!(
            record_shape(&seed, &body),
            Shape::fields([
                ("id", Shape::Identifier),
                ("name", Shape::String),
                ("stockQuantity", Shape::Number),
            ])
        );
        Ok(())
    }

    #[test]
    fn test_record_shape_accepts_numeric_ids() -> Result<()> {
        let registry = EntityRegistry::builtin()?;
        let crop = registry.describe("crop")?;
        let body = json!({"name": "AUTO_TEST_Crop_1", "category": "ROOT"});
        let shape = Shape::array_of(record_shape(&crop, body.as_object().unwrap_or(&Map::new())));
        let listed = json!([{"id": 42, "name": "x", "category": "ROOT", "extra": true}]);
        assert!(Validator::default().validate(&listed, &shape).is_empty());

        let broken = json!([{"id": null, "name": 7, "category": "ROOT"}]);
        let errors = Validator::default().validate(&broken, &shape);
        assert_eq!(errors.len(), 2, "{errors:?}");
        assert_eq!(errors[0].path, "[0].id");
        assert_eq!(errors[0].message, "Type mismatch: expected string or number, got null");
        Ok(())
    }

    #[tokio::test]
    async fn test_smoke_passes_on_twin() -> Result<()> {
        let mut run = run_on(TwinDriver::api())?;
        let registry = EntityRegistry::builtin()?;
        let cases = build_suite(SuiteName::Smoke, &registry, run.config());
        let mut orchestrator = Orchestrator::new(ArtifactSink::disabled(), 0);
        let summary = orchestrator.execute(&mut run, &cases).await?;
        assert!(summary.is_success(), "{:?}", summary.records);
        assert_eq!(summary.total, 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_leak_fails_isolation_without_retry() -> Result<()> {
        let mut run = run_on(TwinDriver::api().with_leak("/api/seed-varieties"))?;
        let mut orchestrator = Orchestrator::new(ArtifactSink::disabled(), 3);
        orchestrator.setup(&run).await?;
        let case = IsolationCase {
            entity: "seedVariety".to_string(),
        };
        let record = orchestrator.run_case(&mut run, &case).await?;
        assert_eq!(record.status, CaseStatus::Fail);
        assert_eq!(record.failure_kind, Some(FailureKind::IsolationViolation));
        assert_eq!(record.attempts, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_restricted_cascade_passes_with_note() -> Result<()> {
        let mut run = run_on(TwinDriver::api().with_cascade("/api/crops", TwinCascade::Restrict))?;
        let mut orchestrator = Orchestrator::new(ArtifactSink::disabled(), 0);
        orchestrator.setup(&run).await?;
        let case = CascadeCase {
            parent: "crop".to_string(),
            children: vec!["batch".to_string()],
        };
        let record = orchestrator.run_case(&mut run, &case).await?;
        assert_eq!(record.status, CaseStatus::Pass);
        assert!(record.note.unwrap_or_default().starts_with("restricted"));
        Ok(())
    }

    #[tokio::test]
    async fn test_open_access_fails_auth_required() -> Result<()> {
        let mut run = run_on(TwinDriver::api().with_open_access())?;
        let mut orchestrator = Orchestrator::new(ArtifactSink::disabled(), 0);
        orchestrator.setup(&run).await?;
        let case = AuthRequiredCase {
            entity: "crop".to_string(),
        };
        let record = orchestrator.run_case(&mut run, &case).await?;
        assert_eq!(record.status, CaseStatus::Fail);
        assert_eq!(record.failure_kind, Some(FailureKind::Assertion));
        Ok(())
    }
}
