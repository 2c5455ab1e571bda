//! Per-run context.
//!
//! A [`TestRun`] owns everything a validator needs: the driver session, the
//! entity registry, the data generator and the cleanup tracker. It is passed
//! explicitly to every check, so two runs never share hidden state.

use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
    config::ProbeConfig,
    datagen::{DataGenerator, TestDataRecord},
    driver::{self, Driver, TenantId},
    ops::OpTimeouts,
    registry::{EntityDescriptor, EntityRegistry},
    tracker::CleanupTracker,
    Result,
};

pub struct TestRun {
    id: Uuid,
    driver: Arc<dyn Driver>,
    registry: EntityRegistry,
    generator: DataGenerator,
    tracker: CleanupTracker,
    config: ProbeConfig,
}

impl TestRun {
    pub fn new(driver: Arc<dyn Driver>, registry: EntityRegistry, config: ProbeConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            driver,
            registry,
            generator: DataGenerator::new(),
            tracker: CleanupTracker::new(),
            config,
        }
    }

    /// Builtin registry with the configured overrides and the configured driver.
    ///
    /// # Errors
    ///
    /// Fails when an entity override names an unknown type or the driver
    /// cannot be constructed.
    pub fn from_config(config: ProbeConfig) -> Result<Self> {
        let mut registry = EntityRegistry::builtin()?;
        config.apply_entity_overrides(&mut registry)?;
        let driver = driver::connect(&config)?;
        Ok(Self::new(driver, registry, config))
    }

    pub const fn id(&self) -> Uuid {
        self.id
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    /// Shared handle for work spawned outside the run's own task.
    pub fn driver_handle(&self) -> Arc<dyn Driver> {
        Arc::clone(&self.driver)
    }

    pub const fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub const fn config(&self) -> &ProbeConfig {
        &self.config
    }

    pub const fn tracker(&self) -> &CleanupTracker {
        &self.tracker
    }

    pub fn timeouts(&self) -> OpTimeouts {
        OpTimeouts {
            call: self.config.call_timeout(),
            settle: self.config.settle_timeout(),
        }
    }

    pub fn describe(&self, type_name: &str) -> Result<EntityDescriptor> {
        self.registry.describe(type_name)
    }

    pub fn generate(
        &self,
        descriptor: &EntityDescriptor,
        overrides: Map<String, Value>,
    ) -> TestDataRecord {
        self.generator.generate(descriptor, overrides)
    }

    /// Track a created entity under the currently active tenant.
    pub fn track(&mut self, type_name: &str, id: &str, display: &str) {
        let tenant = self.driver.active_tenant();
        self.tracker.track(type_name, id, display, tenant);
    }

    pub fn release(&mut self, type_name: &str, id: &str) -> bool {
        self.tracker.release(type_name, id)
    }

    pub async fn switch_tenant(&self, tenant: Option<&TenantId>) -> Result<()> {
        Ok(self.driver.switch_tenant(tenant).await?)
    }

    /// Best-effort cleanup of every tracked entity.
    pub async fn teardown(&mut self) -> usize {
        let timeouts = self.timeouts();
        self.tracker
            .teardown(self.driver.as_ref(), &self.registry, timeouts)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::DriverTarget, driver::twin::TwinDriver};

    #[test]
    fn test_from_config_builds_twin_run() -> Result<()> {
        let config = ProbeConfig {
            target: DriverTarget::Twin,
            ..ProbeConfig::default()
        };
        let run = TestRun::from_config(config)?;
        assert_eq!(run.driver().kind(), driver::DriverKind::Api);
        assert!(run.tracker().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_track_uses_active_tenant() -> Result<()> {
        let mut run = TestRun::new(
            Arc::new(TwinDriver::api()),
            EntityRegistry::builtin()?,
            ProbeConfig::default(),
        );
        run.switch_tenant(Some(&TenantId::new("farm-a"))).await?;
        run.track("crop", "1", "A");
        let tracked = run.tracker().newest_first();
        assert_eq!(tracked[0].tenant, Some(TenantId::new("farm-a")));
        assert!(run.release("crop", "1"));
        Ok(())
    }

    #[test]
    fn test_runs_have_distinct_ids() -> Result<()> {
        let a = TestRun::new(
            Arc::new(TwinDriver::api()),
            EntityRegistry::builtin()?,
            ProbeConfig::default(),
        );
        let b = TestRun::new(
            Arc::new(TwinDriver::api()),
            EntityRegistry::builtin()?,
            ProbeConfig::default(),
        );
        assert_ne!(a.id(), b.id());
        Ok(())
    }
}
