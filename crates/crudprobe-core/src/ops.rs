//! Entity operations expressed over the driver capability set.
//!
//! [`EntityOps`] turns an [`EntityDescriptor`] plus a [`Driver`] into
//! create/read/update/delete/list operations. API drivers use `call`
//! against the collection endpoint; UI drivers fill and submit forms via
//! `navigate`/`act`/`set_field` and use in-session `call`s only to resolve
//! ids. Every operation is bounded by the per-call timeout.

use std::{future::Future, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::debug;

use crate::{
    datagen::TestDataRecord,
    driver::{
        entity_id, ApiRequest, Driver, DriverKind, Locator, CONFIRM_DELETE_TEST_ID,
        SUBMIT_TEST_ID,
    },
    error::OperationError,
    registry::EntityDescriptor,
};

type OpResult<T> = std::result::Result<T, OperationError>;

/// Outcome of one driver-backed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    pub entity_id: Option<String>,
    pub error: Option<String>,
    pub took_ms: u64,
}

impl OperationResult {
    pub const fn succeeded(entity_id: Option<String>, took_ms: u64) -> Self {
        Self {
            success: true,
            entity_id,
            error: None,
            took_ms,
        }
    }

    pub fn failed(error: impl Into<String>, took_ms: u64) -> Self {
        Self {
            success: false,
            entity_id: None,
            error: Some(error.into()),
            took_ms,
        }
    }

    fn from_outcome(outcome: OpResult<Option<String>>, started: Instant) -> Self {
        let took_ms = elapsed_ms(started);
        match outcome {
            Ok(entity_id) => Self::succeeded(entity_id, took_ms),
            Err(err) => Self::failed(err.to_string(), took_ms),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Timeouts applied to entity operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpTimeouts {
    /// Upper bound for one operation
    pub call: Duration,
    /// How long a UI change may take to become visible
    pub settle: Duration,
}

impl Default for OpTimeouts {
    fn default() -> Self {
        Self {
            call: Duration::from_secs(10),
            settle: Duration::from_secs(5),
        }
    }
}

/// CRUD operations for entity types over a driver.
#[derive(Clone, Copy)]
pub struct EntityOps<'a> {
    driver: &'a dyn Driver,
    timeouts: OpTimeouts,
}

impl<'a> EntityOps<'a> {
    pub fn new(driver: &'a dyn Driver, timeouts: OpTimeouts) -> Self {
        Self { driver, timeouts }
    }

    async fn bounded<T, F>(&self, future: F) -> OpResult<T>
    where
        F: Future<Output = OpResult<T>>,
    {
        tokio::time::timeout(self.timeouts.call, future)
            .await
            .unwrap_or(Err(OperationError::Timeout))
    }

    /// Create `record`; the result carries the new entity id.
    pub async fn create(
        &self,
        descriptor: &EntityDescriptor,
        record: &TestDataRecord,
    ) -> OperationResult {
        let started = Instant::now();
        let outcome = self
            .bounded(self.create_raw(descriptor, record))
            .await
            .map(Some);
        debug!(
            entity = %descriptor.type_name,
            display = %record.display_value(),
            ok = outcome.is_ok(),
            "create"
        );
        OperationResult::from_outcome(outcome, started)
    }

    async fn create_raw(
        &self,
        descriptor: &EntityDescriptor,
        record: &TestDataRecord,
    ) -> OpResult<String> {
        match self.driver.kind() {
            DriverKind::Api => {
                let data = self
                    .driver
                    .call(ApiRequest::post(descriptor.api_path(), record.to_body()))
                    .await?
                    .into_data()?;
                entity_id(&data).ok_or_else(|| {
                    OperationError::Decode("create response carries no id".to_string())
                })
            }
            DriverKind::Ui => {
                self.driver.navigate(&descriptor.base_path).await?;
                self.driver.act(&descriptor.create_trigger).await?;
                for (name, value) in &record.fields {
                    self.driver.set_field(name, value).await?;
                }
                self.driver.act(&Locator::test_id(SUBMIT_TEST_ID)).await?;
                let display = record.display_value();
                self.driver
                    .wait_for_visible(&Locator::text(display.clone()), self.timeouts.settle)
                    .await?;
                self.find_raw(descriptor, &display)
                    .await?
                    .as_ref()
                    .and_then(entity_id)
                    .ok_or(OperationError::NotFound)
            }
        }
    }

    /// All records of the type visible under the active tenant.
    pub async fn list(&self, descriptor: &EntityDescriptor) -> OpResult<Vec<Value>> {
        self.bounded(self.list_raw(descriptor, false)).await
    }

    /// List without credentials.
    pub async fn list_anonymous(&self, descriptor: &EntityDescriptor) -> OpResult<Vec<Value>> {
        self.bounded(self.list_raw(descriptor, true)).await
    }

    async fn list_raw(
        &self,
        descriptor: &EntityDescriptor,
        anonymous: bool,
    ) -> OpResult<Vec<Value>> {
        let mut request = ApiRequest::get(descriptor.api_path());
        if anonymous {
            request = request.anonymous();
        }
        match self.driver.call(request).await?.into_data()? {
            Value::Array(items) => Ok(items),
            Value::Object(mut map) => match map.remove("items") {
                Some(Value::Array(items)) => Ok(items),
                _ => Err(OperationError::Decode(
                    "list response is not an array".to_string(),
                )),
            },
            other => Err(OperationError::Decode(format!(
                "list response is not an array: {other}"
            ))),
        }
    }

    /// The record whose display field equals `display`, if any.
    pub async fn find(
        &self,
        descriptor: &EntityDescriptor,
        display: &str,
    ) -> OpResult<Option<Value>> {
        self.bounded(self.find_raw(descriptor, display)).await
    }

    async fn find_raw(
        &self,
        descriptor: &EntityDescriptor,
        display: &str,
    ) -> OpResult<Option<Value>> {
        let items = self.list_raw(descriptor, false).await?;
        Ok(items
            .into_iter()
            .find(|item| {
                item.get(&descriptor.display_field).and_then(Value::as_str) == Some(display)
            }))
    }

    /// Read: succeeds iff the record is found (and, on UI drivers, visible).
    pub async fn read(
        &self,
        descriptor: &EntityDescriptor,
        display: &str,
    ) -> (OperationResult, Option<Value>) {
        let started = Instant::now();
        let outcome = self.bounded(self.read_raw(descriptor, display)).await;
        match outcome {
            Ok(Some(record)) => (
                OperationResult::succeeded(entity_id(&record), elapsed_ms(started)),
                Some(record),
            ),
            Ok(None) => (
                OperationResult::failed(OperationError::NotFound.to_string(), elapsed_ms(started)),
                None,
            ),
            Err(err) => (OperationResult::failed(err.to_string(), elapsed_ms(started)), None),
        }
    }

    async fn read_raw(
        &self,
        descriptor: &EntityDescriptor,
        display: &str,
    ) -> OpResult<Option<Value>> {
        if self.driver.kind() == DriverKind::Ui {
            self.driver.navigate(&descriptor.base_path).await?;
            if !self.driver.is_visible(&Locator::text(display)).await? {
                return Ok(None);
            }
        }
        self.find_raw(descriptor, display).await
    }

    /// Set `field` to `value` on the record `id` (displayed as `display`).
    pub async fn update(
        &self,
        descriptor: &EntityDescriptor,
        id: &str,
        display: &str,
        field: &str,
        value: Value,
    ) -> OperationResult {
        let started = Instant::now();
        let outcome = self
            .bounded(self.update_raw(descriptor, id, display, field, value))
            .await
            .map(|()| Some(id.to_string()));
        OperationResult::from_outcome(outcome, started)
    }

    async fn update_raw(
        &self,
        descriptor: &EntityDescriptor,
        id: &str,
        display: &str,
        field: &str,
        value: Value,
    ) -> OpResult<()> {
        match self.driver.kind() {
            DriverKind::Api => {
                let mut body = Map::new();
                body.insert("id".to_string(), Value::String(id.to_string()));
                body.insert(field.to_string(), value);
                self.driver
                    .call(ApiRequest::put(descriptor.api_path(), Value::Object(body)))
                    .await?
                    .into_data()
                    .map(|_| ())
            }
            DriverKind::Ui => {
                self.driver.navigate(&descriptor.base_path).await?;
                self.driver.act(&Locator::text(display)).await?;
                self.driver.act(&descriptor.edit_trigger).await?;
                self.driver.set_field(field, &value).await?;
                self.driver.act(&Locator::test_id(SUBMIT_TEST_ID)).await
            }
        }
    }

    /// Delete the record `id`.
    pub async fn delete(
        &self,
        descriptor: &EntityDescriptor,
        id: &str,
        display: &str,
    ) -> OperationResult {
        let started = Instant::now();
        let outcome = self
            .delete_checked(descriptor, id, display)
            .await
            .map(|()| Some(id.to_string()));
        OperationResult::from_outcome(outcome, started)
    }

    /// Delete returning the structured error, so callers can tell an
    /// already-absent record (`NotFound`) from a rejected delete.
    pub async fn delete_checked(
        &self,
        descriptor: &EntityDescriptor,
        id: &str,
        display: &str,
    ) -> OpResult<()> {
        self.bounded(self.delete_raw(descriptor, id, display)).await
    }

    async fn delete_raw(
        &self,
        descriptor: &EntityDescriptor,
        id: &str,
        display: &str,
    ) -> OpResult<()> {
        match self.driver.kind() {
            DriverKind::Api => self
                .driver
                .call(ApiRequest::delete(descriptor.api_path()).with_query("id", id))
                .await?
                .into_data()
                .map(|_| ()),
            DriverKind::Ui => {
                self.driver.navigate(&descriptor.base_path).await?;
                let row = Locator::text(display);
                if !self.driver.is_visible(&row).await? {
                    return Err(OperationError::NotFound);
                }
                self.driver.act(&row).await?;
                self.driver.act(&descriptor.delete_trigger).await?;
                self.driver
                    .act(&Locator::test_id(CONFIRM_DELETE_TEST_ID))
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        datagen::DataGenerator,
        driver::{twin::TwinDriver, TenantId},
        registry::EntityRegistry,
    };

    async fn seeded(driver: &TwinDriver) -> crate::Result<()> {
        driver.authenticate().await?;
        driver.switch_tenant(Some(&TenantId::new("farm-a"))).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_api_create_find_delete() -> crate::Result<()> {
        let driver = TwinDriver::api();
        seeded(&driver).await?;
        let registry = EntityRegistry::builtin()?;
        let crop = registry.describe("crop")?;
        let record = DataGenerator::new().generate(&crop, Map::new());
        let ops = EntityOps::new(&driver, OpTimeouts::default());

        let created = ops.create(&crop, &record).await;
        assert!(created.success, "{created:?}");
        let id = created.entity_id.clone().unwrap_or_default();

        let found = ops.find(&crop, &record.display_value()).await?;
        assert_eq!(found.as_ref().and_then(entity_id), Some(id.clone()));

        let deleted = ops.delete(&crop, &id, &record.display_value()).await;
        assert!(deleted.success);
        assert_eq!(ops.find(&crop, &record.display_value()).await?, None);
        assert_eq!(
            ops.delete_checked(&crop, &id, &record.display_value()).await,
            Err(OperationError::NotFound)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_ui_create_update_delete() -> crate::Result<()> {
        let driver = TwinDriver::ui();
        seeded(&driver).await?;
        let registry = EntityRegistry::builtin()?;
        let seed = registry.describe("seedVariety")?;
        let record = DataGenerator::new().generate(&seed, Map::new());
        let display = record.display_value();
        let ops = EntityOps::new(&driver, OpTimeouts::default());

        let created = ops.create(&seed, &record).await;
        assert!(created.success, "{created:?}");
        let id = created.entity_id.clone().unwrap_or_default();

        let (read, _) = ops.read(&seed, &display).await;
        assert!(read.success);

        let updated = ops.update(&seed, &id, &display, "notes", json!("UPDATED")).await;
        assert!(updated.success, "{updated:?}");
        let record = ops.find(&seed, &display).await?;
        assert_eq!(record.and_then(|r| r.get("notes").cloned()), Some(json!("UPDATED")));

        assert!(ops.delete(&seed, &id, &display).await.success);
        let (read, _) = ops.read(&seed, &display).await;
        assert!(!read.success);
        Ok(())
    }

    #[tokio::test]
    async fn test_hung_call_times_out() -> crate::Result<()> {
        let registry = EntityRegistry::builtin()?;
        let crop = registry.describe("crop")?;
        let driver = TwinDriver::api().with_hang(crop.api_path());
        seeded(&driver).await?;
        let ops = EntityOps::new(
            &driver,
            OpTimeouts {
                call: Duration::from_millis(50),
                settle: Duration::from_millis(50),
            },
        );
        let record = DataGenerator::new().generate(&crop, Map::new());
        let result = ops.create(&crop, &record).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("timeout"));
        Ok(())
    }

    #[test]
    fn test_operation_result_constructors() {
        let ok = OperationResult::succeeded(Some("1".to_string()), 3);
        assert!(ok.success && ok.error.is_none());
        let failed = OperationResult::failed("boom", 4);
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert_eq!(failed.entity_id, None);
    }
}
