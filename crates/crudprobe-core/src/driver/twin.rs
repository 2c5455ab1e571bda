//! In-process twin of the multi-tenant SUT.
//!
//! The twin keeps tenant-scoped records in memory and answers the same
//! `{success, data}` envelope the real API does. Faults are injected with
//! builder methods so every validator can be exercised against both a
//! correct and a broken system:
//!
//! - [`TwinDriver::with_leak`]: list ignores the tenant for one collection
//! - [`TwinDriver::with_cascade`]: parent-delete behavior per collection
//! - [`TwinDriver::with_failure_every`]: every k-th create fails with 500
//! - [`TwinDriver::with_latency`] / [`TwinDriver::with_hang`]: slow or stuck calls
//! - [`TwinDriver::with_open_access`]: anonymous requests are served
//! - [`TwinDriver::with_ignored_delete`]: delete answers 200 but keeps the record
//! - [`TwinDriver::with_reads_failing_after_delete`]: lists answer 500 once
//!   anything was deleted
//!
//! [`TwinDriver::ui`] additionally models list pages and create/edit/delete
//! forms so the UI operation flow runs without a browser.

use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{
    poll_visible, ApiRequest, ApiResponse, Artifact, Driver, DriverKind, Locator, Method,
    TenantId, CONFIRM_DELETE_TEST_ID, SUBMIT_TEST_ID,
};
use crate::{error::OperationError, registry::API_PREFIX};

type OpResult<T> = std::result::Result<T, OperationError>;

/// What deleting a parent does to records referencing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwinCascade {
    /// Dependents are deleted with the parent
    Cascade,
    /// Delete is refused with 409 while dependents exist
    Restrict,
    /// Parent is deleted, dependents are left dangling
    Orphan,
}

#[derive(Debug, Clone)]
struct TwinRecord {
    id: String,
    tenant: TenantId,
    collection: String,
    fields: Map<String, Value>,
}

impl TwinRecord {
    fn to_json(&self) -> Value {
        let mut body = self.fields.clone();
        body.insert("id".to_string(), Value::String(self.id.clone()));
        body.insert(
            "farmId".to_string(),
            Value::String(self.tenant.as_str().to_string()),
        );
        Value::Object(body)
    }

    fn shows_text(&self, text: &str) -> bool {
        self.fields
            .values()
            .any(|value| value.as_str() == Some(text))
    }

    fn references(&self, parent_id: &str) -> bool {
        self.fields
            .iter()
            .any(|(key, value)| key.ends_with("Id") && value.as_str() == Some(parent_id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FormMode {
    Create,
    Edit(String),
}

#[derive(Debug, Clone)]
struct Form {
    mode: FormMode,
    fields: Map<String, Value>,
}

#[derive(Debug, Default)]
struct TwinState {
    records: im::Vector<TwinRecord>,
    tenant: Option<TenantId>,
    authenticated: bool,
    creates: u64,
    deletes: u64,
    page: Option<String>,
    form: Option<Form>,
    selected: Option<String>,
    pending_delete: Option<String>,
    last_response: Option<Value>,
}

#[derive(Debug, Default)]
struct Faults {
    leaks: HashSet<String>,
    cascades: HashMap<String, TwinCascade>,
    failure_every: Option<u64>,
    latency: Duration,
    hangs: HashSet<String>,
    open_access: bool,
    ignored_deletes: HashSet<String>,
    reads_fail_after_delete: bool,
}

/// In-memory multi-tenant SUT behind the [`Driver`] capability set.
#[derive(Debug)]
pub struct TwinDriver {
    kind: DriverKind,
    state: Mutex<TwinState>,
    faults: Faults,
}

fn collection_of(path: &str) -> String {
    path.strip_prefix(API_PREFIX).unwrap_or(path).to_string()
}

fn ok(status: u16, data: Value) -> ApiResponse {
    ApiResponse::new(status, json!({"success": true, "data": data}))
}

fn fail(status: u16, message: &str) -> ApiResponse {
    ApiResponse::new(status, json!({"success": false, "error": message}))
}

impl TwinDriver {
    fn with_kind(kind: DriverKind) -> Self {
        Self {
            kind,
            state: Mutex::new(TwinState::default()),
            faults: Faults::default(),
        }
    }

    /// Twin answering REST calls only.
    #[must_use]
    pub fn api() -> Self {
        Self::with_kind(DriverKind::Api)
    }

    /// Twin that also models pages and forms.
    #[must_use]
    pub fn ui() -> Self {
        Self::with_kind(DriverKind::Ui)
    }

    /// List on `path` returns every tenant's records.
    #[must_use]
    pub fn with_leak(mut self, path: impl AsRef<str>) -> Self {
        self.faults.leaks.insert(collection_of(path.as_ref()));
        self
    }

    /// Parent-delete behavior for records of `path`. Unconfigured
    /// collections cascade.
    #[must_use]
    pub fn with_cascade(mut self, path: impl AsRef<str>, behavior: TwinCascade) -> Self {
        self.faults
            .cascades
            .insert(collection_of(path.as_ref()), behavior);
        self
    }

    /// Every `k`-th create fails with HTTP 500.
    #[must_use]
    pub fn with_failure_every(mut self, k: u64) -> Self {
        self.faults.failure_every = (k > 0).then_some(k);
        self
    }

    /// Delay every call by `latency`.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.faults.latency = latency;
        self
    }

    /// Calls on `path` never complete.
    #[must_use]
    pub fn with_hang(mut self, path: impl AsRef<str>) -> Self {
        self.faults.hangs.insert(collection_of(path.as_ref()));
        self
    }

    /// Serve anonymous requests instead of answering 401.
    #[must_use]
    pub const fn with_open_access(mut self) -> Self {
        self.faults.open_access = true;
        self
    }

    /// Delete on `path` reports success without removing anything.
    #[must_use]
    pub fn with_ignored_delete(mut self, path: impl AsRef<str>) -> Self {
        self.faults.ignored_deletes.insert(collection_of(path.as_ref()));
        self
    }

    /// After the first successful delete every list answers 500.
    #[must_use]
    pub const fn with_reads_failing_after_delete(mut self) -> Self {
        self.faults.reads_fail_after_delete = true;
        self
    }

    /// Number of stored records across all tenants.
    pub fn record_count(&self) -> usize {
        self.lock().records.len()
    }

    fn lock(&self) -> MutexGuard<'_, TwinState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ui_only(&self, capability: &'static str) -> OpResult<()> {
        match self.kind {
            DriverKind::Ui => Ok(()),
            DriverKind::Api => Err(OperationError::Unsupported(capability)),
        }
    }

    fn handle(&self, state: &mut TwinState, request: &ApiRequest) -> ApiResponse {
        if request.anonymous && !self.faults.open_access {
            return fail(401, "authentication required");
        }
        if !request.anonymous && !state.authenticated {
            return fail(401, "authentication required");
        }
        let Some(tenant) = state.tenant.clone() else {
            return fail(400, "farm context required");
        };
        let collection = collection_of(&request.path);
        match request.method {
            Method::Get if self.faults.reads_fail_after_delete && state.deletes > 0 => {
                fail(500, "injected read failure")
            }
            Method::Get => self.list(state, &tenant, &collection),
            Method::Post => self.create(state, tenant, collection, request.body.as_ref()),
            Method::Put => Self::update(state, &tenant, &collection, request.body.as_ref()),
            Method::Delete => match request.query_value("id") {
                Some(id) => self.delete(state, &tenant, &collection, id),
                None => fail(400, "id query parameter required"),
            },
        }
    }

    fn visible<'s>(
        &self,
        state: &'s TwinState,
        tenant: &'s TenantId,
        collection: &'s str,
    ) -> impl Iterator<Item = &'s TwinRecord> + 's {
        let leaky = self.faults.leaks.contains(collection);
        state
            .records
            .iter()
            .filter(move |r| r.collection == collection && (leaky || &r.tenant == tenant))
    }

    fn list(&self, state: &TwinState, tenant: &TenantId, collection: &str) -> ApiResponse {
        let items: Vec<Value> = self
            .visible(state, tenant, collection)
            .map(TwinRecord::to_json)
            .collect();
        ok(200, Value::Array(items))
    }

    fn create(
        &self,
        state: &mut TwinState,
        tenant: TenantId,
        collection: String,
        body: Option<&Value>,
    ) -> ApiResponse {
        let Some(Value::Object(fields)) = body else {
            return fail(400, "request body must be an object");
        };
        state.creates += 1;
        if let Some(k) = self.faults.failure_every {
            if state.creates % k == 0 {
                return fail(500, "injected failure");
            }
        }
        let record = TwinRecord {
            id: uuid::Uuid::new_v4().to_string(),
            tenant,
            collection,
            fields: fields.clone(),
        };
        let data = record.to_json();
        state.records.push_back(record);
        ok(201, data)
    }

    fn update(
        state: &mut TwinState,
        tenant: &TenantId,
        collection: &str,
        body: Option<&Value>,
    ) -> ApiResponse {
        let Some(Value::Object(changes)) = body else {
            return fail(400, "request body must be an object");
        };
        let Some(id) = changes.get("id").and_then(Value::as_str) else {
            return fail(400, "id required");
        };
        let position = state
            .records
            .iter()
            .position(|r| r.id == id && r.collection == collection && &r.tenant == tenant);
        let Some(record) = position.and_then(|index| state.records.get_mut(index)) else {
            return fail(404, "not found");
        };
        for (key, value) in changes {
            if key != "id" {
                record.fields.insert(key.clone(), value.clone());
            }
        }
        ok(200, record.to_json())
    }

    fn delete(
        &self,
        state: &mut TwinState,
        tenant: &TenantId,
        collection: &str,
        id: &str,
    ) -> ApiResponse {
        let exists = state
            .records
            .iter()
            .any(|r| r.id == id && r.collection == collection && &r.tenant == tenant);
        if !exists {
            return fail(404, "not found");
        }
        let has_dependents = state
            .records
            .iter()
            .any(|r| &r.tenant == tenant && r.references(id));
        let behavior = self
            .faults
            .cascades
            .get(collection)
            .copied()
            .unwrap_or(TwinCascade::Cascade);
        if has_dependents && behavior == TwinCascade::Restrict {
            return fail(409, "record is referenced by other records");
        }
        state.deletes += 1;
        if self.faults.ignored_deletes.contains(collection) {
            return ok(200, json!({"id": id}));
        }
        state.records.retain(|r| {
            let target = r.id == id;
            let dependent =
                behavior == TwinCascade::Cascade && &r.tenant == tenant && r.references(id);
            !(target || dependent)
        });
        ok(200, json!({"id": id}))
    }

    fn page_text_visible(&self, state: &TwinState, text: &str) -> bool {
        match (&state.page, &state.tenant) {
            (Some(page), Some(tenant)) => self
                .visible(state, tenant, &collection_of(page))
                .any(|r| r.shows_text(text)),
            _ => false,
        }
    }

    fn submit(&self, state: &mut TwinState) -> OpResult<()> {
        let form = state
            .form
            .take()
            .ok_or_else(|| OperationError::ElementNotFound(SUBMIT_TEST_ID.to_string()))?;
        let page = state.page.clone().unwrap_or_default();
        let path = format!("{API_PREFIX}{page}");
        let request = match form.mode {
            FormMode::Create => ApiRequest::post(path, Value::Object(form.fields)),
            FormMode::Edit(id) => {
                let mut body = form.fields;
                body.insert("id".to_string(), Value::String(id));
                ApiRequest::put(path, Value::Object(body))
            }
        };
        let response = self.handle(state, &request);
        state.last_response = Some(response.body.clone());
        response.into_data().map(|_| ())
    }

    fn confirm_delete(&self, state: &mut TwinState) -> OpResult<()> {
        let id = state
            .pending_delete
            .take()
            .ok_or_else(|| OperationError::ElementNotFound(CONFIRM_DELETE_TEST_ID.to_string()))?;
        let page = state.page.clone().unwrap_or_default();
        let request = ApiRequest::delete(format!("{API_PREFIX}{page}")).with_query("id", id);
        let response = self.handle(state, &request);
        state.selected = None;
        state.last_response = Some(response.body.clone());
        response.into_data().map(|_| ())
    }

    fn test_id_visible(state: &TwinState, id: &str) -> bool {
        if id == SUBMIT_TEST_ID {
            state.form.is_some()
        } else if id == CONFIRM_DELETE_TEST_ID {
            state.pending_delete.is_some()
        } else if is_trigger(id, "create") {
            state.page.is_some()
        } else if is_trigger(id, "edit") || is_trigger(id, "delete") {
            state.selected.is_some()
        } else {
            false
        }
    }
}

fn is_trigger(id: &str, action: &str) -> bool {
    id == action || id.ends_with(&format!("-{action}"))
}

#[async_trait]
impl Driver for TwinDriver {
    fn kind(&self) -> DriverKind {
        self.kind
    }

    async fn navigate(&self, path: &str) -> OpResult<()> {
        self.ui_only("navigate")?;
        let mut state = self.lock();
        state.page = Some(path.to_string());
        state.form = None;
        state.selected = None;
        state.pending_delete = None;
        Ok(())
    }

    async fn act(&self, trigger: &Locator) -> OpResult<()> {
        self.ui_only("act")?;
        let mut state = self.lock();
        let missing = || OperationError::ElementNotFound(trigger.to_string());
        match trigger {
            Locator::TestId(id) if id == SUBMIT_TEST_ID => self.submit(&mut state),
            Locator::TestId(id) if id == CONFIRM_DELETE_TEST_ID => self.confirm_delete(&mut state),
            Locator::TestId(id) if is_trigger(id, "create") && state.page.is_some() => {
                state.form = Some(Form {
                    mode: FormMode::Create,
                    fields: Map::new(),
                });
                Ok(())
            }
            Locator::TestId(id) if is_trigger(id, "edit") => {
                let selected = state.selected.clone().ok_or_else(missing)?;
                state.form = Some(Form {
                    mode: FormMode::Edit(selected),
                    fields: Map::new(),
                });
                Ok(())
            }
            Locator::TestId(id) if is_trigger(id, "delete") => {
                let selected = state.selected.clone().ok_or_else(missing)?;
                state.pending_delete = Some(selected);
                Ok(())
            }
            Locator::Text(text) => {
                let (Some(page), Some(tenant)) = (state.page.clone(), state.tenant.clone()) else {
                    return Err(missing());
                };
                let id = self
                    .visible(&state, &tenant, &collection_of(&page))
                    .find(|r| r.shows_text(text))
                    .map(|r| r.id.clone())
                    .ok_or_else(missing)?;
                state.selected = Some(id);
                Ok(())
            }
            Locator::TestId(_) | Locator::Css(_) => Err(missing()),
        }
    }

    async fn set_field(&self, name: &str, value: &Value) -> OpResult<()> {
        self.ui_only("set_field")?;
        let mut state = self.lock();
        let form = state
            .form
            .as_mut()
            .ok_or_else(|| OperationError::ElementNotFound(format!("field {name}")))?;
        form.fields.insert(name.to_string(), value.clone());
        Ok(())
    }

    async fn wait_for_visible(&self, locator: &Locator, timeout: Duration) -> OpResult<()> {
        self.ui_only("wait_for_visible")?;
        poll_visible(self, locator, timeout).await
    }

    async fn is_visible(&self, locator: &Locator) -> OpResult<bool> {
        self.ui_only("is_visible")?;
        let state = self.lock();
        Ok(match locator {
            Locator::Text(text) => self.page_text_visible(&state, text),
            Locator::TestId(id) => Self::test_id_visible(&state, id),
            Locator::Css(_) => false,
        })
    }

    async fn call(&self, request: ApiRequest) -> OpResult<ApiResponse> {
        if !self.faults.latency.is_zero() {
            tokio::time::sleep(self.faults.latency).await;
        }
        if self.faults.hangs.contains(&collection_of(&request.path)) {
            std::future::pending::<()>().await;
        }
        let mut state = self.lock();
        let response = self.handle(&mut state, &request);
        debug!(
            method = %request.method,
            path = %request.path,
            status = response.status,
            "twin call"
        );
        state.last_response = Some(response.body.clone());
        Ok(response)
    }

    async fn switch_tenant(&self, tenant: Option<&TenantId>) -> OpResult<()> {
        let mut state = self.lock();
        state.tenant = tenant.cloned();
        state.form = None;
        state.selected = None;
        state.pending_delete = None;
        Ok(())
    }

    fn active_tenant(&self) -> Option<TenantId> {
        self.lock().tenant.clone()
    }

    async fn authenticate(&self) -> OpResult<()> {
        self.lock().authenticated = true;
        Ok(())
    }

    async fn snapshot(&self) -> OpResult<Artifact> {
        let state = self.lock();
        Ok(Artifact::json(&json!({
            "kind": self.kind.to_string(),
            "tenant": state.tenant.as_ref().map(TenantId::as_str),
            "page": state.page,
            "records": state.records.len(),
            "lastResponse": state.last_response,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn session(driver: &TwinDriver, tenant: &str) -> OpResult<()> {
        driver.authenticate().await?;
        driver.switch_tenant(Some(&TenantId::new(tenant))).await
    }

    async fn create(driver: &TwinDriver, path: &str, body: Value) -> OpResult<String> {
        let data = driver.call(ApiRequest::post(path, body)).await?.into_data()?;
        crate::driver::entity_id(&data).ok_or(OperationError::NotFound)
    }

    async fn count(driver: &TwinDriver, path: &str) -> OpResult<usize> {
        let data = driver.call(ApiRequest::get(path)).await?.into_data()?;
        Ok(data.as_array().map_or(0, Vec::len))
    }

    #[tokio::test]
    async fn test_records_are_tenant_scoped() -> OpResult<()> {
        let driver = TwinDriver::api();
        session(&driver, "farm-a").await?;
        create(&driver, "/api/crops", json!({"name": "A"})).await?;
        assert_eq!(count(&driver, "/api/crops").await?, 1);

        driver.switch_tenant(Some(&TenantId::new("farm-b"))).await?;
        assert_eq!(count(&driver, "/api/crops").await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_leak_ignores_tenant() -> OpResult<()> {
        let driver = TwinDriver::api().with_leak("/api/crops");
        session(&driver, "farm-a").await?;
        create(&driver, "/api/crops", json!({"name": "A"})).await?;
        driver.switch_tenant(Some(&TenantId::new("farm-b"))).await?;
        assert_eq!(count(&driver, "/api/crops").await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_tenant_and_anonymous_requests() -> OpResult<()> {
        let driver = TwinDriver::api();
        driver.authenticate().await?;
        let response = driver.call(ApiRequest::get("/api/crops")).await?;
        assert_eq!(response.status, 400);

        driver.switch_tenant(Some(&TenantId::new("farm-a"))).await?;
        let response = driver.call(ApiRequest::get("/api/crops").anonymous()).await?;
        assert_eq!(response.status, 401);

        let open = TwinDriver::api().with_open_access();
        session(&open, "farm-a").await?;
        let response = open.call(ApiRequest::get("/api/crops").anonymous()).await?;
        assert_eq!(response.status, 200);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_behaviors() -> OpResult<()> {
        for (behavior, parent_status, children_left) in [
            (TwinCascade::Cascade, 200, 0),
            (TwinCascade::Restrict, 409, 1),
            (TwinCascade::Orphan, 200, 1),
        ] {
            let driver = TwinDriver::api().with_cascade("/api/crops", behavior);
            session(&driver, "farm-a").await?;
            let crop = create(&driver, "/api/crops", json!({"name": "P"})).await?;
            create(&driver, "/api/batches", json!({"batchCode": "C", "cropId": crop})).await?;

            let response = driver
                .call(ApiRequest::delete("/api/crops").with_query("id", crop.clone()))
                .await?;
            assert_eq!(response.status, parent_status, "{behavior:?}");
            assert_eq!(count(&driver, "/api/batches").await?, children_left, "{behavior:?}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_faults() -> OpResult<()> {
        let driver = TwinDriver::api()
            .with_ignored_delete("/api/crops")
            .with_reads_failing_after_delete();
        session(&driver, "farm-a").await?;
        let crop = create(&driver, "/api/crops", json!({"name": "P"})).await?;
        assert_eq!(count(&driver, "/api/crops").await?, 1);

        let response = driver
            .call(ApiRequest::delete("/api/crops").with_query("id", crop))
            .await?;
        assert_eq!(response.status, 200);
        assert_eq!(driver.record_count(), 1);
        let response = driver.call(ApiRequest::get("/api/crops")).await?;
        assert_eq!(response.status, 500);
        Ok(())
    }

    #[tokio::test]
    async fn test_failure_every_k_creates() -> OpResult<()> {
        let driver = TwinDriver::api().with_failure_every(3);
        session(&driver, "farm-a").await?;
        let mut statuses = Vec::new();
        for i in 0..6 {
            let response = driver
                .call(ApiRequest::post("/api/crops", json!({"name": i})))
                .await?;
            statuses.push(response.status);
        }
        assert_eq!(statuses, vec![201, 201, 500, 201, 201, 500]);
        Ok(())
    }

    #[tokio::test]
    async fn test_api_twin_rejects_ui_capabilities() {
        let driver = TwinDriver::api();
        assert_eq!(
            driver.navigate("/crops").await,
            Err(OperationError::Unsupported("navigate"))
        );
    }

    #[tokio::test]
    async fn test_ui_form_flow() -> OpResult<()> {
        let driver = TwinDriver::ui();
        session(&driver, "farm-a").await?;
        driver.navigate("/crops").await?;
        assert!(!driver.is_visible(&Locator::test_id(SUBMIT_TEST_ID)).await?);
        driver.act(&Locator::test_id("crops-create")).await?;
        driver.set_field("name", &json!("Kale")).await?;
        driver.act(&Locator::test_id(SUBMIT_TEST_ID)).await?;
        assert!(driver.is_visible(&Locator::text("Kale")).await?);

        driver.act(&Locator::text("Kale")).await?;
        driver.act(&Locator::test_id("crops-delete")).await?;
        driver.act(&Locator::test_id(CONFIRM_DELETE_TEST_ID)).await?;
        assert!(!driver.is_visible(&Locator::text("Kale")).await?);
        assert_eq!(driver.record_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_snapshot_is_json() -> OpResult<()> {
        let driver = TwinDriver::api();
        session(&driver, "farm-a").await?;
        let artifact = driver.snapshot().await?;
        assert_eq!(artifact.extension, "json");
        let value: Value = serde_json::from_slice(&artifact.contents).unwrap_or(Value::Null);
        assert_eq!(value["tenant"], json!("farm-a"));
        Ok(())
    }
}
