//! Tenant isolation validator.
//!
//! A record created under tenant A must never be visible under tenant B,
//! nor with no tenant context at all. A visible record is a correctness
//! defect; callers must never retry it away.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info};

use crate::{
    driver::TenantId,
    error::OperationError,
    ops::EntityOps,
    run::TestRun,
    Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IsolationResult {
    pub isolation_holds: bool,
    pub created_in_a: bool,
    pub visible_in_b: bool,
}

/// Outcome of listing with no tenant selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NoContextResult {
    pub created: bool,
    /// The list call was refused outright
    pub rejected: bool,
    /// The record appeared in the context-free list
    pub visible: bool,
}

impl NoContextResult {
    pub const fn holds(&self) -> bool {
        !self.visible
    }
}

/// True if any string anywhere in `value` contains `needle`.
pub fn mentions(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s.contains(needle),
        Value::Array(items) => items.iter().any(|item| mentions(item, needle)),
        Value::Object(map) => map.values().any(|item| mentions(item, needle)),
        Value::Null | Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Create under `tenant_a`; returns the display value when the create
/// succeeded. The entity is tracked under `tenant_a`.
async fn create_under(
    run: &mut TestRun,
    type_name: &str,
    tenant: &TenantId,
) -> Result<Option<String>> {
    let descriptor = run.describe(type_name)?;
    run.switch_tenant(Some(tenant)).await?;
    let record = run.generate(&descriptor, Map::new());
    let display = record.display_value();
    let driver = run.driver_handle();
    let created = EntityOps::new(driver.as_ref(), run.timeouts())
        .create(&descriptor, &record)
        .await;
    match created.entity_id {
        Some(id) if created.success => {
            run.track(type_name, &id, &display);
            Ok(Some(display))
        }
        _ => Ok(None),
    }
}

async fn list_under(
    run: &TestRun,
    type_name: &str,
    tenant: Option<&TenantId>,
) -> Result<std::result::Result<Vec<Value>, OperationError>> {
    let descriptor = run.describe(type_name)?;
    run.switch_tenant(tenant).await?;
    Ok(EntityOps::new(run.driver(), run.timeouts())
        .list(&descriptor)
        .await)
}

/// Create a record under `tenant_a` and look for it under `tenant_b`.
///
/// The previously active tenant is restored before returning.
///
/// # Errors
///
/// Fails when the tenant switch fails or the list under `tenant_b` errors
/// for a reason other than access being denied; either leaves the check
/// inconclusive.
pub async fn check_isolation(
    run: &mut TestRun,
    type_name: &str,
    tenant_a: &TenantId,
    tenant_b: &TenantId,
) -> Result<IsolationResult> {
    let previous = run.driver().active_tenant();
    let outcome = isolation_steps(run, type_name, tenant_a, tenant_b).await;
    run.switch_tenant(previous.as_ref()).await?;
    let result = outcome?;
    if result.isolation_holds {
        info!(
            entity = %type_name,
            tenant_a = %tenant_a,
            tenant_b = %tenant_b,
            created = result.created_in_a,
            "isolation holds"
        );
    } else {
        error!(
            entity = %type_name,
            tenant_a = %tenant_a,
            tenant_b = %tenant_b,
            "ISOLATION VIOLATION: record visible across tenants"
        );
    }
    Ok(result)
}

async fn isolation_steps(
    run: &mut TestRun,
    type_name: &str,
    tenant_a: &TenantId,
    tenant_b: &TenantId,
) -> Result<IsolationResult> {
    let Some(display) = create_under(run, type_name, tenant_a).await? else {
        return Ok(IsolationResult {
            isolation_holds: true,
            created_in_a: false,
            visible_in_b: false,
        });
    };
    let visible_in_b = match list_under(run, type_name, Some(tenant_b)).await? {
        Ok(items) => items.iter().any(|item| mentions(item, &display)),
        Err(err) if err.is_access_denied() => false,
        Err(err) => return Err(err.into()),
    };
    Ok(IsolationResult {
        isolation_holds: !visible_in_b,
        created_in_a: true,
        visible_in_b,
    })
}

/// Create a record under `tenant` and list with no tenant selected.
///
/// # Errors
///
/// Fails when a tenant switch fails or the driver errors in a way that is
/// neither a refusal nor a list.
pub async fn check_no_tenant_context(
    run: &mut TestRun,
    type_name: &str,
    tenant: &TenantId,
) -> Result<NoContextResult> {
    let previous = run.driver().active_tenant();
    let outcome = no_context_steps(run, type_name, tenant).await;
    run.switch_tenant(previous.as_ref()).await?;
    let result = outcome?;
    if !result.holds() {
        error!(
            entity = %type_name,
            tenant_a = %tenant,
            "ISOLATION VIOLATION: record visible without tenant context"
        );
    }
    Ok(result)
}

async fn no_context_steps(
    run: &mut TestRun,
    type_name: &str,
    tenant: &TenantId,
) -> Result<NoContextResult> {
    let Some(display) = create_under(run, type_name, tenant).await? else {
        return Ok(NoContextResult {
            created: false,
            rejected: false,
            visible: false,
        });
    };
    match list_under(run, type_name, None).await? {
        Ok(items) => Ok(NoContextResult {
            created: true,
            rejected: false,
            visible: items.iter().any(|item| mentions(item, &display)),
        }),
        Err(
            OperationError::Http { .. }
            | OperationError::Rejected(_)
            | OperationError::Unauthenticated
            | OperationError::Forbidden
            | OperationError::NotFound,
        ) => Ok(NoContextResult {
            created: true,
            rejected: true,
            visible: false,
        }),
        Err(err) => Err(err.into()),
    }
}
