//! Referential-integrity / cascade validator.
//!
//! One parent, one child per child type referencing it through
//! `<parentType>Id`, then delete the parent and re-read the children.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info};

use crate::{
    config::RestrictedPolicy,
    ops::EntityOps,
    run::TestRun,
    Error, Result,
};

/// Observed deletion policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CascadePolicy {
    /// Every child disappeared with the parent
    Cascaded,
    /// The parent delete was refused and every child remains
    Restricted,
    /// Anything else, typically orphaned children
    Violated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CascadeResult {
    pub parent_deleted: bool,
    /// Child types whose record is still readable
    pub children_remaining: Vec<String>,
    pub policy: CascadePolicy,
}

/// Pass/fail reading of a cascade result under a deployment policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeVerdict {
    Pass,
    /// Passes, but is reported distinctly from a cascade
    PassRestricted,
    Fail,
}

impl CascadeResult {
    pub const fn verdict(&self, restricted: RestrictedPolicy) -> CascadeVerdict {
        match (self.policy, restricted) {
            (CascadePolicy::Cascaded, _) => CascadeVerdict::Pass,
            (CascadePolicy::Restricted, RestrictedPolicy::Pass) => CascadeVerdict::PassRestricted,
            (CascadePolicy::Restricted, RestrictedPolicy::Fail) | (CascadePolicy::Violated, _) => {
                CascadeVerdict::Fail
            }
        }
    }
}

/// Classify what happened after the parent delete.
pub fn classify(parent_deleted: bool, children: usize, remaining: usize) -> CascadePolicy {
    if remaining == 0 {
        CascadePolicy::Cascaded
    } else if !parent_deleted && remaining == children {
        CascadePolicy::Restricted
    } else {
        CascadePolicy::Violated
    }
}

/// Run the cascade check for `parent_type` and its `child_types`.
///
/// Everything created is tracked, so whatever survives is removed at
/// teardown.
///
/// # Errors
///
/// Returns `Error::Config` for an empty child list,
/// `Error::Precondition` when the parent or a child cannot be created, and
/// `Error::Operation` when a child cannot be re-read after the parent
/// delete. An unreadable child stays tracked.
pub async fn check_cascade(
    run: &mut TestRun,
    parent_type: &str,
    child_types: &[&str],
) -> Result<CascadeResult> {
    if child_types.is_empty() {
        return Err(Error::Config(format!(
            "cascade check for {parent_type} needs at least one child type"
        )));
    }
    let parent = run.describe(parent_type)?;
    let driver = run.driver_handle();
    let ops = EntityOps::new(driver.as_ref(), run.timeouts());

    let parent_record = run.generate(&parent, Map::new());
    let parent_display = parent_record.display_value();
    let created = ops.create(&parent, &parent_record).await;
    let parent_id = match created.entity_id {
        Some(id) if created.success => id,
        _ => {
            return Err(Error::Precondition(format!(
                "could not create parent {parent_type}: {}",
                created.error.unwrap_or_default()
            )))
        }
    };
    run.track(parent_type, &parent_id, &parent_display);

    let mut children = Vec::with_capacity(child_types.len());
    for child_type in child_types {
        let child = run.describe(child_type)?;
        let mut overrides = Map::new();
        overrides.insert(parent.foreign_key_field(), Value::String(parent_id.clone()));
        let record = run.generate(&child, overrides);
        let display = record.display_value();
        let created = ops.create(&child, &record).await;
        match created.entity_id {
            Some(id) if created.success => {
                run.track(child_type, &id, &display);
                children.push((child, id, display));
            }
            _ => {
                return Err(Error::Precondition(format!(
                    "could not create child {child_type} of {parent_type}: {}",
                    created.error.unwrap_or_default()
                )))
            }
        }
    }

    let parent_deleted = ops.delete(&parent, &parent_id, &parent_display).await.success;
    if parent_deleted {
        run.release(parent_type, &parent_id);
    }

    let mut children_remaining = Vec::new();
    for (child, id, display) in &children {
        match ops.find(child, display).await {
            Ok(None) => {
                run.release(&child.type_name, id);
            }
            Ok(Some(_)) => children_remaining.push(child.type_name.clone()),
            Err(err) => {
                error!(entity = %child.type_name, %err, "cascade re-read failed");
                return Err(Error::Operation(err));
            }
        }
    }

    let policy = classify(parent_deleted, children.len(), children_remaining.len());
    match policy {
        CascadePolicy::Violated => {
            error!(
                entity = %parent_type,
                parent_deleted,
                remaining = ?children_remaining,
                "CASCADE VIOLATION: orphaned children"
            );
        }
        CascadePolicy::Cascaded | CascadePolicy::Restricted => {
            info!(entity = %parent_type, %policy, "cascade check");
        }
    }
    Ok(CascadeResult {
        parent_deleted,
        children_remaining,
        policy,
    })
}
