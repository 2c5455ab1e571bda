//! Entity lifecycle tracker.
//!
//! Every entity a run creates is tracked under `(type, id)` until it is
//! deleted. [`CleanupTracker::teardown`] best-effort deletes whatever is
//! left, newest first, each under the tenant it was created in. Teardown
//! never fails: individual delete failures are logged and the tracker is
//! empty afterwards either way.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    driver::{Driver, TenantId},
    error::OperationError,
    ops::{EntityOps, OpTimeouts},
    registry::{EntityRegistry, Verb},
};

/// Key of a tracked entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityKey {
    pub type_name: String,
    pub id: String,
}

/// An entity created during the run and not yet deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedEntity {
    pub type_name: String,
    pub id: String,
    /// Display value, needed to address the record on UI drivers
    pub display: String,
    /// Tenant active when the entity was created
    pub tenant: Option<TenantId>,
    pub created_at: DateTime<Utc>,
    seq: u64,
}

impl TrackedEntity {
    pub fn created_at_ms(&self) -> i64 {
        self.created_at.timestamp_millis()
    }

    pub fn key(&self) -> EntityKey {
        EntityKey {
            type_name: self.type_name.clone(),
            id: self.id.clone(),
        }
    }
}

/// `(type, id) -> TrackedEntity` mapping owned by a test run.
#[derive(Debug, Clone, Default)]
pub struct CleanupTracker {
    entries: im::OrdMap<EntityKey, TrackedEntity>,
    next_seq: u64,
}

impl CleanupTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a created entity. Tracking an already-tracked key keeps the
    /// original entry.
    pub fn track(
        &mut self,
        type_name: &str,
        id: &str,
        display: &str,
        tenant: Option<TenantId>,
    ) {
        let key = EntityKey {
            type_name: type_name.to_string(),
            id: id.to_string(),
        };
        if self.entries.contains_key(&key) {
            return;
        }
        let entity = TrackedEntity {
            type_name: key.type_name.clone(),
            id: key.id.clone(),
            display: display.to_string(),
            tenant,
            created_at: Utc::now(),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        debug!(entity = %type_name, %id, "tracked");
        self.entries.insert(key, entity);
    }

    /// Forget an entity after a successful delete. Releasing an unknown key
    /// is a no-op.
    pub fn release(&mut self, type_name: &str, id: &str) -> bool {
        let key = EntityKey {
            type_name: type_name.to_string(),
            id: id.to_string(),
        };
        self.entries.remove(&key).is_some()
    }

    pub fn contains(&self, type_name: &str, id: &str) -> bool {
        self.entries.contains_key(&EntityKey {
            type_name: type_name.to_string(),
            id: id.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tracked entities, newest first.
    pub fn newest_first(&self) -> Vec<TrackedEntity> {
        let mut entities: Vec<_> = self.entries.values().cloned().collect();
        entities.sort_by(|a, b| b.seq.cmp(&a.seq));
        entities
    }

    /// Delete every remaining entity; returns how many were cleaned.
    ///
    /// An entity that is already gone counts as cleaned. The tenant active
    /// before teardown is restored afterwards.
    pub async fn teardown(
        &mut self,
        driver: &dyn Driver,
        registry: &EntityRegistry,
        timeouts: OpTimeouts,
    ) -> usize {
        let pending = self.newest_first();
        self.entries = im::OrdMap::new();
        if pending.is_empty() {
            return 0;
        }

        let ops = EntityOps::new(driver, timeouts);
        let previous = driver.active_tenant();
        let mut cleaned = 0;
        for entity in &pending {
            let Ok(descriptor) = registry.describe(&entity.type_name) else {
                warn!(
                    entity = %entity.type_name,
                    id = %entity.id,
                    "no descriptor; cannot clean up"
                );
                continue;
            };
            if !descriptor.supports(Verb::Delete) {
                debug!(
                    entity = %entity.type_name,
                    id = %entity.id,
                    "type has no delete; left in place"
                );
                continue;
            }
            if driver.active_tenant() != entity.tenant {
                if let Err(err) = driver.switch_tenant(entity.tenant.as_ref()).await {
                    warn!(
                        entity = %entity.type_name,
                        id = %entity.id,
                        error = %err,
                        "tenant switch failed during teardown"
                    );
                    continue;
                }
            }
            match ops
                .delete_checked(&descriptor, &entity.id, &entity.display)
                .await
            {
                Ok(()) | Err(OperationError::NotFound) => cleaned += 1,
                Err(err) => {
                    warn!(
                        entity = %entity.type_name,
                        id = %entity.id,
                        error = %err,
                        "teardown delete failed"
                    );
                }
            }
        }
        if driver.active_tenant() != previous {
            if let Err(err) = driver.switch_tenant(previous.as_ref()).await {
                warn!(error = %err, "failed to restore tenant after teardown");
            }
        }
        info!(cleaned, total = pending.len(), "teardown complete");
        cleaned
    }
}
