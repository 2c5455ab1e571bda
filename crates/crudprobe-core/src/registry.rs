//! Entity registry: one immutable descriptor per entity type.
//!
//! Entity types form a closed set ([`EntityType`]). The registry maps each
//! registered type to an [`EntityDescriptor`]; keys that do not name an
//! entity type are rejected when registering or overriding, never at lookup.
//! Lookups of unregistered type names fall back to a generic descriptor only
//! when the registry was built with the fallback enabled.

use std::{collections::BTreeMap, str::FromStr};

use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoEnumIterator};

use crate::{driver::Locator, Error, Result};

/// Prefix prepended to a descriptor's base path for REST calls.
pub const API_PREFIX: &str = "/api";

/// Entity types of the farm-management application.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumIter,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum EntityType {
    SeedVariety,
    Crop,
    CropPlan,
    Batch,
    Customer,
    Order,
    Supplier,
    Equipment,
    InventoryTransaction,
}

impl EntityType {
    /// Short label used in generated display values (`AUTO_TEST_<label>_<token>`).
    pub const fn label(self) -> &'static str {
        match self {
            Self::SeedVariety => "Seed",
            Self::Crop => "Crop",
            Self::CropPlan => "Plan",
            Self::Batch => "Batch",
            Self::Customer => "Customer",
            Self::Order => "Order",
            Self::Supplier => "Supplier",
            Self::Equipment => "Equipment",
            Self::InventoryTransaction => "Txn",
        }
    }
}

/// CRUD verb an entity type may support.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Verb {
    Create,
    Read,
    Update,
    Delete,
}

impl Verb {
    pub const ALL: [Self; 4] = [Self::Create, Self::Read, Self::Update, Self::Delete];
}

/// Per-entity-type description of paths, triggers and fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub type_name: String,
    /// `None` for the generic fallback descriptor
    pub kind: Option<EntityType>,
    /// Application route of the list page; REST calls go to [`Self::api_path`]
    pub base_path: String,
    pub create_trigger: Locator,
    pub edit_trigger: Locator,
    pub delete_trigger: Locator,
    pub display_field: String,
    pub update_field: String,
    pub required_fields: Vec<String>,
    pub verbs: Vec<Verb>,
}

impl EntityDescriptor {
    fn for_type(
        kind: EntityType,
        base_path: &str,
        display_field: &str,
        required_fields: &[&str],
        verbs: &[Verb],
    ) -> Self {
        let slug = base_path.trim_start_matches('/').replace('/', "-");
        Self {
            type_name: kind.to_string(),
            kind: Some(kind),
            base_path: base_path.to_string(),
            create_trigger: Locator::test_id(format!("{slug}-create")),
            edit_trigger: Locator::test_id(format!("{slug}-edit")),
            delete_trigger: Locator::test_id(format!("{slug}-delete")),
            display_field: display_field.to_string(),
            update_field: "notes".to_string(),
            required_fields: required_fields.iter().map(|f| (*f).to_string()).collect(),
            verbs: verbs.to_vec(),
        }
    }

    /// Generic descriptor used when no specific entry exists.
    pub fn generic(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            kind: None,
            base_path: format!("/{type_name}"),
            create_trigger: Locator::test_id("create"),
            edit_trigger: Locator::test_id("edit"),
            delete_trigger: Locator::test_id("delete"),
            display_field: "name".to_string(),
            update_field: "notes".to_string(),
            required_fields: vec!["name".to_string()],
            verbs: Verb::ALL.to_vec(),
        }
    }

    pub fn supports(&self, verb: Verb) -> bool {
        self.verbs.contains(&verb)
    }

    /// Collection endpoint for REST calls.
    pub fn api_path(&self) -> String {
        format!("{API_PREFIX}{}", self.base_path)
    }

    /// Name of the foreign-key field children use to reference this type.
    pub fn foreign_key_field(&self) -> String {
        format!("{}Id", self.type_name)
    }

    fn check(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::Registration(format!("{}: {msg}", self.type_name)));
        if !self.base_path.starts_with('/') {
            return fail(format!("base path '{}' must start with '/'", self.base_path));
        }
        if self.display_field.is_empty() || self.update_field.is_empty() {
            return fail("display and update fields must be named".to_string());
        }
        if !self.required_fields.contains(&self.display_field) {
            return fail(format!(
                "display field '{}' must be a required field",
                self.display_field
            ));
        }
        if !self.supports(Verb::Create) {
            return fail("every entity type must support create".to_string());
        }
        Ok(())
    }
}

/// Registry of entity descriptors keyed by [`EntityType`].
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    descriptors: BTreeMap<EntityType, EntityDescriptor>,
    fallback: bool,
}

impl EntityRegistry {
    /// Empty registry without generic fallback.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry of every farm entity type, with generic fallback enabled.
    pub fn builtin() -> Result<Self> {
        use EntityType as T;
        use Verb::{Create, Delete, Read, Update};

        let all = &[Create, Read, Update, Delete];
        let mut registry = Self::empty().with_fallback(true);
        for descriptor in [
            EntityDescriptor::for_type(
                T::SeedVariety,
                "/seed-varieties",
                "name",
                &["name", "stockQuantity", "minStockLevel"],
                all,
            ),
            EntityDescriptor::for_type(T::Crop, "/crops", "name", &["name", "category"], all),
            EntityDescriptor::for_type(
                T::CropPlan,
                "/crop-plans",
                "name",
                &["name", "plannedStart", "plannedEnd"],
                all,
            ),
            EntityDescriptor::for_type(
                T::Batch,
                "/batches",
                "batchCode",
                &["batchCode", "quantity", "sowDate"],
                all,
            ),
            EntityDescriptor::for_type(T::Customer, "/customers", "name", &["name", "email"], all),
            EntityDescriptor::for_type(
                T::Order,
                "/orders",
                "reference",
                &["reference", "orderDate", "status"],
                all,
            ),
            EntityDescriptor::for_type(
                T::Supplier,
                "/suppliers",
                "name",
                &["name", "contactEmail"],
                all,
            ),
            EntityDescriptor::for_type(
                T::Equipment,
                "/equipment",
                "name",
                &["name", "condition"],
                all,
            ),
            // Ledger entries are immutable once written.
            EntityDescriptor::for_type(
                T::InventoryTransaction,
                "/inventory-transactions",
                "reference",
                &["reference", "quantity", "transactionType"],
                &[Create, Read],
            ),
        ] {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    #[must_use]
    pub const fn with_fallback(mut self, fallback: bool) -> Self {
        self.fallback = fallback;
        self
    }

    /// Register a descriptor.
    ///
    /// # Errors
    ///
    /// Rejects generic descriptors, duplicate registrations and descriptors
    /// whose fields are inconsistent.
    pub fn register(&mut self, descriptor: EntityDescriptor) -> Result<()> {
        let Some(kind) = descriptor.kind else {
            return Err(Error::Registration(format!(
                "'{}' is not an entity type key",
                descriptor.type_name
            )));
        };
        if descriptor.type_name != kind.as_ref() {
            return Err(Error::Registration(format!(
                "descriptor name '{}' does not match key '{kind}'",
                descriptor.type_name
            )));
        }
        descriptor.check()?;
        if self.descriptors.contains_key(&kind) {
            return Err(Error::Registration(format!("{kind} is already registered")));
        }
        self.descriptors.insert(kind, descriptor);
        Ok(())
    }

    /// Replace the base path of a registered type.
    ///
    /// # Errors
    ///
    /// Returns `Error::Registration` when `type_name` is not a registered key.
    pub fn override_base_path(&mut self, type_name: &str, base_path: &str) -> Result<()> {
        let descriptor = EntityType::from_str(type_name)
            .ok()
            .and_then(|kind| self.descriptors.get_mut(&kind))
            .ok_or_else(|| {
                Error::Registration(format!("unknown entity type key '{type_name}'"))
            })?;
        let mut updated = descriptor.clone();
        updated.base_path = base_path.to_string();
        updated.check()?;
        *descriptor = updated;
        Ok(())
    }

    /// Look up the descriptor for `type_name`.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownEntityType` when no entry exists and the
    /// generic fallback is disabled.
    pub fn describe(&self, type_name: &str) -> Result<EntityDescriptor> {
        let registered = EntityType::from_str(type_name)
            .ok()
            .and_then(|kind| self.descriptors.get(&kind));
        match registered {
            Some(descriptor) => Ok(descriptor.clone()),
            None if self.fallback && is_valid_type_name(type_name) => {
                Ok(EntityDescriptor::generic(type_name))
            }
            None => Err(Error::UnknownEntityType(type_name.to_string())),
        }
    }

    /// Registered descriptors in declaration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.descriptors.values()
    }

    /// Registered entity types in declaration order.
    pub fn types(&self) -> impl Iterator<Item = EntityType> + '_ {
        EntityType::iter().filter(|kind| self.descriptors.contains_key(kind))
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

fn is_valid_type_name(type_name: &str) -> bool {
    !type_name.is_empty()
        && type_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
